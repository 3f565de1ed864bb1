pub mod auth;
pub mod controller;
pub mod session;

pub use controller::{SessionController, SubscriptionId};
pub use session::{AuthSnapshot, Session, SessionStatus};
