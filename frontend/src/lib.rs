//! Session layer of the portfolio frontend: sign-in state, token refresh and
//! authenticated API access for the gallery and admin screens.

pub mod api;
pub mod config;
pub mod state;
pub mod utils;

pub use api::{ApiClient, ApiError, ApiResponse, UserResponse};
pub use state::{AuthSnapshot, SessionController, SessionStatus};

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen::prelude::wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    if console_log::init_with_level(log::Level::Debug).is_err() {
        web_sys::console::log_1(&"Logger already initialized".into());
    }
    log::info!("Starting Portfolio frontend (wasm)");

    // Non-blocking: config.json is fetched while the app mounts. Globals from
    // env.js take precedence.
    leptos::spawn_local(async move {
        config::init().await;
        log::set_max_level(config::log_level().to_level_filter());
        log::debug!("Runtime config initialized");
    });
}
