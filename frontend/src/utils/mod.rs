pub mod single_flight;
pub mod storage;
pub mod time;
