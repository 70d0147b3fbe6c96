pub mod check_in;
pub mod geo;
pub mod notify;
pub mod service;
pub mod session;
pub mod session_cache;
