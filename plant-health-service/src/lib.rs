pub mod config;
pub mod dtos;
pub mod forwarder;
pub mod handlers;
pub mod services;
pub mod startup;

pub use forwarder::{Forwarder, ForwarderOptions, ResponseShape};
pub use startup::{build_router, AppState, Application};
