//! CLI command implementations.

mod ask;
mod config;
mod doctor;
mod process;
mod serve;
mod status;

pub use ask::run_ask;
pub use config::run_config;
pub use doctor::run_doctor;
pub use process::run_process;
pub use serve::{router, run_serve, AppState};
pub use status::run_status;
