pub mod accounting;
pub mod config;
pub mod filter;
pub mod metrics_server;
pub mod pagination;
pub mod rest_client;
pub mod scanner;
pub mod scheduler;

pub use config::{load_config, Config};
pub use scheduler::run;
