pub mod advisor;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod kinds;
pub mod metrics;
pub mod remediation;
pub mod safety;

pub use config::AppConfig;
pub use controller::{run_controllers, ReconcilerContext};
pub use error::{KubeSkippyError, Result};
