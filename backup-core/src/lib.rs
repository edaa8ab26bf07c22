pub mod backend;
pub mod backend_select;
pub mod change_queue;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod notifier;
pub mod orchestrator;
pub mod procedure;
pub mod redirect;
pub mod scheduler;
pub mod settings;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{BackupError, Result};
pub use orchestrator::{BackupOrchestrator, OrchestratorDeps};
