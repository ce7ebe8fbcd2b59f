mod diagnose;
mod init;
mod migrate;
mod render;
mod start;
mod status;
mod stop;
mod validate;

pub use diagnose::{run_clear_locks, run_diagnose, run_recover, run_repair};
pub use init::run_init;
pub use migrate::{run_migrate, run_rollback, run_verify};
pub use render::run_render;
pub use start::{run_restart, run_start};
pub use status::run_status;
pub use stop::run_stop;
pub use validate::run_validate;

use poststack::Orchestrator;

/// The environment a command targets: the explicit argument, or the project
/// file's `environment`.
pub fn resolve_environment(orchestrator: &Orchestrator, explicit: Option<String>) -> String {
    explicit.unwrap_or_else(|| orchestrator.config().environment.clone())
}
