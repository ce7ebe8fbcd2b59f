//! # Poststack
//!
//! A project-scoped operator for reproducible PostgreSQL-centric development
//! and deployment environments. One declarative project file
//! (`.poststack.yaml`) describes named environments; for each, poststack
//! provisions an isolated postgres container, applies a verifiable sequence
//! of SQL migrations, expands `${VAR}` templates over container manifests,
//! and brings the declared topology up.
//!
//! ## Features
//!
//! - **Migration Engine**: checksummed, lock-protected, transactional
//!   forward and rollback application with drift detection
//! - **Diagnostics**: detection and repair of inconsistent tracking state
//!   (missing rows, edited files, stuck locks, orphaned schemas)
//! - **Environment Orchestration**: init-then-deploy ordering with
//!   fail-fast init workloads
//! - **Template Expansion**: `${VAR}` / `${VAR:-default}` substitution with
//!   a documented scope precedence and auditable dry-run
//! - **Service Discovery**: per-dependency connection variables resolved for
//!   the dependent's networking mode
//! - **Cancellation Support**: every blocking step honors a
//!   `CancellationToken`
//!
//! ## Quick Start
//!
//! ```no_run
//! use poststack::{Orchestrator, Parser};
//!
//! # async fn example() -> Result<(), poststack::Error> {
//! let parser = Parser::new();
//! let path = parser.find_config_file()?;
//! let config = parser.load_config(&path)?;
//! let work_dir = path.parent().unwrap().to_path_buf();
//! config.validate(&work_dir)?;
//!
//! let orchestrator = Orchestrator::new(config, work_dir);
//! orchestrator.start("dev").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod migrate;
pub mod orchestrator;
pub mod postgres;
pub mod registry;
pub mod runtime;
pub mod template;

// Re-export commonly used types
pub use config::{Parser, ProjectConfig};
pub use error::{Error, Result};
pub use migrate::{
    DiagnosticIssue, Diagnostics, IssueKind, MigrationRunner, MigrationStatus, MigrationStore,
};
pub use orchestrator::{EnvironmentStatus, Orchestrator, Phase, StartReport};
pub use postgres::{ConnectionInfo, PostgresController};
pub use registry::{NetworkingMode, ServiceRegistry};
pub use runtime::{ContainerState, ManifestKind, RuntimeClient};
