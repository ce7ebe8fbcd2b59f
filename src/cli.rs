use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "poststack", version)]
#[command(about = "Poststack - Reproducible PostgreSQL environments with verified migrations")]
pub struct Cli {
    /// Project file path (defaults to .poststack.yaml, searched upward)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an environment: database, migrations, init phase, deployment
    Start {
        /// Environment name (defaults to the project file's `environment`)
        environment: Option<String>,
    },
    /// Stop an environment's containers
    Stop {
        /// Environment name
        environment: Option<String>,

        /// Remove containers after stopping (the data volume is kept)
        #[arg(long)]
        rm: bool,
    },
    /// Clean restart: stop with removal, then start
    Restart {
        /// Environment name
        environment: Option<String>,
    },
    /// Show environment status
    Status {
        /// Environment name
        environment: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Apply pending migrations
    Migrate {
        /// Environment name
        environment: Option<String>,

        /// Apply only migrations with version <= TARGET
        #[arg(long)]
        target: Option<String>,
    },
    /// Roll back applied migrations above a target version
    Rollback {
        /// Roll back every migration with version > TARGET
        target: String,

        /// Environment name
        environment: Option<String>,
    },
    /// Check applied migrations against their files (drift detection)
    Verify {
        /// Environment name
        environment: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Cross-check files, tracker, and schema for inconsistencies
    Diagnose {
        /// Environment name
        environment: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Fix auto-fixable issues found by diagnose
    Repair {
        /// Environment name
        environment: Option<String>,

        /// Only repair these issue kinds (comma-separated)
        #[arg(long, value_delimiter = ',')]
        kinds: Vec<String>,

        /// Enable destructive fixes (deleting tracker rows)
        #[arg(long)]
        force: bool,

        /// Show the planned actions without applying them
        #[arg(long)]
        dry_run: bool,
    },
    /// Insert tracking rows for migrations that were applied but not recorded
    Recover {
        /// Environment name
        environment: Option<String>,

        /// Show the planned inserts without applying them
        #[arg(long)]
        dry_run: bool,
    },
    /// Clear the migration lock
    ClearLocks {
        /// Environment name
        environment: Option<String>,
    },
    /// Preview manifest expansion with the resolved variable bindings
    Render {
        /// Environment name
        environment: Option<String>,
    },
    /// Create a starter .poststack.yaml in the current directory
    Init {
        /// Project name (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,

        /// Overwrite an existing project file
        #[arg(long)]
        force: bool,
    },
    /// Validate the project file
    Validate,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}
