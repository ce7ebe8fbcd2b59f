mod cli;
mod commands;

use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use poststack::{Orchestrator, Parser as ConfigParser, Result};
use std::path::PathBuf;

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        if let Some(suggestion) = e.suggestion() {
            eprintln!("\nHint: {}", suggestion);
        }
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Commands that don't need a loaded project
    match &cli.command {
        Commands::Init { name, force } => {
            return commands::run_init(name.clone(), *force);
        }
        Commands::Validate => {
            return commands::run_validate(cli.config.clone());
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(*shell, &mut cmd, bin_name, &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    // Load and validate the project file
    let parser = ConfigParser::new();
    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => parser.find_config_file()?,
    };
    let config = parser.load_config(&config_path)?;
    let work_dir = config_dir(&config_path)?;
    config.validate(&work_dir)?;

    let orchestrator = Orchestrator::new(config, work_dir);

    // Ctrl-C cancels the in-flight operation; blocking steps check the token
    let cancel = orchestrator.cancel_token();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; cancelling");
                cancel.cancel();
            }
        }
    });

    match cli.command {
        Commands::Start { environment } => {
            let env = commands::resolve_environment(&orchestrator, environment);
            commands::run_start(&orchestrator, &env).await
        }
        Commands::Stop { environment, rm } => {
            let env = commands::resolve_environment(&orchestrator, environment);
            commands::run_stop(&orchestrator, &env, rm).await
        }
        Commands::Restart { environment } => {
            let env = commands::resolve_environment(&orchestrator, environment);
            commands::run_restart(&orchestrator, &env).await
        }
        Commands::Status { environment, json } => {
            let env = commands::resolve_environment(&orchestrator, environment);
            commands::run_status(&orchestrator, &env, json).await
        }
        Commands::Migrate {
            environment,
            target,
        } => {
            let env = commands::resolve_environment(&orchestrator, environment);
            commands::run_migrate(&orchestrator, &env, target, &cancel).await
        }
        Commands::Rollback {
            target,
            environment,
        } => {
            let env = commands::resolve_environment(&orchestrator, environment);
            commands::run_rollback(&orchestrator, &env, &target, &cancel).await
        }
        Commands::Verify { environment, json } => {
            let env = commands::resolve_environment(&orchestrator, environment);
            commands::run_verify(&orchestrator, &env, json).await
        }
        Commands::Diagnose { environment, json } => {
            let env = commands::resolve_environment(&orchestrator, environment);
            commands::run_diagnose(&orchestrator, &env, json).await
        }
        Commands::Repair {
            environment,
            kinds,
            force,
            dry_run,
        } => {
            let env = commands::resolve_environment(&orchestrator, environment);
            commands::run_repair(&orchestrator, &env, &kinds, force, dry_run).await
        }
        Commands::Recover {
            environment,
            dry_run,
        } => {
            let env = commands::resolve_environment(&orchestrator, environment);
            commands::run_recover(&orchestrator, &env, dry_run).await
        }
        Commands::ClearLocks { environment } => {
            let env = commands::resolve_environment(&orchestrator, environment);
            commands::run_clear_locks(&orchestrator, &env).await
        }
        Commands::Render { environment } => {
            let env = commands::resolve_environment(&orchestrator, environment);
            commands::run_render(&orchestrator, &env).await
        }
        // Handled earlier
        Commands::Init { .. } | Commands::Validate | Commands::Completions { .. } => {
            unreachable!("handled before project load")
        }
    }
}

fn config_dir(config_path: &PathBuf) -> Result<PathBuf> {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(parent.to_path_buf()),
        _ => Ok(std::env::current_dir()?),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
