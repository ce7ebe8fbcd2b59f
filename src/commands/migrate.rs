use poststack::{Error, Orchestrator, Result};
use tokio_util::sync::CancellationToken;

pub async fn run_migrate(
    orchestrator: &Orchestrator,
    environment: &str,
    target: Option<String>,
    cancel: &CancellationToken,
) -> Result<()> {
    let runner = orchestrator.migration_runner(environment).await?;
    let outcome = runner.migrate(target.as_deref(), cancel).await?;

    if outcome.applied_versions.is_empty() {
        println!("No pending migrations");
    } else {
        for version in &outcome.applied_versions {
            println!("Applied {}", version);
        }
        println!("{} migration(s) applied", outcome.applied_versions.len());
    }
    Ok(())
}

pub async fn run_rollback(
    orchestrator: &Orchestrator,
    environment: &str,
    target: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let runner = orchestrator.migration_runner(environment).await?;
    let outcome = runner.rollback(target, cancel).await?;

    if outcome.rolled_back.is_empty() {
        println!("Already at version {} or earlier", target);
    } else {
        for version in &outcome.rolled_back {
            println!("Rolled back {}", version);
        }
        println!("{} migration(s) rolled back", outcome.rolled_back.len());
    }
    Ok(())
}

pub async fn run_verify(orchestrator: &Orchestrator, environment: &str, json: bool) -> Result<()> {
    let runner = orchestrator.migration_runner(environment).await?;
    let issues = runner.verify().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&issues)?);
    } else if issues.is_empty() {
        println!("All applied migrations match their files");
    } else {
        for issue in &issues {
            println!("[{}] {} — {}", issue.severity, issue.kind, issue.description);
        }
    }

    // Drift is a failure for scripting purposes (exit code 5)
    if let Some(issue) = issues.first() {
        return Err(Error::ChecksumMismatch {
            version: issue.version.clone().unwrap_or_else(|| "unknown".to_string()),
        });
    }
    Ok(())
}
