use poststack::migrate::RepairOutcome;
use poststack::{DiagnosticIssue, Error, IssueKind, Orchestrator, Result};

pub async fn run_diagnose(
    orchestrator: &Orchestrator,
    environment: &str,
    json: bool,
) -> Result<()> {
    let diagnostics = orchestrator.diagnostics(environment).await?;
    let issues = diagnostics.diagnose().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&issues)?);
        return Ok(());
    }

    if issues.is_empty() {
        println!("No issues found");
        return Ok(());
    }

    println!("Found {} issue(s):\n", issues.len());
    for issue in &issues {
        print_issue(issue);
    }
    Ok(())
}

fn print_issue(issue: &DiagnosticIssue) {
    let fixable = if issue.auto_fixable { " (auto-fixable)" } else { "" };
    println!(
        "[{:<8}] {}{}{}",
        issue.severity.to_string(),
        issue.kind,
        issue
            .version
            .as_ref()
            .map(|v| format!(" @ {}", v))
            .unwrap_or_default(),
        fixable
    );
    println!("           {}", issue.description);
    println!("           fix: {}\n", issue.suggested_fix);
}

pub async fn run_repair(
    orchestrator: &Orchestrator,
    environment: &str,
    kinds: &[String],
    force: bool,
    dry_run: bool,
) -> Result<()> {
    // Reject unknown kind names before touching the database
    let mut wanted = Vec::new();
    for name in kinds {
        match IssueKind::parse(name) {
            Some(kind) => wanted.push(kind),
            None => {
                return Err(Error::Validation(format!(
                    "unknown issue kind '{}'",
                    name
                )))
            }
        }
    }

    let diagnostics = orchestrator.diagnostics(environment).await?;
    let mut issues = diagnostics.diagnose().await?;
    if !wanted.is_empty() {
        issues.retain(|issue| wanted.contains(&issue.kind));
    }

    if issues.is_empty() {
        println!("Nothing to repair");
        return Ok(());
    }

    let outcome = diagnostics.repair(&issues, force, dry_run).await?;
    print_outcome(&outcome);
    Ok(())
}

pub async fn run_recover(
    orchestrator: &Orchestrator,
    environment: &str,
    dry_run: bool,
) -> Result<()> {
    let diagnostics = orchestrator.diagnostics(environment).await?;
    let outcome = diagnostics.recover(dry_run).await?;

    if outcome.actions.is_empty() {
        println!("No untracked applied migrations found");
        return Ok(());
    }
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &RepairOutcome) {
    if outcome.dry_run {
        println!("Planned actions (dry run, nothing changed):");
        for action in &outcome.actions {
            println!("  - {}", action);
        }
    } else {
        for action in &outcome.actions {
            println!("Fixed: {}", action);
        }
        println!("{} issue(s) fixed", outcome.fixed.len());
    }

    if !outcome.remaining.is_empty() {
        println!("\n{} issue(s) need manual attention:", outcome.remaining.len());
        for issue in &outcome.remaining {
            println!("  - [{}] {}", issue.kind, issue.description);
        }
    }
}

pub async fn run_clear_locks(orchestrator: &Orchestrator, environment: &str) -> Result<()> {
    orchestrator.clear_locks(environment).await?;
    println!("Migration lock cleared for '{}'", environment);
    Ok(())
}
