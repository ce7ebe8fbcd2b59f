use poststack::{Orchestrator, Result, StartReport};

pub async fn run_start(orchestrator: &Orchestrator, environment: &str) -> Result<()> {
    println!("Starting environment '{}'...", environment);
    let report = orchestrator.start(environment).await?;
    print_report(environment, &report);
    Ok(())
}

pub async fn run_restart(orchestrator: &Orchestrator, environment: &str) -> Result<()> {
    println!("Restarting environment '{}'...", environment);
    let report = orchestrator.restart(environment).await?;
    print_report(environment, &report);
    Ok(())
}

fn print_report(environment: &str, report: &StartReport) {
    if report.already_up {
        println!("Environment '{}' is already up", environment);
        return;
    }

    if report.migrations_applied.is_empty() {
        println!("Migrations: up to date");
    } else {
        println!(
            "Migrations: applied {} ({})",
            report.migrations_applied.len(),
            report.migrations_applied.join(", ")
        );
    }
    if report.init_manifests_run > 0 {
        println!(
            "Init phase: {} manifest(s) completed",
            report.init_manifests_run
        );
    }
    println!("Environment '{}' is up", environment);
}
