use poststack::{Orchestrator, Result};

pub async fn run_stop(orchestrator: &Orchestrator, environment: &str, remove: bool) -> Result<()> {
    orchestrator.stop(environment, remove).await?;
    if remove {
        println!(
            "Environment '{}' stopped and containers removed (data volume kept)",
            environment
        );
    } else {
        println!("Environment '{}' stopped (containers kept)", environment);
    }
    Ok(())
}
