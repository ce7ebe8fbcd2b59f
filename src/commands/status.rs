use poststack::{ContainerState, Orchestrator, Result};

pub async fn run_status(orchestrator: &Orchestrator, environment: &str, json: bool) -> Result<()> {
    let status = orchestrator.status(environment).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Project:     {}", status.project);
    println!("Environment: {}", status.environment);
    println!("Phase:       {}", status.phase);
    println!();

    let postgres_state = match &status.postgres.state {
        ContainerState::Running => "running".to_string(),
        ContainerState::Exited(code) => format!("exited ({})", code),
        ContainerState::Other(state) => state.clone(),
        ContainerState::Absent => "absent".to_string(),
    };
    println!("Postgres:    {} [{}]", status.postgres.container, postgres_state);

    match &status.migrations {
        Some(migrations) => {
            println!(
                "Migrations:  {} applied, {} pending (current: {})",
                migrations.applied.len(),
                migrations.pending.len(),
                migrations.current_version.as_deref().unwrap_or("none")
            );
            if migrations.is_locked {
                println!(
                    "             lock held by {}",
                    migrations.lock_holder.as_deref().unwrap_or("unknown")
                );
            }
        }
        None => println!("Migrations:  database not reachable"),
    }

    println!();
    if status.deployment.is_empty() {
        println!("Deployment:  no containers");
    } else {
        println!("Deployment:");
        for container in &status.deployment {
            let icon = if container.running { "+" } else { "o" };
            println!("  {} {:<36} {}", icon, container.name, container.status);
        }
    }

    Ok(())
}
