use poststack::config::Parser as ConfigParser;
use poststack::{MigrationStore, Result};
use std::path::PathBuf;

pub fn run_validate(config_path: Option<PathBuf>) -> Result<()> {
    let parser = ConfigParser::new();
    let config_path = match config_path {
        Some(path) => path,
        None => match parser.find_config_file() {
            Ok(path) => path,
            Err(e) => {
                eprintln!("Error: No project file found");
                eprintln!("\nSearched for .poststack.yaml in the current directory and parents");
                eprintln!("\nHint: Run 'poststack init' to create a starter project file");
                return Err(e);
            }
        },
    };

    println!("Validating {}...", config_path.display());

    let config = parser.load_config(&config_path)?;
    let base_dir = config_path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    config.validate(&base_dir)?;

    println!("Project file is valid\n");
    println!("Project: {}", config.project.name);
    println!("Current environment: {}", config.environment);
    println!("Environments: {}", config.environment_names().join(", "));

    // Discovery doubles as migration-set validation (duplicates are fatal)
    let migrations_dir = base_dir.join(&config.migrations);
    let store = MigrationStore::discover(&migrations_dir)?;
    println!(
        "Migrations: {} in {}",
        store.migrations().len(),
        migrations_dir.display()
    );
    for migration in store.migrations() {
        let rollback = if migration.rollback_sql.is_some() {
            ""
        } else {
            " (no rollback)"
        };
        println!("  - {} {}{}", migration.version, migration.description, rollback);
    }

    Ok(())
}
