use poststack::{Error, Result};

const CONFIG_FILE: &str = ".poststack.yaml";

/// Write a starter project file into the current directory.
pub fn run_init(name: Option<String>, force: bool) -> Result<()> {
    let current_dir = std::env::current_dir()?;
    let path = current_dir.join(CONFIG_FILE);

    if path.exists() && !force {
        return Err(Error::Config(format!(
            "'{}' already exists (use --force to overwrite)",
            path.display()
        )));
    }

    let project_name = match name {
        Some(name) => name,
        None => current_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("myproject")
            .replace('.', "-"),
    };

    std::fs::write(&path, starter_config(&project_name))?;
    println!("Created {}", path.display());
    println!();
    println!("Next steps:");
    println!("  1. Put migrations in ./migrations (001_initial.sql, ...)");
    println!("  2. Point deployment at your compose or pod manifest");
    println!("  3. Run: poststack start");
    Ok(())
}

fn starter_config(project_name: &str) -> String {
    format!(
        r#"environment: dev

project:
  name: {name}
  description: {name} managed by poststack

environments:
  dev:
    postgres:
      database: {name}_dev
      port: 5433
      user: {name}
      password: auto_generated
    deployment:
      compose: deploy/dev-compose.yml
    variables:
      LOG_LEVEL: debug
"#,
        name = sanitize(project_name)
    )
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Used by tests to render the starter without touching the filesystem.
#[cfg(test)]
pub fn starter_for(name: &str) -> String {
    starter_config(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use poststack::config::Parser;

    #[test]
    fn starter_config_parses_and_validates_shape() {
        let yaml = starter_for("demo");
        let parser = Parser::new();
        let config = parser.parse_config(&yaml).unwrap();
        assert_eq!(config.environment, "dev");
        assert_eq!(config.project.name, "demo");
        assert!(config.environments["dev"].postgres.wants_generated_password());
    }

    #[test]
    fn sanitize_makes_identifiers() {
        assert_eq!(sanitize("My App!"), "my_app_");
        assert_eq!(sanitize("ok-name_2"), "ok-name_2");
    }
}
