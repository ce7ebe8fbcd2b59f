use poststack::{Orchestrator, Result};

/// Dry-run preview: show each manifest's resolved variables and any
/// undefined references, without touching the runtime.
pub async fn run_render(orchestrator: &Orchestrator, environment: &str) -> Result<()> {
    let previews = orchestrator.preview(environment)?;

    for (path, expansion) in &previews {
        println!("==> {}", path.display());
        if expansion.bindings.is_empty() {
            println!("  (no variables referenced)");
        }
        for binding in &expansion.bindings {
            println!(
                "  {}={} (source: {})",
                binding.name, binding.value, binding.source
            );
        }
        for name in &expansion.undefined {
            println!("  {} is UNDEFINED", name);
        }
        println!();
    }

    let undefined_total: usize = previews.iter().map(|(_, e)| e.undefined.len()).sum();
    if undefined_total > 0 {
        println!(
            "Warning: {} undefined variable reference(s); they will expand to the literal UNDEFINED",
            undefined_total
        );
    }
    Ok(())
}
