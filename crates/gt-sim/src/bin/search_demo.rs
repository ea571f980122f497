use anyhow::{Context, Result};
use tracing::info;

use gt_search::SearchTree;
use gt_sim::{Scenario, FR_BE_CONGESTION};

fn main() -> Result<()> {
    // RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let scenario = match std::env::args().nth(1) {
        Some(path) => Scenario::from_json_file(&path)
            .with_context(|| format!("Failed to load scenario from {path}"))?,
        None => {
            info!("No scenario given, running the bundled fr-be-congestion scenario");
            Scenario::from_json_str(FR_BE_CONGESTION).context("Bundled scenario is invalid")?
        }
    };
    if let Some(description) = &scenario.description {
        info!("{}: {}", scenario.name, description);
    }

    let run = scenario.build()?;
    let model = run.model.clone();
    let result = SearchTree::new(run.input, run.parameters)?
        .run()
        .context("Search tree failed")?;

    let stats = model.stats();
    info!(
        computations = stats.computations,
        failures = stats.failures,
        "Search finished in {} ms",
        result.duration().num_milliseconds()
    );
    println!("{}", result.to_json()?);
    Ok(())
}
