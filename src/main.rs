use simulation::{run_simulation, simulation_scaling, SimulationConfig, SimulationError};
use tracing_subscriber::EnvFilter;
pub mod simulation;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main())?;
    Ok(())
}

async fn async_main() -> Result<(), SimulationError> {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            REPLICATION SIMULATIONS                         ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Run 1: small scale, one domain hidden from the external changelog
    let stats = run_simulation(SimulationConfig::default()).await?;
    stats.print();

    // Run 2: medium scale
    let stats = run_simulation(SimulationConfig {
        num_replicas: 10,
        num_domains: 5,
        changes_per_replica: 1000,
        ecl_enabled_domains: 4,
        ..SimulationConfig::default()
    })
    .await?;
    stats.print();

    // Run 3: scaling analysis
    simulation_scaling(20, 4).await?;

    println!("\n✓ All simulations completed successfully!");
    Ok(())
}
