//! Flexlink Sim - steps a demo scene through the bridge
//!
//! A block of fluid, a cloth patch and a rigid crate fall under gravity onto
//! a ramp and a ball, stepped on the in-memory solver device.

mod scene;

use tracing::{info, warn, Level};

use flexlink_bridge::{DeviceRegistry, StepOrchestrator, StepReport};
use flexlink_core::config::FlexlinkConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Container capacity when FLEXLINK_MAX_PARTICLES is not set
const DEMO_CAPACITY: usize = 16_384;

const DEFAULT_FRAMES: u32 = 120;
const FRAME_DT: f32 = 1.0 / 24.0;

fn max_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn load_config() -> Result<FlexlinkConfig, Box<dyn std::error::Error>> {
    if let Ok(path) = std::env::var("FLEXLINK_CONFIG") {
        return Ok(FlexlinkConfig::load(&path)?);
    }
    let mut config = FlexlinkConfig::from_env();
    if std::env::var("FLEXLINK_MAX_PARTICLES").is_err() {
        config.container.max_particles = DEMO_CAPACITY;
    }
    Ok(config)
}

fn print_frame(frame: u32, report: &StepReport) {
    for (key, r) in &report.completed {
        println!(
            "  frame {:>4} │ {:<6} │ active {:>5} │ springs {:>4} │ tris {:>4} │ rigids {:>2} │ shapes {}",
            frame, key, r.active, r.constraints.springs, r.constraints.triangles, r.constraints.rigids, r.collisions
        );
    }
    for (key, err) in &report.skipped {
        println!("  frame {:>4} │ {:<6} │ skipped: {}", frame, key, err);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;

    tracing_subscriber::fmt()
        .with_max_level(max_level(config.log.verbosity))
        .init();

    let frames: u32 = std::env::var("FLEXLINK_FRAMES")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_FRAMES);

    println!();
    println!("╔═══════════════════════════════════════════════════════╗");
    println!("║          FLEXLINK SIM v{}                          ║", VERSION);
    println!("║     Host geometry ⇄ particle solver bridge demo       ║");
    println!("╚═══════════════════════════════════════════════════════╝");
    println!();

    let registry = DeviceRegistry::global();
    let orchestrator = StepOrchestrator::new(config.solver.clone())?;
    let mut rng = rand::thread_rng();
    let mut objects = scene::build(&registry, &config, &mut rng)?;

    info!(
        objects = objects.len(),
        capacity = config.container.max_particles,
        frames,
        "🎬 Scene ready"
    );

    let mut skipped = 0usize;
    for frame in 0..frames {
        let report = orchestrator.step_objects(&mut objects, FRAME_DT);
        skipped += report.skipped.len();
        if frame % 24 == 0 || frame + 1 == frames {
            print_frame(frame, &report);
        }
    }

    println!();
    for object in &objects {
        let geo = object.geometry.read();
        let count = geo.point_count().max(1) as f32;
        let height = geo.positions().iter().map(|p| p[1]).sum::<f32>() / count;
        println!("  {:<6} │ {:>5} points │ mean height {:>7.3}", object.key, geo.point_count(), height);
    }

    if skipped > 0 {
        warn!(skipped, "⚠️ Some object steps were skipped");
    }
    info!(frames, "✅ Simulation finished");
    Ok(())
}
