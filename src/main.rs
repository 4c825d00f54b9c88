use anyhow::{bail, Result};
use clap::Parser;
use crossbeam_channel::select;
use epidemic_common::{EpochAssumption, SimulationConfig};
use epidemic_engine::output::Recorder;
use epidemic_engine::{SimulationController, StopReason};
use log::{debug, info, trace};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Runs an epidemic simulation headless and records its epochs.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the TOML configuration
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override run.seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override run.max_epochs
    #[arg(long)]
    max_epochs: Option<u64>,

    /// Override run.epoch_interval_ms
    #[arg(long)]
    epoch_interval_ms: Option<u64>,
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();
    let args = Args::parse();

    info!("Starting Epidemic Engine...");

    // --- Load Configuration ---
    let mut config = SimulationConfig::load(&args.config)?;
    if let Some(seed) = args.seed {
        config.run.seed = seed;
    }
    if let Some(max_epochs) = args.max_epochs {
        config.run.max_epochs = Some(max_epochs);
    }
    if let Some(interval) = args.epoch_interval_ms {
        config.run.epoch_interval_ms = interval;
    }
    debug!("Simulation Parameters: {:#?}", config.get_sim_params());
    info!("Using {} Rayon threads.", rayon::current_num_threads());

    let output = config.output.clone();
    let mut recorder = Recorder::new(output.save_snapshots);

    // --- Start the epoch loop ---
    let mut controller = SimulationController::new();
    let population = controller.subscribe_population();
    let assumptions = controller.subscribe_assumptions();
    controller.start(config)?;

    let start_time = Instant::now();
    let mut previous_print_time = start_time;
    let print_interval = Duration::from_secs(5);

    while controller.is_running() {
        select! {
            recv(assumptions) -> msg => {
                if let Ok(assumption) = msg {
                    if previous_print_time.elapsed() >= print_interval {
                        log_progress(&assumption, start_time);
                        previous_print_time = Instant::now();
                    } else {
                        trace!("Epoch {} received", assumption.epoch);
                    }
                    recorder.record_assumption(assumption);
                }
            },
            recv(population) -> msg => {
                if let Ok(snapshot) = msg {
                    recorder.record_population(snapshot);
                }
            },
            default(Duration::from_millis(100)) => {}
        }
    }

    // The loop has exited; everything it published is already queued.
    population.try_iter().for_each(|snapshot| recorder.record_population(snapshot));
    assumptions.try_iter().for_each(|assumption| recorder.record_assumption(assumption));

    if let Some(outcome) = controller.wait() {
        if let StopReason::Aborted(message) = &outcome.reason {
            bail!(
                "Simulation aborted after {} epochs: {}",
                outcome.epochs,
                message
            );
        }
        info!(
            "Simulation finished after {} epochs ({:?}) in {:.3} seconds.",
            outcome.epochs,
            outcome.reason,
            start_time.elapsed().as_secs_f64()
        );
        if let Some(last) = outcome.final_assumption {
            log_progress(&last, start_time);
        }
    }

    // --- Save Recorded Data ---
    info!("Saving recorded data...");
    recorder.save(&output)?;

    info!("Simulation Complete.");
    Ok(())
}

fn log_progress(assumption: &EpochAssumption, start_time: Instant) {
    info!(
        "Epoch {} | Healthy: {} | Sick: {} | Immune: {} | Dead: {} | Elapsed: {:.2} s",
        assumption.epoch,
        assumption.healthy(),
        assumption.sick,
        assumption.immune,
        assumption.dead,
        start_time.elapsed().as_secs_f64()
    );
}
