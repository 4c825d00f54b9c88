use crate::engine::EpidemicEngine;
use crate::error::EngineError;
use crate::streams::Broadcaster;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use epidemic_common::{EpochAssumption, FinishCondition, PopulationSnapshot, SimulationConfig};
use log::{error, info, warn};
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Why an epoch loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// `stop()` was called.
    Stopped,
    FinishConditionMet(FinishCondition),
    /// No Sick agents were left.
    PopulationRecovered,
    /// `run.max_epochs` epochs were emitted.
    EpochLimit,
    /// The epoch loop panicked, carrying the panic message.
    Aborted(String),
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    /// Number of epochs published to listeners.
    pub epochs: u64,
    pub reason: StopReason,
    pub final_assumption: Option<EpochAssumption>,
}

impl RunOutcome {
    pub fn is_aborted(&self) -> bool {
        matches!(self.reason, StopReason::Aborted(_))
    }
}

/// Progress of a run as seen by its stop handles.
#[derive(Default)]
struct RunState {
    stopped: bool,
    epochs: u64,
    last_published: Option<EpochAssumption>,
}

/// State shared by a run's loop and its stop handles.
///
/// The loop publishes while holding `state`, so once `stop` has set the flag no
/// further epoch can be delivered.
struct RunSignal {
    state: Mutex<RunState>,
    wake: Sender<()>,
}

impl RunSignal {
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Requests a run to stop from any thread.
#[derive(Clone)]
pub struct StopHandle {
    signal: Arc<RunSignal>,
}

impl StopHandle {
    /// Idempotent. No epoch is published after this returns; the loop thread itself may
    /// still be finishing its current epoch.
    pub fn stop(&self) {
        self.signal.lock().stopped = true;
        let _ = self.signal.wake.try_send(());
    }

    pub fn is_stopped(&self) -> bool {
        self.signal.lock().stopped
    }
}

struct ActiveRun {
    stop: StopHandle,
    handle: JoinHandle<RunOutcome>,
}

/// Drives one engine per run on a background thread and fans its output out to listeners.
///
/// Population snapshots and assumptions are published as two independent streams, each
/// once per epoch and in epoch order. Subscriptions outlive individual runs.
pub struct SimulationController {
    population: Broadcaster<PopulationSnapshot>,
    assumptions: Broadcaster<EpochAssumption>,
    run: Option<ActiveRun>,
    last_outcome: Option<RunOutcome>,
}

impl Default for SimulationController {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationController {
    pub fn new() -> Self {
        SimulationController {
            population: Broadcaster::new(),
            assumptions: Broadcaster::new(),
            run: None,
            last_outcome: None,
        }
    }

    pub fn subscribe_population(&self) -> Receiver<PopulationSnapshot> {
        self.population.subscribe()
    }

    pub fn subscribe_assumptions(&self) -> Receiver<EpochAssumption> {
        self.assumptions.subscribe()
    }

    /// Initializes a fresh engine from `config` and starts its epoch loop.
    ///
    /// Fails with `AlreadyRunning` while a run is active and with `InvalidConfig` before any
    /// state is created.
    pub fn start(&mut self, config: SimulationConfig) -> Result<(), EngineError> {
        if self.is_running() {
            warn!("Start requested while a simulation is running; ignoring.");
            return Err(EngineError::AlreadyRunning);
        }
        // A run that ended on its own is joined before its successor starts.
        self.reap();

        let engine = EpidemicEngine::initialize(config)?;
        self.last_outcome = None;
        let (wake_tx, wake_rx) = bounded(1);
        let stop = StopHandle {
            signal: Arc::new(RunSignal {
                state: Mutex::new(RunState::default()),
                wake: wake_tx,
            }),
        };

        let epoch_loop = EpochLoop {
            engine,
            stop: stop.clone(),
            wake: wake_rx,
            population: self.population.clone(),
            assumptions: self.assumptions.clone(),
        };
        let handle = thread::Builder::new()
            .name("epidemic-epoch-loop".to_string())
            .spawn(move || epoch_loop.run())
            .map_err(|e| EngineError::Spawn(e.to_string()))?;

        info!("Simulation started.");
        self.run = Some(ActiveRun { stop, handle });
        Ok(())
    }

    /// Halts the epoch loop and waits for it to exit. Idempotent and never fails.
    pub fn stop(&mut self) {
        if let Some(run) = &self.run {
            run.stop.stop();
        }
        self.reap();
    }

    /// Blocks until the current run ends on its own (finish condition, recovery or epoch
    /// limit) and returns its outcome. Returns the previous outcome if nothing is running.
    /// A panicked loop yields an outcome with `StopReason::Aborted`.
    pub fn wait(&mut self) -> Option<RunOutcome> {
        self.reap();
        self.last_outcome.clone()
    }

    /// A handle that can stop the current run from another thread.
    pub fn stop_handle(&self) -> Option<StopHandle> {
        self.run.as_ref().map(|run| run.stop.clone())
    }

    pub fn is_running(&self) -> bool {
        self.run
            .as_ref()
            .is_some_and(|run| !run.handle.is_finished())
    }

    /// Outcome of the last reaped run; `None` while a newer run is active.
    pub fn last_outcome(&self) -> Option<&RunOutcome> {
        self.last_outcome.as_ref()
    }

    fn reap(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };
        let outcome = match run.handle.join() {
            Ok(outcome) => {
                info!(
                    "Simulation ended after {} epochs: {:?}",
                    outcome.epochs, outcome.reason
                );
                outcome
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                let state = run.stop.signal.lock();
                error!(
                    "Epoch loop panicked after {} epochs; the run was aborted: {}",
                    state.epochs, message
                );
                RunOutcome {
                    epochs: state.epochs,
                    reason: StopReason::Aborted(message),
                    final_assumption: state.last_published,
                }
            }
        };
        self.last_outcome = Some(outcome);
    }
}

impl Drop for SimulationController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// State moved onto the loop thread.
struct EpochLoop {
    engine: EpidemicEngine,
    stop: StopHandle,
    wake: Receiver<()>,
    population: Broadcaster<PopulationSnapshot>,
    assumptions: Broadcaster<EpochAssumption>,
}

impl EpochLoop {
    fn run(mut self) -> RunOutcome {
        let run_config = self.engine.config().run.clone();
        let finish = self.engine.config().finish.clone();
        let interval = Duration::from_millis(run_config.epoch_interval_ms);
        let mut epochs = 0;
        let mut final_assumption = None;

        let reason = loop {
            if self.stop.is_stopped() {
                break StopReason::Stopped;
            }
            let (snapshot, assumption) = self.engine.advance_epoch();
            {
                let mut state = self.stop.signal.lock();
                if state.stopped {
                    break StopReason::Stopped;
                }
                self.population.publish(snapshot);
                self.assumptions.publish(assumption);
                state.epochs += 1;
                state.last_published = Some(assumption);
            }
            epochs += 1;
            final_assumption = Some(assumption);

            if let Some(condition) = finish.as_ref().filter(|c| c.is_met(&assumption)) {
                info!(
                    "Finish condition met at epoch {}: {:?} reached {:.1}%.",
                    assumption.epoch,
                    condition.condition,
                    assumption.percentage(condition.condition)
                );
                break StopReason::FinishConditionMet(condition.clone());
            }
            if assumption.sick == 0 {
                info!("No more infected cases, population has recovered totally.");
                break StopReason::PopulationRecovered;
            }
            if run_config.max_epochs.is_some_and(|max| epochs >= max) {
                break StopReason::EpochLimit;
            }

            match self.wake.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break StopReason::Stopped,
            }
        };

        RunOutcome {
            epochs,
            reason,
            final_assumption,
        }
    }
}
