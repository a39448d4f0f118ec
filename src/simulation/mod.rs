#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{error, info, warn};
use mpb::MPB;
use rand::rngs::OsRng;
use rand_chacha::ChaChaRng;
use rand_core::{RngCore, SeedableRng};

use paxos::clock::SystemClock;
use paxos::node::{Decision, Participant};

use crate::config::SimulationConfig;
use crate::error::SimulationError;
use crate::network::{Network, ParticipantId};
use crate::runner::Runner;
use crate::signal::{ConsensusSignal, SimulationState};

/// How a simulation run ended.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Decided {
        decision: Decision<ParticipantId>,
        elapsed: Duration,
    },
    TimedOut {
        elapsed: Duration,
    },
}

/// A run of one participant thread per configured participant, until the first decision.
pub struct Simulation {
    config: SimulationConfig,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        Simulation { config }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Starts every participant, waits for consensus (or the configured run limit), then stops and joins them all.
    pub fn run(&self) -> Result<Outcome, SimulationError> {
        let config = self.config.clone().validate()?;
        let bus = MPB::new().map_err(SimulationError::Spawn)?;
        let coordinator = bus.receiver();
        let signal = Arc::new(ConsensusSignal::new(bus.sender()));
        let (network, mailboxes) = Network::new(config.participant_count);
        let network = Arc::new(network);

        let seed = config.seed.unwrap_or_else(|| OsRng.next_u64());
        info!(
            "starting {} participants with seed {}, retry interval {}ms",
            config.participant_count, seed, config.retry_interval_ms
        );

        let started = Instant::now();
        let mut handles = Vec::with_capacity(config.participant_count);
        for (index, mailbox) in mailboxes.into_iter().enumerate() {
            let id = ParticipantId(index);
            let participant = Participant::new(
                id,
                network.participants(),
                ChaChaRng::seed_from_u64(seed.wrapping_add(index as u64)),
                SystemClock,
                config.engine_config(),
            );
            let runner = Runner::new(
                participant,
                network.clone(),
                mailbox,
                bus.receiver(),
                signal.clone(),
            );

            match thread::Builder::new()
                .name(id.to_string())
                .spawn(move || runner.run())
            {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    error!("could not spawn {}: {}", id, err);
                    let _ = bus.sender().send(SimulationState::Stop);
                    let _ = join_all(handles);
                    return Err(SimulationError::Spawn(err));
                }
            }
        }

        let outcome = wait_for_consensus(&coordinator, config.max_run, started);
        match &outcome {
            Ok(Outcome::Decided { decision, elapsed }) => {
                info!("{} (simulation ran for {}ms)", decision, elapsed.as_millis())
            }
            Ok(Outcome::TimedOut { elapsed }) => {
                warn!("no consensus after {}ms", elapsed.as_millis())
            }
            Err(err) => error!("{}, stopping the simulation", err),
        }

        let _ = bus.sender().send(SimulationState::Stop);
        join_all(handles)?;
        outcome
    }
}

impl Outcome {
    pub fn decision(&self) -> Option<&Decision<ParticipantId>> {
        match self {
            Outcome::Decided { decision, .. } => Some(decision),
            Outcome::TimedOut { .. } => None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            Outcome::Decided { elapsed, .. } | Outcome::TimedOut { elapsed } => *elapsed,
        }
    }
}

/// Waits for the first decision, the run limit, or a participant that failed.
fn wait_for_consensus(
    coordinator: &Receiver<SimulationState>,
    max_run: Option<Duration>,
    started: Instant,
) -> Result<Outcome, SimulationError> {
    loop {
        let state = match max_run {
            Some(max_run) => coordinator.recv_deadline(started + max_run),
            None => coordinator
                .recv()
                .map_err(|_| RecvTimeoutError::Disconnected),
        };

        match state {
            Ok(SimulationState::ConsensusReached(decision)) => {
                return Ok(Outcome::Decided {
                    decision,
                    elapsed: started.elapsed(),
                })
            }
            Ok(SimulationState::ParticipantFailed(id)) => {
                return Err(SimulationError::ParticipantPanicked(id.to_string()))
            }
            Ok(SimulationState::Stop) => continue,
            Err(_) => {
                return Ok(Outcome::TimedOut {
                    elapsed: started.elapsed(),
                })
            }
        }
    }
}

/// Joins every handle, reporting the first participant that panicked.
fn join_all(handles: Vec<JoinHandle<()>>) -> Result<(), SimulationError> {
    let mut result = Ok(());
    for handle in handles {
        let name = handle.thread().name().unwrap_or("participant").to_string();
        if handle.join().is_err() {
            error!("{} panicked", name);
            if result.is_ok() {
                result = Err(SimulationError::ParticipantPanicked(name));
            }
        }
    }
    result
}
