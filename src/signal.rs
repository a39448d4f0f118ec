use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::Sender;
use log::{debug, error, info};

use paxos::node::Decision;

use crate::network::ParticipantId;

/// Lifecycle events published on the simulation bus.
#[derive(Clone, Debug, PartialEq)]
pub enum SimulationState {
    ConsensusReached(Decision<ParticipantId>),
    // A participant thread unwound and will answer no more messages
    ParticipantFailed(ParticipantId),
    Stop,
}

/// The write-once termination hook shared by every participant thread.
///
/// Only the first decision is published; the run is over once any participant decided.
pub struct ConsensusSignal {
    reached: AtomicBool,
    bus: Sender<SimulationState>,
}

impl ConsensusSignal {
    pub fn new(bus: Sender<SimulationState>) -> Self {
        ConsensusSignal {
            reached: AtomicBool::new(false),
            bus,
        }
    }

    /// Publishes `decision` if no decision was published before. Returns whether it was.
    ///
    /// The first decision ends the run even when the bus is gone; later ones are dropped either way.
    pub fn on_consensus_reached(&self, decision: Decision<ParticipantId>) -> bool {
        if self
            .reached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("consensus already reached, dropping decision of {}", decision.proposer);
            return false;
        }

        info!("consensus reached by {}, stopping the simulation", decision.proposer);
        let proposer = decision.proposer;
        match self.bus.send(SimulationState::ConsensusReached(decision)) {
            Ok(()) => true,
            Err(_) => {
                error!("lifecycle bus closed, decision of {} not published", proposer);
                false
            }
        }
    }

    /// Tells the coordinator that `id` stopped unexpectedly.
    pub fn on_participant_failed(&self, id: ParticipantId) {
        error!("{} failed, stopping the simulation", id);
        if self.bus.send(SimulationState::ParticipantFailed(id)).is_err() {
            error!("lifecycle bus closed, failure of {} not published", id);
        }
    }

    pub fn is_reached(&self) -> bool {
        self.reached.load(Ordering::Acquire)
    }
}
