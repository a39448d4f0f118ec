//! The event loop of one participant thread.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{after, never, select, Receiver, RecvTimeoutError};
use log::{debug, info};
use rand_chacha::ChaChaRng;

use paxos::clock::SystemClock;
use paxos::message::SendableMessage;
use paxos::node::Participant;

use crate::network::{Envelope, Network, ParticipantId};
use crate::signal::{ConsensusSignal, SimulationState};

pub type SimulatedParticipant = Participant<ChaChaRng, SystemClock, ParticipantId>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Drives one participant: delivers its mailbox, fires its timer and routes what it sends, until the simulation stops.
///
/// A participant only ever runs on its own thread, so its state needs no locking.
pub struct Runner {
    participant: SimulatedParticipant,
    network: Arc<Network>,
    mailbox: Receiver<Envelope>,
    lifecycle: Receiver<SimulationState>,
    signal: Arc<ConsensusSignal>,
}

impl Runner {
    pub fn new(
        participant: SimulatedParticipant,
        network: Arc<Network>,
        mailbox: Receiver<Envelope>,
        lifecycle: Receiver<SimulationState>,
        signal: Arc<ConsensusSignal>,
    ) -> Self {
        Runner {
            participant,
            network,
            mailbox,
            lifecycle,
            signal,
        }
    }

    pub fn id(&self) -> ParticipantId {
        *self.participant.node_id()
    }

    pub fn run(mut self) {
        let id = self.id();
        let _guard = FailureGuard {
            id,
            signal: self.signal.clone(),
        };
        info!("{} started", id);

        loop {
            let timer = match self.participant.timer_deadline() {
                Some(deadline) => after(deadline.saturating_duration_since(Instant::now())),
                None => never(),
            };

            let flow = select! {
                recv(self.mailbox) -> envelope => match envelope {
                    Ok(Envelope { from, message }) => {
                        let messages: Vec<_> = self.participant.receive(message, from).collect();
                        self.dispatch(messages)
                    }
                    // every sender is gone along with the network
                    Err(_) => Flow::Stop,
                },
                recv(self.lifecycle) -> state => lifecycle_flow(state.ok()),
                recv(timer) -> _ => {
                    let messages: Vec<_> = self.participant.timer_tick().collect();
                    self.dispatch(messages)
                },
            };

            if let Some(decision) = self.participant.take_decision() {
                let _ = self.signal.on_consensus_reached(decision);
            }
            if flow == Flow::Stop {
                break;
            }
        }

        info!(
            "{} stopped after {} prepare attempts",
            id,
            self.participant.campaign().prepare_attempts()
        );
    }

    /// Routes `messages`, holding back each delayed one for its delay first.
    ///
    /// A stop received while holding a message back cuts every remaining delay short; the messages are still sent.
    fn dispatch(&self, messages: Vec<SendableMessage<ParticipantId>>) -> Flow {
        let mut flow = Flow::Continue;
        for sendable in messages {
            if flow == Flow::Continue && sendable.delay > Duration::default() {
                flow = self.hold(sendable.delay);
            }
            self.network.dispatch(self.id(), sendable);
        }
        flow
    }

    fn hold(&self, delay: Duration) -> Flow {
        let deadline = Instant::now() + delay;
        loop {
            match self.lifecycle.recv_deadline(deadline) {
                Ok(state) => {
                    if lifecycle_flow(Some(state)) == Flow::Stop {
                        debug!("{} interrupted while holding a response", self.id());
                        return Flow::Stop;
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Flow::Continue,
                Err(RecvTimeoutError::Disconnected) => return Flow::Stop,
            }
        }
    }
}

/// Reports the participant to the coordinator if its thread unwinds, e.g. on a malformed prepare response.
struct FailureGuard {
    id: ParticipantId,
    signal: Arc<ConsensusSignal>,
}

impl Drop for FailureGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.signal.on_participant_failed(self.id);
        }
    }
}

fn lifecycle_flow(state: Option<SimulationState>) -> Flow {
    match state {
        // the coordinator publishes the stop
        Some(SimulationState::ConsensusReached(_)) | Some(SimulationState::ParticipantFailed(_)) => {
            Flow::Continue
        }
        Some(SimulationState::Stop) | None => Flow::Stop,
    }
}
