//! Higher-level API for a Paxos participant.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

use rand_core::RngCore;

use crate::acceptor::AcceptorState;
use crate::clock::Clock;
use crate::core::State;
use crate::message::{ProposalNumber, ProposalValue, SendableMessage};
use crate::proposer::Campaign;

/// A single-decree Paxos participant, acting both as proposer and acceptor.
///
/// # Rounds
///
/// A participant starts its first prepare round after a short random jitter, then checks on a fixed tick whether its
/// live round has stalled for longer than [`retry_interval`]. A stalled round is abandoned and a new one is started
/// under a higher proposal number. Without a retry interval, a participant only ever runs one round.
///
/// Once a prepare quorum answered (see [`majority`]), the participant broadcasts an accept request. When every other
/// participant has consented, the participant has decided and [`take_decision`] returns the decision. A decided
/// participant stops its timer.
///
/// # Timer ticks
///
/// The participant does not own a timer. The caller asks for [`timer_deadline`] and calls [`timer_tick`] once it has
/// passed according to the participant's [`Clock`].
///
/// # Message delivery
///
/// Messages returned from [`receive`], [`timer_tick`] and [`start_prepare_round`] are to be delivered reliably and in
/// order between any pair of participants. [`MessageDestination::Broadcast`] means every participant but the sender.
/// Prepare responses carry a [`delay`] the transport should wait before delivering them.
///
/// [`delay`]: crate::message::SendableMessage::delay
/// [`majority`]: crate::proposer::majority
/// [`MessageDestination::Broadcast`]: crate::message::MessageDestination::Broadcast
/// [`receive`]: Self::receive
/// [`retry_interval`]: Config::retry_interval
/// [`start_prepare_round`]: Self::start_prepare_round
/// [`take_decision`]: Self::take_decision
/// [`timer_deadline`]: Self::timer_deadline
/// [`timer_tick`]: Self::timer_tick
pub struct Participant<Random, C, NodeId> {
    state: State<Random, C, NodeId>,
}

/// Configurable parameters of a participant. Every participant of a group must use the same configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The number of participants in the group, including this one.
    pub participant_count: usize,

    /// The minimum time since the last prepare request after which a tick starts a new round. `None` or zero disables
    /// new rounds after the first.
    pub retry_interval: Option<Duration>,

    /// The time between periodic ticks.
    pub tick_interval: Duration,

    /// The unit of the random first-tick jitter and of the prepare response delay.
    pub delay_step: Duration,

    /// The first round starts between one and this many delay steps after creation.
    pub first_tick_steps: u32,

    /// Prepare responses are delayed by one to this many delay steps. Zero disables the delay.
    pub prepare_delay_steps: u32,
}

/// The outcome of a campaign that every other participant accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision<NodeId> {
    /// The participant whose campaign decided.
    pub proposer: NodeId,

    pub proposal: ProposalNumber,

    pub value: ProposalValue,

    /// Time between the proposer's creation and the decision.
    pub elapsed: Duration,

    /// The number of prepare rounds the proposer started.
    pub prepare_attempts: u32,
}

impl<Random, C, NodeId> Participant<Random, C, NodeId>
where
    Random: RngCore,
    C: Clock,
    NodeId: Ord + Clone + fmt::Display,
{
    /// Constructs a participant named `node_id` amongst `peers`.
    ///
    /// `peers` may contain `node_id` or omit it to the same effect. `random` must produce different values on every
    /// participant of a group, or their first rounds will collide.
    pub fn new(
        node_id: NodeId,
        peers: BTreeSet<NodeId>,
        random: Random,
        clock: C,
        config: Config,
    ) -> Self {
        Self {
            state: State::new(node_id, peers, random, clock, config),
        }
    }

    pub fn acceptor(&self) -> &AcceptorState {
        self.state.acceptor()
    }

    pub fn campaign(&self) -> &Campaign {
        self.state.campaign()
    }

    pub fn config(&self) -> &Config {
        self.state.config()
    }

    /// Returns the decision of this participant's campaign, if it decided.
    pub fn decision(&self) -> Option<&Decision<NodeId>> {
        self.state.decision()
    }

    pub fn is_decided(&self) -> bool {
        self.state.decision().is_some()
    }

    pub fn node_id(&self) -> &NodeId {
        self.state.node_id()
    }

    pub fn peers(&self) -> &BTreeSet<NodeId> {
        self.state.peers()
    }

    /// Processes receipt of `message` from the participant `from`, returning messages to be sent.
    ///
    /// # Panics
    ///
    /// Panics if `message` is a prepare response whose accepted proposal lies above its promise; such a response can
    /// only come from a broken acceptor.
    #[must_use = "This function returns Paxos messages to be sent."]
    pub fn receive(
        &mut self,
        message: crate::message::Message,
        from: NodeId,
    ) -> impl Iterator<Item = SendableMessage<NodeId>> {
        self.state.receive(message, from).into_iter()
    }

    /// Starts a new prepare round right away, abandoning the live one, returning messages to be sent.
    #[must_use = "This function returns Paxos messages to be sent."]
    pub fn start_prepare_round(&mut self) -> impl Iterator<Item = SendableMessage<NodeId>> {
        self.state.start_prepare_round().into_iter()
    }

    /// Returns a reference to the low-level state of the participant.
    pub fn state(&self) -> &State<Random, C, NodeId> {
        &self.state
    }

    /// Returns a mutable reference to the low-level state of the participant.
    pub fn state_mut(&mut self) -> &mut State<Random, C, NodeId> {
        &mut self.state
    }

    /// Returns the decision once, the first time it is asked for after this participant decided.
    pub fn take_decision(&mut self) -> Option<Decision<NodeId>> {
        self.state.take_decision()
    }

    /// The instant at which [`timer_tick`](Self::timer_tick) should next be called, or `None` once decided.
    pub fn timer_deadline(&self) -> Option<Instant> {
        self.state.timer_deadline()
    }

    /// Fires the pending timer event if its deadline has passed, returning messages to be sent.
    #[must_use = "This function returns Paxos messages to be sent."]
    pub fn timer_tick(&mut self) -> impl Iterator<Item = SendableMessage<NodeId>> {
        self.state.timer_tick().into_iter()
    }
}

impl Config {
    pub fn new(participant_count: usize) -> Self {
        Self {
            participant_count,
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            participant_count: 5,
            retry_interval: None,
            tick_interval: Duration::from_secs(1),
            delay_step: Duration::from_millis(100),
            first_tick_steps: 9,
            prepare_delay_steps: 10,
        }
    }
}

impl<NodeId: fmt::Display> fmt::Display for Decision<NodeId> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "consensus reached in {} milliseconds for proposal from {}: {} with {} after {} prepare attempts",
            self.elapsed.as_millis(),
            self.proposer,
            self.proposal,
            self.value,
            self.prepare_attempts
        )
    }
}
