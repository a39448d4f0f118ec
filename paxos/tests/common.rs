#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::time::{Duration, Instant};

use rand_core::{RngCore, SeedableRng};

use paxos::clock::{Clock, ManualClock};
use paxos::core::State;
use paxos::message::*;
use paxos::node::{Config, Decision};
use rand_chacha::ChaChaRng;

const RANDOM_SEED: u64 = 0;
const MAX_STEPS: u32 = 10_000;

/// The simulated time between two steps of a [`TestGroup`]; equal to the default delay step so that every first tick
/// lands exactly on a step.
pub const STEP: Duration = Duration::from_millis(100);

pub type TestParticipant = State<ChaChaRng, ManualClock, NodeId>;

pub struct TestGroup {
    pub nodes: Vec<TestParticipant>,
    pub clock: ManualClock,
    pub start: Instant,
    pub config: TestGroupConfig,
    pub dropped_messages: Vec<(NodeId, SendableMessage<NodeId>)>,
    pub sent_messages: Vec<(NodeId, SendableMessage<NodeId>)>,
}

#[derive(Clone, Default)]
pub struct TestGroupConfig {
    pub drops: BTreeSet<(Option<NodeId>, Option<NodeId>)>,
    pub down: BTreeSet<NodeId>,
}

#[derive(
    Clone, Copy, Debug, derive_more::Display, Eq, derive_more::From, PartialEq, PartialOrd, Ord,
)]
#[display(fmt = "{:?}", self)]
pub struct NodeId(pub u64);

pub struct TestLogger;

pub struct TestLoggerContext {
    node_id: Option<NodeId>,
    elapsed: Option<Duration>,
}

pub fn init_random() -> ChaChaRng {
    ChaChaRng::seed_from_u64(RANDOM_SEED)
}

/// A configuration without prepare response delays, which the synchronous harness does not model.
pub fn config(participant_count: usize) -> Config {
    Config {
        participant_count,
        prepare_delay_steps: 0,
        ..Config::default()
    }
}

pub fn group_config() -> TestGroupConfig {
    TestGroupConfig::default()
}

pub fn pn(id: u64) -> ProposalNumber {
    ProposalNumber::new(id)
}

pub fn pv(id: u64) -> ProposalValue {
    ProposalValue::new(id)
}

pub fn participant(
    node_id: u64,
    participant_count: u64,
    clock: &ManualClock,
    config: Config,
    random: &mut impl RngCore,
) -> TestParticipant {
    TestLogger::init();
    State::new(
        NodeId(node_id),
        (0..participant_count).map(NodeId).collect(),
        ChaChaRng::seed_from_u64(random.next_u64()),
        clock.clone(),
        config,
    )
}

pub fn send(
    participant: &mut TestParticipant,
    from: u64,
    proposal: ProposalNumber,
    rpc: Rpc,
) -> Vec<SendableMessage<NodeId>> {
    participant.receive(Message { proposal, rpc }, NodeId(from))
}

pub fn prepare_request(proposal: ProposalNumber) -> Message {
    Message {
        proposal,
        rpc: Rpc::PrepareRequest(PrepareRequest),
    }
}

pub fn accept_request(proposal: ProposalNumber, value: ProposalValue) -> Message {
    Message {
        proposal,
        rpc: Rpc::AcceptRequest(AcceptRequest { value }),
    }
}

pub fn broadcast(message: Message) -> SendableMessage<NodeId> {
    SendableMessage {
        message,
        dest: MessageDestination::Broadcast,
        delay: Duration::default(),
    }
}

pub fn reply(to: u64, message: Message) -> SendableMessage<NodeId> {
    SendableMessage {
        message,
        dest: MessageDestination::To(NodeId(to)),
        delay: Duration::default(),
    }
}

/// Fires the first tick of `participant`, whatever its jitter was.
pub fn first_tick(participant: &mut TestParticipant) -> Vec<SendableMessage<NodeId>> {
    let deadline = participant.timer_deadline().expect("no pending timer");
    participant.clock().advance_to(deadline);
    participant.timer_tick()
}

/// Fires the due timers of `nodes` one node at a time, delivering everything each tick causes before moving on to the
/// next node. Prepare response delays are not modeled; every message is delivered at once, in order.
pub fn run_group(
    nodes: &mut [TestParticipant],
    initial_messages: impl IntoIterator<Item = (NodeId, SendableMessage<NodeId>)>,
    fire_timers: bool,
    config: &mut TestGroupConfig,
    dropped_messages: &mut Vec<(NodeId, SendableMessage<NodeId>)>,
    sent_messages: &mut Vec<(NodeId, SendableMessage<NodeId>)>,
) {
    deliver(
        nodes,
        initial_messages.into_iter().collect(),
        config,
        dropped_messages,
        sent_messages,
    );

    if fire_timers {
        for node_idx in 0..nodes.len() {
            // a decision ends the simulation
            if nodes.iter().any(|node| node.decision().is_some()) {
                break;
            }
            let node_id = *nodes[node_idx].node_id();
            if config.is_node_down(node_id) {
                continue;
            }
            TestLogger::set_node_id(Some(node_id));
            let messages = nodes[node_idx]
                .timer_tick()
                .into_iter()
                .map(|message| (node_id, message))
                .collect();
            deliver(nodes, messages, config, dropped_messages, sent_messages);
        }
    }
    TestLogger::set_node_id(None);
}

fn deliver(
    nodes: &mut [TestParticipant],
    mut messages: VecDeque<(NodeId, SendableMessage<NodeId>)>,
    config: &TestGroupConfig,
    dropped_messages: &mut Vec<(NodeId, SendableMessage<NodeId>)>,
    sent_messages: &mut Vec<(NodeId, SendableMessage<NodeId>)>,
) {
    while let Some((from, sendable)) = messages.pop_front() {
        sent_messages.push((from, sendable.clone()));
        let (reply_to_node_id, to_node_count) = match sendable.dest {
            MessageDestination::Broadcast => (None, nodes.len().saturating_sub(1)),
            MessageDestination::To(to) => (Some(to), 1),
        };
        let to_nodes = nodes.iter_mut().filter(|node| match &reply_to_node_id {
            Some(to_node_id) => node.node_id() == to_node_id,
            None => node.node_id() != &from,
        });

        for (to_node, message) in Iterator::zip(
            to_nodes,
            itertools::repeat_n(sendable.message, to_node_count),
        ) {
            let to_node_id = *to_node.node_id();
            TestLogger::set_node_id(Some(to_node_id));
            if !config.should_drop(from, to_node_id) {
                log::info!("<- {} {}", from, message);
                messages.extend(
                    to_node
                        .receive(message, from)
                        .into_iter()
                        .map(|message| (to_node_id, message)),
                );
            } else {
                log::info!("<- {} DROPPED {}", from, message);
                dropped_messages.push((
                    from,
                    SendableMessage {
                        message,
                        dest: MessageDestination::To(to_node_id),
                        delay: Duration::default(),
                    },
                ));
            }
        }
    }
}

//
// TestGroup impls
//

impl TestGroup {
    pub fn new(size: u64, random: &mut impl RngCore, config: TestGroupConfig) -> Self {
        Self::with_config(size, random, config, self::config(size as usize))
    }

    pub fn with_config(
        size: u64,
        random: &mut impl RngCore,
        group_config: TestGroupConfig,
        config: Config,
    ) -> Self {
        let clock = ManualClock::new();
        let start = clock.now();
        Self {
            nodes: (0..size)
                .map(|node_id| participant(node_id, size, &clock, config.clone(), random))
                .collect(),
            clock,
            start,
            config: group_config,
            dropped_messages: Default::default(),
            sent_messages: Default::default(),
        }
    }

    /// Advances the clock by one [`STEP`], fires due timers and delivers every resulting message.
    pub fn step(&mut self) -> &mut Self {
        self.clock.advance(STEP);
        TestLogger::set_elapsed(Some(self.clock.now() - self.start));
        run_group(
            &mut self.nodes,
            None,
            true,
            &mut self.config,
            &mut self.dropped_messages,
            &mut self.sent_messages,
        );
        self
    }

    pub fn run_until(&mut self, mut until_fun: impl FnMut(&mut Self) -> bool) -> &mut Self {
        let mut steps_remaining = MAX_STEPS;
        while !until_fun(self) {
            steps_remaining = steps_remaining
                .checked_sub(1)
                .expect("condition failed after maximum simulation length");
            self.step();
        }
        self
    }

    pub fn run_until_decided(&mut self) -> &mut Self {
        self.run_until(|group| group.is_decided())
    }

    pub fn run_for(&mut self, steps: u32) -> &mut Self {
        for _ in 0..steps {
            self.step();
        }
        self
    }

    pub fn run_on_node(
        &mut self,
        node_idx: usize,
        fun: impl FnOnce(&mut TestParticipant) -> Vec<SendableMessage<NodeId>>,
    ) -> &mut Self {
        let node_id = *self.nodes[node_idx].node_id();
        TestLogger::set_node_id(Some(node_id));
        let messages: Vec<_> = fun(&mut self.nodes[node_idx])
            .into_iter()
            .map(|message| (node_id, message))
            .collect();
        run_group(
            &mut self.nodes,
            messages,
            false,
            &mut self.config,
            &mut self.dropped_messages,
            &mut self.sent_messages,
        );
        self
    }

    pub fn inspect(&mut self, fun: impl FnOnce(&Self)) -> &mut Self {
        fun(self);
        self
    }

    pub fn modify(&mut self, fun: impl FnOnce(&mut Self)) -> &mut Self {
        fun(self);
        self
    }

    pub fn decisions(&self) -> Vec<Decision<NodeId>> {
        self.nodes
            .iter()
            .filter_map(|node| node.decision().cloned())
            .collect()
    }

    pub fn is_decided(&self) -> bool {
        self.nodes.iter().any(|node| node.decision().is_some())
    }

    /// Counts the accept requests broadcast so far by `node_id` for `proposal`.
    pub fn accept_requests_sent(&self, node_id: u64, proposal: ProposalNumber) -> usize {
        self.sent_messages
            .iter()
            .filter(|(from, sendable)| {
                *from == NodeId(node_id)
                    && sendable.message.proposal == proposal
                    && matches!(sendable.message.rpc, Rpc::AcceptRequest(_))
            })
            .count()
    }
}

//
// TestGroupConfig impls
//

impl TestGroupConfig {
    pub fn node_down(mut self, node_id: u64) -> Self {
        self.down.insert(NodeId(node_id));
        self
    }

    pub fn isolate(mut self, node_id: u64) -> Self {
        self.drops.insert((Some(NodeId(node_id)), None));
        self.drops.insert((None, Some(NodeId(node_id))));
        self
    }

    pub fn drop_between(mut self, from: u64, to: u64) -> Self {
        self.drops.insert((Some(NodeId(from)), Some(NodeId(to))));
        self.drops.insert((Some(NodeId(to)), Some(NodeId(from))));
        self
    }

    pub fn drop_to(mut self, node_id: u64) -> Self {
        self.drops.insert((None, Some(NodeId(node_id))));
        self
    }

    pub fn is_node_down(&self, node_id: NodeId) -> bool {
        self.down.contains(&node_id)
    }

    pub fn should_drop(&self, from: NodeId, to: NodeId) -> bool {
        self.drops.contains(&(Some(from), Some(to)))
            || self.drops.contains(&(Some(from), None))
            || self.drops.contains(&(None, Some(to)))
            || self.down.contains(&from)
            || self.down.contains(&to)
    }
}

//
// TestLogger impls
//

thread_local! {
    static LOGGER_CONTEXT: RefCell<TestLoggerContext> = RefCell::new(TestLoggerContext::new());
}

impl TestLogger {
    pub fn init() {
        let _ignore = log::set_logger(&Self);
        log::set_max_level(log::LevelFilter::Debug);
    }
    pub fn set_node_id(node_id: Option<NodeId>) {
        LOGGER_CONTEXT.with(|context| {
            context.borrow_mut().node_id = node_id;
        });
    }
    pub fn set_elapsed(elapsed: Option<Duration>) {
        LOGGER_CONTEXT.with(|context| {
            context.borrow_mut().elapsed = elapsed;
        });
    }
}

impl log::Log for TestLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        LOGGER_CONTEXT.with(|context| {
            let context = context.borrow();
            if let Some(node_id) = context.node_id {
                if let Some(elapsed) = context.elapsed {
                    eprintln!("t+{:05}ms {} {}", elapsed.as_millis(), node_id, record.args());
                } else {
                    eprintln!("t+?????ms {} {}", node_id, record.args());
                }
            } else {
                eprintln!("{}", record.args());
            }
        })
    }

    fn flush(&self) {}
}

//
// TestLoggerContext impls
//

impl TestLoggerContext {
    const fn new() -> Self {
        Self {
            node_id: None,
            elapsed: None,
        }
    }
}
