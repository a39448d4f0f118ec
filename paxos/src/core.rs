//! Unstable, low-level API for the complete state of a participant.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use rand_core::RngCore;

use crate::acceptor::AcceptorState;
use crate::clock::Clock;
use crate::message::*;
use crate::node::{Config, Decision};
use crate::proposer::Campaign;

const DECISION_BANNER: &str = "==========================================================";

/// The pending timer event of a participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timer {
    /// The jittered tick that starts the very first prepare round.
    FirstTick { deadline: Instant },
    /// The periodic tick that restarts a stalled round.
    Tick { deadline: Instant },
    /// No further timer events; the participant has decided.
    Stopped,
}

/// The complete state of a participant.
pub struct State<Random, C, NodeId> {
    node_id: NodeId,
    peers: BTreeSet<NodeId>,
    random: Random,
    clock: C,
    config: Config,

    acceptor: AcceptorState,
    campaign: Campaign,
    timer: Timer,

    decision: Option<Decision<NodeId>>,
    decision_taken: bool,
}

#[allow(missing_docs)]
impl<Random, C, NodeId> State<Random, C, NodeId>
where
    Random: RngCore,
    C: Clock,
    NodeId: Ord + Clone + fmt::Display,
{
    pub fn new(
        node_id: NodeId,
        mut peers: BTreeSet<NodeId>,
        mut random: Random,
        clock: C,
        config: Config,
    ) -> Self {
        peers.remove(&node_id);
        if peers.len() + 1 != config.participant_count {
            warn!(
                "{} knows {} peers but the group is configured for {} participants",
                &node_id,
                peers.len(),
                config.participant_count
            );
        }
        let now = clock.now();
        let first_tick = first_tick_delay(&mut random, &config);
        debug!("{} starts its first round in {:?}", &node_id, first_tick);
        Self {
            campaign: Campaign::new(config.participant_count, now),
            acceptor: AcceptorState::new(),
            timer: Timer::FirstTick {
                deadline: now + first_tick,
            },
            node_id,
            peers,
            random,
            clock,
            config,
            decision: None,
            decision_taken: false,
        }
    }

    pub fn acceptor(&self) -> &AcceptorState {
        &self.acceptor
    }

    pub fn campaign(&self) -> &Campaign {
        &self.campaign
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn decision(&self) -> Option<&Decision<NodeId>> {
        self.decision.as_ref()
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn peers(&self) -> &BTreeSet<NodeId> {
        &self.peers
    }

    pub fn timer(&self) -> Timer {
        self.timer
    }

    pub fn timer_deadline(&self) -> Option<Instant> {
        match self.timer {
            Timer::FirstTick { deadline } | Timer::Tick { deadline } => Some(deadline),
            Timer::Stopped => None,
        }
    }

    /// Returns the decision the first time it is asked for after this participant decided.
    pub fn take_decision(&mut self) -> Option<Decision<NodeId>> {
        if self.decision_taken {
            return None;
        }
        let decision = self.decision.clone()?;
        self.decision_taken = true;
        Some(decision)
    }

    /// Fires the pending timer event if its deadline has passed.
    pub fn timer_tick(&mut self) -> Vec<SendableMessage<NodeId>> {
        let now = self.clock.now();
        match self.timer {
            Timer::FirstTick { deadline } if now >= deadline => {
                self.timer = Timer::Tick {
                    deadline: now + self.config.tick_interval,
                };
                debug!("first tick, circulating prepare request");
                self.start_prepare_round()
            }
            Timer::Tick { deadline } if now >= deadline => {
                self.timer = Timer::Tick {
                    deadline: now + self.config.tick_interval,
                };
                if self.retry_due(now) {
                    info!(
                        "round {} stalled, circulating new prepare request ({} so far)",
                        display_number(self.campaign.proposal()),
                        self.campaign.prepare_attempts()
                    );
                    self.start_prepare_round()
                } else {
                    Vec::new()
                }
            }
            Timer::FirstTick { .. } | Timer::Tick { .. } | Timer::Stopped => Vec::new(),
        }
    }

    /// Starts a new prepare round, abandoning the live one, and returns the messages to send.
    pub fn start_prepare_round(&mut self) -> Vec<SendableMessage<NodeId>> {
        if self.campaign.is_decided() {
            return Vec::new();
        }
        let proposal = self.acceptor.proposal_numbers().next();
        self.acceptor.promise_own(proposal);
        self.campaign.start_round(proposal, self.clock.now());
        info!(
            "circulating prepare request for {} (attempt {})",
            &proposal,
            self.campaign.prepare_attempts()
        );

        let mut messages = vec![broadcast(Message {
            proposal,
            rpc: Rpc::PrepareRequest(PrepareRequest),
        })];
        if let Some(accept) = self.campaign.check_prepare_quorum() {
            messages.extend(self.begin_accept_phase(accept));
        }
        messages
    }

    /// Processes receipt of `msg` from the participant `from`, returning messages to be sent.
    pub fn receive(&mut self, msg: Message, from: NodeId) -> Vec<SendableMessage<NodeId>> {
        if !self.peers.contains(&from) {
            error!("received message from unknown participant {}", &from);
            return Vec::new();
        }
        debug!("<- {} {}", &from, &msg);

        let Message { proposal, rpc } = msg;
        match rpc {
            Rpc::PrepareRequest(PrepareRequest) => {
                let response = self.acceptor.respond_to_prepare(proposal);
                let delay = prepare_response_delay(&mut self.random, &self.config);
                vec![SendableMessage {
                    message: Message {
                        proposal,
                        rpc: Rpc::PrepareResponse(response),
                    },
                    dest: MessageDestination::To(from),
                    delay,
                }]
            }
            Rpc::AcceptRequest(AcceptRequest { value }) => self
                .acceptor
                .respond_to_accept(proposal, value)
                .map(|response| SendableMessage {
                    message: Message {
                        proposal,
                        rpc: Rpc::AcceptResponse(response),
                    },
                    dest: MessageDestination::To(from),
                    delay: Duration::default(),
                })
                .into_iter()
                .collect(),
            Rpc::PrepareResponse(response) => {
                if let Err(err) = response.validate() {
                    panic!("malformed prepare response from {}: {}", &from, err);
                }
                match self.campaign.on_prepare_response(proposal, &response) {
                    Some(accept) => self.begin_accept_phase(accept),
                    None => Vec::new(),
                }
            }
            Rpc::AcceptResponse(AcceptResponse) => {
                if self.campaign.on_accept_response(proposal) {
                    self.decide();
                }
                Vec::new()
            }
        }
    }

    fn begin_accept_phase(
        &mut self,
        (proposal, value): (ProposalNumber, ProposalValue),
    ) -> Vec<SendableMessage<NodeId>> {
        if self.acceptor.respond_to_accept(proposal, value).is_none() {
            warn!(
                "own acceptor refused {} for {}, proposing anyway",
                &value, &proposal
            );
        }
        let message = broadcast(Message {
            proposal,
            rpc: Rpc::AcceptRequest(AcceptRequest { value }),
        });
        if self.campaign.check_accept_quorum() {
            self.decide();
        }
        vec![message]
    }

    fn decide(&mut self) {
        let now = self.clock.now();
        let (proposal, value) = match (self.campaign.proposal(), self.campaign.value()) {
            (Some(proposal), Some(value)) => (proposal, value),
            _ => {
                error!("decided without a live proposal");
                return;
            }
        };
        let decision = Decision {
            proposer: self.node_id.clone(),
            proposal,
            value,
            elapsed: self.campaign.elapsed(now),
            prepare_attempts: self.campaign.prepare_attempts(),
        };
        info!("{}", DECISION_BANNER);
        info!("{}", &decision);
        info!("{}", DECISION_BANNER);
        self.timer = Timer::Stopped;
        self.decision = Some(decision);
    }

    //
    // helpers
    //

    fn retry_due(&self, now: Instant) -> bool {
        match self.config.retry_interval {
            Some(retry_interval) if retry_interval > Duration::default() => {
                match self.campaign.last_prepare_issued_at() {
                    Some(last) => now.saturating_duration_since(last) > retry_interval,
                    None => true,
                }
            }
            _ => false,
        }
    }
}

fn broadcast<NodeId>(message: Message) -> SendableMessage<NodeId> {
    SendableMessage {
        message,
        dest: MessageDestination::Broadcast,
        delay: Duration::default(),
    }
}

fn display_number(number: Option<ProposalNumber>) -> String {
    number.map_or_else(|| String::from("none"), |number| number.to_string())
}

/// Draws the jitter before a participant's first round: between one and `first_tick_steps` whole delay steps.
fn first_tick_delay(random: &mut impl RngCore, config: &Config) -> Duration {
    if config.first_tick_steps == 0 {
        return Duration::default();
    }
    let steps = random
        .next_u32()
        .checked_rem(config.first_tick_steps)
        .unwrap_or(0);
    config.delay_step * steps.saturating_add(1)
}

/// Draws the artificial delay of a prepare response: between one and `prepare_delay_steps` whole delay steps, where a
/// zero draw counts as one step.
fn prepare_response_delay(random: &mut impl RngCore, config: &Config) -> Duration {
    if config.prepare_delay_steps == 0 {
        return Duration::default();
    }
    let steps = random
        .next_u32()
        .checked_rem(config.prepare_delay_steps.saturating_add(1))
        .unwrap_or(0);
    config.delay_step * steps.max(1)
}
