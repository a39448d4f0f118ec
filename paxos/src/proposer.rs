//! The proposer role of a participant: one live campaign at a time.
//!
//! A campaign moves through three phases, derived from its counters rather than stored:
//!
//! ```text
//! AwaitingPrepareQuorum -> AwaitingAcceptQuorum -> Decided
//! ```
//!
//! Starting a new round resets the campaign in place. Responses are correlated with the live round by proposal number,
//! so late answers to an abandoned round never count towards the new one.

use std::time::{Duration, Instant};

use log::{debug, info};

use crate::message::{AcceptedProposal, PrepareResponse, ProposalNumber, ProposalValue};

/// The value proposed when no responder reported an accepted value, and the increment applied to an adopted value.
///
/// This stands in for a value supplied by a client; it carries no meaning beyond making decisions observable.
pub const VALUE_STEP: u64 = 5;

/// The phase of a [`Campaign`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No round has been started yet.
    Idle,
    AwaitingPrepareQuorum,
    AwaitingAcceptQuorum,
    Decided,
}

/// The proposer state of a participant.
#[derive(Clone, Debug)]
pub struct Campaign {
    participant_count: usize,

    proposal: Option<ProposalNumber>,
    value: Option<ProposalValue>,

    /// Non-rejected prepare responses for the live round.
    responses_received: usize,
    /// Highest proposal number carried by any prepare response of the live round.
    highest_seen: Option<ProposalNumber>,
    /// Highest-numbered accepted proposal reported by any responder of the live round.
    adopted: Option<AcceptedProposal>,

    accept_phase_triggered: bool,
    accept_responses_received: usize,
    decided: bool,

    issued_at: Instant,
    last_prepare_issued_at: Option<Instant>,
    prepare_attempts: u32,
}

/// Returns whether `responses` answers from other participants are enough to move on, out of `participant_count`.
///
/// The local participant counts itself implicitly, which is why the threshold for more than two participants is
/// `participant_count / 2` rather than a strict majority of the whole group.
pub fn majority(participant_count: usize, responses: usize) -> bool {
    match participant_count {
        0 | 1 => true,
        2 => responses == 1,
        _ => responses >= participant_count / 2,
    }
}

/// Returns the value to propose given the value adopted from prepare responses, if any.
///
/// An unset (or zero) adopted value is seeded to [`VALUE_STEP`]; anything else is bumped by it.
pub fn next_proposal_value(adopted: Option<ProposalValue>) -> ProposalValue {
    match adopted {
        Some(value) if value != ProposalValue::default() => value + VALUE_STEP,
        _ => ProposalValue::new(VALUE_STEP),
    }
}

impl Campaign {
    /// Creates an idle campaign born at `issued_at`, for a group of `participant_count` participants.
    pub fn new(participant_count: usize, issued_at: Instant) -> Self {
        Self {
            participant_count,
            proposal: None,
            value: None,
            responses_received: 0,
            highest_seen: None,
            adopted: None,
            accept_phase_triggered: false,
            accept_responses_received: 0,
            decided: false,
            issued_at,
            last_prepare_issued_at: None,
            prepare_attempts: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        if self.decided {
            Phase::Decided
        } else if self.accept_phase_triggered {
            Phase::AwaitingAcceptQuorum
        } else if self.proposal.is_some() {
            Phase::AwaitingPrepareQuorum
        } else {
            Phase::Idle
        }
    }

    pub fn participant_count(&self) -> usize {
        self.participant_count
    }

    /// The proposal number of the live round.
    pub fn proposal(&self) -> Option<ProposalNumber> {
        self.proposal
    }

    /// The value sent with the accept request of the live round, once the accept phase has been triggered.
    pub fn value(&self) -> Option<ProposalValue> {
        self.value
    }

    pub fn responses_received(&self) -> usize {
        self.responses_received
    }

    pub fn highest_seen(&self) -> Option<ProposalNumber> {
        self.highest_seen
    }

    pub fn adopted(&self) -> Option<AcceptedProposal> {
        self.adopted
    }

    pub fn accept_phase_triggered(&self) -> bool {
        self.accept_phase_triggered
    }

    pub fn accept_responses_received(&self) -> usize {
        self.accept_responses_received
    }

    pub fn is_decided(&self) -> bool {
        self.decided
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    pub fn last_prepare_issued_at(&self) -> Option<Instant> {
        self.last_prepare_issued_at
    }

    pub fn prepare_attempts(&self) -> u32 {
        self.prepare_attempts
    }

    /// Time elapsed between the campaign's birth and `now`.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.issued_at)
    }

    /// Resets the campaign for a new round under `proposal`, whose prepare request was broadcast at `issued_at`.
    pub fn start_round(&mut self, proposal: ProposalNumber, issued_at: Instant) {
        if let Some(abandoned) = self.proposal {
            debug!(
                "abandoning round {} after {} prepare responses",
                &abandoned, self.responses_received
            );
        }
        self.proposal = Some(proposal);
        self.value = None;
        self.responses_received = 0;
        self.highest_seen = None;
        self.adopted = None;
        self.accept_phase_triggered = false;
        self.accept_responses_received = 0;
        self.last_prepare_issued_at = Some(issued_at);
        self.prepare_attempts = self.prepare_attempts.saturating_add(1);
    }

    /// Folds a prepare response for `proposal` into the live round.
    ///
    /// Returns the number and value to broadcast in an accept request the first time the prepare quorum is reached.
    /// Responses received afterwards are still counted but never trigger a second accept request.
    pub fn on_prepare_response(
        &mut self,
        proposal: ProposalNumber,
        response: &PrepareResponse,
    ) -> Option<(ProposalNumber, ProposalValue)> {
        if !self.is_live(proposal) {
            debug!("ignored prepare response for stale round {}", &proposal);
            return None;
        }
        if response.is_rejected() {
            debug!("prepare for {} was rejected", &proposal);
            return None;
        }

        self.responses_received += 1;
        let carried = response
            .accepted_proposal()
            .map(|accepted| accepted.number)
            .or_else(|| response.last_promised());
        if carried > self.highest_seen {
            self.highest_seen = carried;
        }
        if let Some(accepted) = response.accepted_proposal() {
            if self
                .adopted
                .map_or(true, |adopted| accepted.number > adopted.number)
            {
                debug!("adopting {} for round {}", &accepted, &proposal);
                self.adopted = Some(accepted);
            }
        }

        self.check_prepare_quorum()
    }

    /// Triggers the accept phase of the live round if the prepare quorum has been reached and it has not been
    /// triggered yet.
    pub fn check_prepare_quorum(&mut self) -> Option<(ProposalNumber, ProposalValue)> {
        if self.accept_phase_triggered || self.decided {
            return None;
        }
        if !majority(self.participant_count, self.responses_received) {
            return None;
        }
        self.trigger_accept_phase()
    }

    fn trigger_accept_phase(&mut self) -> Option<(ProposalNumber, ProposalValue)> {
        let proposal = self.proposal?;
        let value = next_proposal_value(self.adopted.map(|adopted| adopted.value));
        info!(
            "prepare quorum for {} with {} responses, proposing {}",
            &proposal, self.responses_received, &value
        );
        self.value = Some(value);
        self.accept_phase_triggered = true;
        self.accept_responses_received = 0;
        Some((proposal, value))
    }

    /// Folds an accept response for `proposal` into the live round, returning `true` when it decides the campaign.
    ///
    /// The campaign is decided once every other participant has consented.
    pub fn on_accept_response(&mut self, proposal: ProposalNumber) -> bool {
        if !self.is_live(proposal) || !self.accept_phase_triggered {
            debug!("ignored accept response for stale round {}", &proposal);
            return false;
        }
        self.accept_responses_received += 1;
        self.check_accept_quorum()
    }

    /// Marks the campaign decided if every other participant has consented to the live round.
    pub fn check_accept_quorum(&mut self) -> bool {
        if self.decided || !self.accept_phase_triggered {
            return false;
        }
        if self.accept_responses_received == self.participant_count.saturating_sub(1) {
            self.decided = true;
        }
        self.decided
    }

    fn is_live(&self, proposal: ProposalNumber) -> bool {
        !self.decided && self.proposal == Some(proposal)
    }
}
