//! The acceptor role of a participant, and the proposal numbers derived from it.

use log::{debug, info, warn};

use crate::message::{AcceptResponse, AcceptedProposal, PrepareResponse, ProposalNumber, ProposalValue};

/// What a participant has promised and accepted as an acceptor.
///
/// `last_promised` is never below the number of the accepted proposal. Only the owning participant's handlers mutate
/// this state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AcceptorState {
    last_promised: Option<ProposalNumber>,
    accepted: Option<AcceptedProposal>,
}

/// Issues proposal numbers for a participant, based on its own acceptor history.
///
/// The next number is one above the highest number this participant has promised or accepted, so the participant never
/// proposes under a number it has already promised away. A participant with no history starts at zero.
pub struct ProposalNumberGenerator<'a> {
    acceptor: &'a AcceptorState,
}

impl AcceptorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The highest proposal number promised, if any.
    pub fn last_promised(&self) -> Option<ProposalNumber> {
        self.last_promised
    }

    /// The highest-numbered proposal accepted, if any.
    pub fn accepted(&self) -> Option<AcceptedProposal> {
        self.accepted
    }

    pub fn proposal_numbers(&self) -> ProposalNumberGenerator<'_> {
        ProposalNumberGenerator { acceptor: self }
    }

    /// Answers a prepare request for `proposal`.
    ///
    /// A number above everything promised so far is promised, and the answer reports what this acceptor had promised
    /// and accepted before. Anything else is answered with an explicit rejection rather than silence, so the proposer
    /// can tell an active rejection from a missing quorum.
    pub fn respond_to_prepare(&mut self, proposal: ProposalNumber) -> PrepareResponse {
        let previously_promised = self.last_promised;
        if Some(proposal) <= previously_promised {
            info!(
                "rejected prepare for {} as already promised {}",
                &proposal,
                display_number(previously_promised)
            );
            return PrepareResponse::Rejected;
        }

        self.last_promised = Some(proposal);
        let response = match (self.accepted, previously_promised) {
            (None, None) => PrepareResponse::NonePromisedOrAccepted,
            (None, Some(last_promised)) => PrepareResponse::PromisedNoneAccepted { last_promised },
            (Some(accepted), previously_promised) => PrepareResponse::Accepted {
                last_promised: previously_promised.map_or(accepted.number, |promised| {
                    promised.max(accepted.number)
                }),
                accepted,
            },
        };
        info!("promised {}, answering {}", &proposal, &response);
        response
    }

    /// Answers an accept request for `value` under `proposal`.
    ///
    /// Requests at or above the current promise are accepted. Older requests get no answer at all: an acceptor never
    /// sends a negative answer to an accept request.
    pub fn respond_to_accept(
        &mut self,
        proposal: ProposalNumber,
        value: ProposalValue,
    ) -> Option<AcceptResponse> {
        if Some(proposal) < self.last_promised {
            warn!(
                "ignored accept for {} with {} below promised {}",
                &proposal,
                &value,
                display_number(self.last_promised)
            );
            return None;
        }

        let accepted = AcceptedProposal {
            number: proposal,
            value,
        };
        info!("accepted {}", &accepted);
        self.accepted = Some(accepted);
        self.last_promised = Some(proposal);
        Some(AcceptResponse)
    }

    /// Records the implicit promise a proposer makes to its own proposal.
    ///
    /// Returns `false`, leaving the state untouched, if `proposal` is not above the current promise.
    pub fn promise_own(&mut self, proposal: ProposalNumber) -> bool {
        if Some(proposal) > self.last_promised {
            debug!("promised own {}", &proposal);
            self.last_promised = Some(proposal);
            true
        } else {
            false
        }
    }
}

impl ProposalNumberGenerator<'_> {
    /// Returns `max(last_promised, accepted number) + 1`, treating "none" as one below zero.
    pub fn next(&self) -> ProposalNumber {
        let accepted_number = self.acceptor.accepted.map(|accepted| accepted.number);
        match self.acceptor.last_promised.max(accepted_number) {
            Some(highest) => highest + 1,
            None => ProposalNumber::default(),
        }
    }
}

fn display_number(number: Option<ProposalNumber>) -> String {
    number.map_or_else(|| String::from("nothing"), |number| number.to_string())
}
