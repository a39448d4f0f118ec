//! Paxos message types for sending between participants.
//!
//! The top-level message type is [`Message`], an envelope carrying the proposal number of the round it belongs to and
//! the [`Rpc`] itself. Responses echo the proposal number of the request they answer, which is how a proposer tells
//! the responses of its live round apart from late responses to a round it has already abandoned.

use std::fmt;
use std::ops::Add;
use std::time::Duration;

/// A [`Message`] to be sent to a destination.
#[derive(Clone, Debug, PartialEq)]
pub struct SendableMessage<NodeId> {
    /// The message to be sent.
    pub message: Message,

    /// The destination for the message.
    pub dest: MessageDestination<NodeId>,

    /// How long the transport should hold the message before delivering it. Only prepare responses carry a non-zero
    /// delay, modeling processing and network latency.
    pub delay: Duration,
}

/// The destination for a [`SendableMessage`].
#[derive(Clone, Debug, PartialEq)]
pub enum MessageDestination<NodeId> {
    /// The associated message should be sent to every other participant.
    Broadcast,
    /// The associated message should be sent to one particular participant.
    To(NodeId),
}

/// A message sent between participants.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// The proposal number of the round this message belongs to.
    pub proposal: ProposalNumber,

    /// The Remote Procedure Call contained by this message.
    pub rpc: Rpc,
}

/// A Remote Procedure Call between participants.
#[derive(Clone, Debug, PartialEq)]
pub enum Rpc {
    /// Phase one: a proposer asks acceptors to promise its proposal number.
    PrepareRequest(PrepareRequest),

    /// An acceptor's answer to a [`PrepareRequest`].
    PrepareResponse(PrepareResponse),

    /// Phase two: a proposer asks acceptors to accept a value under its prepared number.
    AcceptRequest(AcceptRequest),

    /// An acceptor's consent to an [`AcceptRequest`]. Acceptors never send a negative answer to an accept request.
    AcceptResponse(AcceptResponse),
}

/// A request to promise the proposal number carried by the enclosing [`Message`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PrepareRequest;

/// The answer of an acceptor to a [`PrepareRequest`].
///
/// Each state only carries the fields that are meaningful in it, so a proposer cannot read an accepted value from a
/// response that never accepted anything. The one invariant the type system does not enforce, that an acceptor has
/// promised at least the number it accepted, is checked by [`PrepareResponse::accepted`] and
/// [`PrepareResponse::validate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrepareResponse {
    /// The acceptor already promised a number at or above the requested one.
    Rejected,

    /// The acceptor had neither promised nor accepted anything before this request.
    NonePromisedOrAccepted,

    /// The acceptor had promised before but never accepted a proposal.
    PromisedNoneAccepted {
        /// The highest number the acceptor had promised before this request.
        last_promised: ProposalNumber,
    },

    /// The acceptor has accepted a proposal, which the proposer must take into account.
    Accepted {
        /// The highest number the acceptor had promised before this request.
        last_promised: ProposalNumber,

        /// The highest-numbered proposal accepted by the acceptor.
        accepted: AcceptedProposal,
    },
}

/// A request to accept `value` under the proposal number carried by the enclosing [`Message`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcceptRequest {
    /// The value to be decided.
    pub value: ProposalValue,
}

/// Consent to the [`AcceptRequest`] whose proposal number is carried by the enclosing [`Message`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AcceptResponse;

/// A proposal accepted by an acceptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AcceptedProposal {
    /// The number the proposal was accepted under.
    pub number: ProposalNumber,

    /// The accepted value.
    pub value: ProposalValue,
}

/// A proposal number.
///
/// Numbers are scoped per participant rather than globally unique: two participants may independently issue the same
/// number. Safety comes from the promise rules of acceptors, not from number uniqueness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProposalNumber {
    /// The non-negative integer assigned to this proposal.
    pub id: u64,
}

/// An opaque value to be decided.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProposalValue {
    /// The integer payload of this value.
    pub id: u64,
}

/// An error raised when a [`PrepareResponse`] is built or read in violation of its state rules.
///
/// These errors indicate a bug in whoever constructed the response, never a condition to retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// An `Accepted` response claims a proposal numbered above the promise it carries.
    AcceptedAbovePromise {
        last_promised: ProposalNumber,
        accepted: ProposalNumber,
    },
    /// A field was requested from a response whose state does not carry it.
    MissingField {
        field: &'static str,
        state: &'static str,
    },
}

//
// Message impls
//

impl fmt::Display for Message {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { proposal, rpc } = self;
        fmt.debug_tuple("")
            .field(&format_args!("{}", proposal))
            .field(&format_args!("{}", rpc))
            .finish()
    }
}

//
// Rpc impls
//

impl fmt::Display for Rpc {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            Rpc::PrepareRequest(_) => fmt.write_str("PrepareRequest"),
            Rpc::PrepareResponse(msg) => fmt::Display::fmt(msg, fmt),
            Rpc::AcceptRequest(msg) => fmt::Display::fmt(msg, fmt),
            Rpc::AcceptResponse(_) => fmt.write_str("AcceptResponse"),
        }
    }
}

//
// PrepareResponse impls
//

impl PrepareResponse {
    /// Builds an `Accepted` response, refusing one whose accepted number exceeds its promise.
    pub fn accepted(
        last_promised: ProposalNumber,
        accepted: AcceptedProposal,
    ) -> Result<Self, ProtocolError> {
        let response = PrepareResponse::Accepted {
            last_promised,
            accepted,
        };
        response.validate()?;
        Ok(response)
    }

    /// Checks the invariants the variant layout cannot express.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        match self {
            PrepareResponse::Accepted {
                last_promised,
                accepted,
            } if accepted.number > *last_promised => Err(ProtocolError::AcceptedAbovePromise {
                last_promised: *last_promised,
                accepted: accepted.number,
            }),
            _ => Ok(()),
        }
    }

    /// Returns the name of this response's state.
    pub fn state_name(&self) -> &'static str {
        match self {
            PrepareResponse::Rejected => "Rejected",
            PrepareResponse::NonePromisedOrAccepted => "NonePromisedOrAccepted",
            PrepareResponse::PromisedNoneAccepted { .. } => "PromisedNoneAccepted",
            PrepareResponse::Accepted { .. } => "Accepted",
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, PrepareResponse::Rejected)
    }

    /// Returns the last promised number, present in `PromisedNoneAccepted` and `Accepted`.
    pub fn last_promised(&self) -> Option<ProposalNumber> {
        match self {
            PrepareResponse::PromisedNoneAccepted { last_promised }
            | PrepareResponse::Accepted { last_promised, .. } => Some(*last_promised),
            PrepareResponse::Rejected | PrepareResponse::NonePromisedOrAccepted => None,
        }
    }

    /// Returns the accepted proposal, present only in `Accepted`.
    pub fn accepted_proposal(&self) -> Option<AcceptedProposal> {
        match self {
            PrepareResponse::Accepted { accepted, .. } => Some(*accepted),
            _ => None,
        }
    }

    /// Like [`last_promised`](Self::last_promised), but reports which state lacked the field.
    pub fn require_last_promised(&self) -> Result<ProposalNumber, ProtocolError> {
        self.last_promised()
            .ok_or_else(|| self.missing_field("last_promised"))
    }

    /// Like [`accepted_proposal`](Self::accepted_proposal), but reports which state lacked the field.
    pub fn require_accepted(&self) -> Result<AcceptedProposal, ProtocolError> {
        self.accepted_proposal()
            .ok_or_else(|| self.missing_field("accepted"))
    }

    fn missing_field(&self, field: &'static str) -> ProtocolError {
        ProtocolError::MissingField {
            field,
            state: self.state_name(),
        }
    }
}

impl fmt::Display for PrepareResponse {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = fmt.debug_struct("PrepareResponse");
        debug.field("state", &self.state_name());
        if let Some(last_promised) = self.last_promised() {
            debug.field("last_promised", &format_args!("{}", last_promised));
        }
        if let Some(accepted) = self.accepted_proposal() {
            debug.field("accepted", &format_args!("{}", accepted));
        }
        debug.finish()
    }
}

//
// AcceptRequest impls
//

impl fmt::Display for AcceptRequest {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { value } = self;
        fmt.debug_struct("AcceptRequest")
            .field("value", &format_args!("{}", value))
            .finish()
    }
}

//
// AcceptedProposal impls
//

impl fmt::Display for AcceptedProposal {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { number, value } = self;
        fmt.debug_tuple("")
            .field(&format_args!("{}", number))
            .field(&format_args!("{}", value))
            .finish()
    }
}

//
// ProposalNumber impls
//

impl ProposalNumber {
    pub const fn new(id: u64) -> Self {
        Self { id }
    }
}

impl fmt::Display for ProposalNumber {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { id } = self;
        fmt.debug_tuple("PN").field(id).finish()
    }
}

impl Add<u64> for ProposalNumber {
    type Output = Self;
    fn add(self, inc: u64) -> Self {
        Self {
            id: self
                .id
                .checked_add(inc)
                .unwrap_or_else(|| panic!("overflow")),
        }
    }
}

//
// ProposalValue impls
//

impl ProposalValue {
    pub const fn new(id: u64) -> Self {
        Self { id }
    }
}

impl fmt::Display for ProposalValue {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { id } = self;
        fmt.debug_tuple("PV").field(id).finish()
    }
}

impl Add<u64> for ProposalValue {
    type Output = Self;
    fn add(self, inc: u64) -> Self {
        Self {
            id: self
                .id
                .checked_add(inc)
                .unwrap_or_else(|| panic!("overflow")),
        }
    }
}

//
// ProtocolError impls
//

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AcceptedAbovePromise {
                last_promised,
                accepted,
            } => write!(
                f,
                "accepted proposal {} is above last promised {}",
                accepted, last_promised
            ),
            Self::MissingField { field, state } => {
                write!(f, "prepare response in state {} has no {}", state, field)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}
