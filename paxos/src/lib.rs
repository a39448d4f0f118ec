//! Single-decree Paxos among symmetric participants, each acting as proposer and acceptor.
//!
//! The crate is a state machine with no I/O of its own. A [`Participant`](node::Participant) receives messages and
//! timer ticks and returns the messages to send; delivering them, and waiting for timers, is left to the caller:
//!
//! ```text
//! Event = PrepareRequest | PrepareResponse
//!       | AcceptRequest  | AcceptResponse
//!       | FirstTick      | Tick
//! ```
//!
//! A participant decides once every other participant accepted its proposal.

pub mod acceptor;
pub mod clock;
pub mod core;
pub mod message;
pub mod node;
pub mod proposer;

pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::message::{
        Message, MessageDestination, ProposalNumber, ProposalValue, Rpc, SendableMessage,
    };
    pub use crate::node::{Config, Decision, Participant};
}
