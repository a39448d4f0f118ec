//! The in-process transport between participant threads.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, warn};

use paxos::message::{Message, MessageDestination, SendableMessage};

/// The name of a participant, its index in the [`Network`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParticipantId(pub usize);

/// A message waiting in a participant's mailbox.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub from: ParticipantId,
    pub message: Message,
}

/// The ordered registry of participant mailboxes. It is built once, before any participant starts, and never changes
/// afterwards.
pub struct Network {
    mailboxes: Vec<Sender<Envelope>>,
}

impl Network {
    /// Creates a network of `participant_count` participants, returning the receiving end of each mailbox in
    /// participant order.
    pub fn new(participant_count: usize) -> (Self, Vec<Receiver<Envelope>>) {
        let (mailboxes, receivers): (Vec<_>, Vec<_>) =
            (0..participant_count).map(|_| unbounded()).unzip();
        (Network { mailboxes }, receivers)
    }

    pub fn participant_count(&self) -> usize {
        self.mailboxes.len()
    }

    pub fn participants(&self) -> BTreeSet<ParticipantId> {
        (0..self.mailboxes.len()).map(ParticipantId).collect()
    }

    /// Queues `message` in the mailbox of `to`, returning `false` if `to` is unknown or has stopped.
    pub fn send(&self, from: ParticipantId, to: ParticipantId, message: Message) -> bool {
        match self.mailboxes.get(to.0) {
            Some(mailbox) => {
                debug!("{} -> {}: {}", from, to, &message);
                mailbox.send(Envelope { from, message }).is_ok()
            }
            None => {
                warn!("{} sent {} to unknown {}", from, &message, to);
                false
            }
        }
    }

    /// Queues `message` in the mailbox of every participant but `from`, returning when it was sent.
    pub fn broadcast(&self, from: ParticipantId, message: &Message) -> Instant {
        let sent_at = Instant::now();
        debug!("{} -> all: {}", from, message);
        for (index, mailbox) in self.mailboxes.iter().enumerate() {
            if index != from.0 {
                let _ = mailbox.send(Envelope {
                    from,
                    message: message.clone(),
                });
            }
        }
        sent_at
    }

    /// Routes a message returned by a participant.
    pub fn dispatch(&self, from: ParticipantId, sendable: SendableMessage<ParticipantId>) {
        match sendable.dest {
            MessageDestination::Broadcast => {
                let _ = self.broadcast(from, &sendable.message);
            }
            MessageDestination::To(to) => {
                let _ = self.send(from, to, sendable.message);
            }
        }
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Participant_{}", self.0)
    }
}
