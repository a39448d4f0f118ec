use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Multi-Producer Broadcast to do many to many (N*N) message passing.
///
/// A receiver only gets the messages sent after it subscribed. The forwarding thread exits once the bus and every
/// sender it handed out are dropped.
pub struct MPB<X>
where
    X: Clone + Send + Sync + 'static,
{
    sender: Sender<X>,
    subscribers: Arc<Mutex<Vec<Sender<X>>>>,
}

impl<X> MPB<X>
where
    X: Clone + Send + Sync + 'static,
{
    /// Creates the bus and its forwarding thread. Fails if the thread cannot be spawned.
    pub fn new() -> io::Result<Self> {
        let (sender, receiver) = unbounded::<X>();

        let mpb = MPB {
            sender,
            subscribers: Arc::new(Mutex::new(vec![])),
        };

        mpb._init(receiver)?;

        Ok(mpb)
    }

    fn _init(&self, receiver: Receiver<X>) -> io::Result<()> {
        let subscribers = self.subscribers.clone();

        thread::Builder::new()
            .name(String::from("mpb forwarder"))
            .spawn(move || {
                for msg in receiver {
                    // drop the subscribers whose receiver is gone
                    lock(&subscribers).retain(|subscriber| subscriber.send(msg.clone()).is_ok());
                }
            })?;

        Ok(())
    }

    pub fn sender(&self) -> Sender<X> {
        self.sender.clone()
    }

    pub fn receiver(&self) -> Receiver<X> {
        let (sender, receiver) = unbounded();
        lock(&self.subscribers).push(sender);
        receiver
    }

    /// The number of receivers still subscribed, as of the last forwarded message.
    pub fn receiver_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

/// A forwarding thread never panics while holding the lock, so a poisoned list is still consistent.
fn lock<X>(subscribers: &Mutex<Vec<Sender<X>>>) -> MutexGuard<'_, Vec<Sender<X>>> {
    match subscribers.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use crate::MPB;

    #[derive(Clone, Debug, PartialEq)]
    enum Event {
        Decided(u64),
        Stop,
    }

    #[test]
    fn every_receiver_gets_every_message() {
        let mpb = MPB::new().unwrap();

        let sender1 = mpb.sender();
        let sender2 = mpb.sender();

        let receiver1 = mpb.receiver();
        let receiver2 = mpb.receiver();

        let j1 = thread::spawn(move || {
            let first = receiver1.recv_timeout(Duration::from_secs(5));
            let second = receiver1.recv_timeout(Duration::from_secs(5));
            (first, second)
        });

        let j2 = thread::spawn(move || {
            let first = receiver2.recv_timeout(Duration::from_secs(5));
            let second = receiver2.recv_timeout(Duration::from_secs(5));
            (first, second)
        });

        let _ = sender1.send(Event::Decided(5));
        let _ = sender2.send(Event::Stop);

        for handle in vec![j1, j2] {
            let (first, second) = handle.join().unwrap();
            assert_eq!(first, Ok(Event::Decided(5)));
            assert_eq!(second, Ok(Event::Stop));
        }
    }

    #[test]
    fn late_receiver_misses_earlier_messages() {
        let mpb = MPB::new().unwrap();
        let early = mpb.receiver();

        let _ = mpb.sender().send(Event::Decided(5));
        assert_eq!(
            early.recv_timeout(Duration::from_secs(5)),
            Ok(Event::Decided(5))
        );

        let late = mpb.receiver();
        let _ = mpb.sender().send(Event::Stop);
        assert_eq!(late.recv_timeout(Duration::from_secs(5)), Ok(Event::Stop));
        assert_eq!(early.recv_timeout(Duration::from_secs(5)), Ok(Event::Stop));
    }

    #[test]
    fn forwarder_thread_named() {
        let mpb = MPB::new().unwrap();
        let receiver = mpb.receiver();
        let (names, names_receiver) = crossbeam_channel::unbounded();

        // the forwarder is the only thread cloning messages
        struct NamedClone(crossbeam_channel::Sender<Option<String>>);
        impl Clone for NamedClone {
            fn clone(&self) -> Self {
                let _ = self
                    .0
                    .send(thread::current().name().map(String::from));
                NamedClone(self.0.clone())
            }
        }

        let _ = mpb.sender().send(NamedClone(names));
        assert!(receiver.recv_timeout(Duration::from_secs(5)).is_ok());
        assert_eq!(
            names_receiver.recv_timeout(Duration::from_secs(5)),
            Ok(Some(String::from("mpb forwarder")))
        );
    }

    #[test]
    fn dropped_receiver_unsubscribed() {
        let mpb = MPB::new().unwrap();
        let kept = mpb.receiver();
        drop(mpb.receiver());
        assert_eq!(mpb.receiver_count(), 2);

        let _ = mpb.sender().send(Event::Stop);
        assert_eq!(kept.recv_timeout(Duration::from_secs(5)), Ok(Event::Stop));
        assert_eq!(mpb.receiver_count(), 1);
    }
}
