//! A simulated run of five participants sharing a manual clock

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rand_core::SeedableRng;

use paxos::clock::{Clock, ManualClock};
use paxos::message::{Message, MessageDestination, SendableMessage};
use paxos::node::{Config, Participant};
use rand_chacha::ChaChaRng;

fn main() {
    let _ = env_logger::builder().is_test(true).try_init();

    // Construct 5 Paxos participants
    type NodeId = usize;
    let clock = ManualClock::new();
    let mut peers = (0..5)
        .map(|id: NodeId| {
            Participant::new(
                id,
                (0..5).collect(),
                ChaChaRng::seed_from_u64(id as u64),
                clock.clone(),
                Config {
                    retry_interval: Some(Duration::from_millis(1500)),
                    ..Config::new(5)
                },
            )
        })
        .collect::<Vec<_>>();

    // Deliver messages reliably once their delay has passed, in the order they were sent
    let mut in_flight: BTreeMap<(Instant, u64), (NodeId, NodeId, Message)> = BTreeMap::new();
    let mut sequence = 0;
    let mut send_message =
        |src_id: NodeId, sendable: SendableMessage<NodeId>, in_flight: &mut BTreeMap<_, _>| {
            let deliver_at = clock.now() + sendable.delay;
            let dst_ids: Vec<NodeId> = match sendable.dest {
                MessageDestination::Broadcast => {
                    println!("peer {} -> all: {}", src_id, &sendable.message);
                    (0..5).filter(|dst_id| *dst_id != src_id).collect()
                }
                MessageDestination::To(dst_id) => {
                    println!("peer {} -> peer {}: {}", src_id, dst_id, &sendable.message);
                    vec![dst_id]
                }
            };
            for dst_id in dst_ids {
                sequence += 1;
                in_flight.insert(
                    (deliver_at, sequence),
                    (src_id, dst_id, sendable.message.clone()),
                );
            }
        };

    // Loop until one participant decides
    let start = clock.now();
    loop {
        if let Some(decision) = peers.iter_mut().find_map(|peer| peer.take_decision()) {
            println!("peer {} decided {}", decision.proposer, &decision.value);
            assert_eq!(decision.value.id % 5, 0);
            break;
        }

        let next_timer = peers.iter().filter_map(|peer| peer.timer_deadline()).min();
        let next_delivery = in_flight.keys().next().map(|(deliver_at, _)| *deliver_at);
        let next = match (next_timer, next_delivery) {
            (Some(timer), Some(delivery)) => timer.min(delivery),
            (Some(timer), None) => timer,
            (None, Some(delivery)) => delivery,
            (None, None) => panic!("nothing left to do without a decision"),
        };
        clock.advance_to(next);
        assert!(clock.now() - start < Duration::from_secs(600));

        // Tick the timers
        for (peer_id, peer) in peers.iter_mut().enumerate() {
            let new_messages: Vec<_> = peer.timer_tick().collect();
            for message in new_messages {
                send_message(peer_id, message, &mut in_flight);
            }
        }

        // Process messages that are due
        while let Some(key) = in_flight
            .keys()
            .next()
            .copied()
            .filter(|(deliver_at, _)| *deliver_at <= clock.now())
        {
            if let Some((src_id, dst_id, message)) = in_flight.remove(&key) {
                let new_messages: Vec<_> = peers[dst_id].receive(message, src_id).collect();
                for message in new_messages {
                    send_message(dst_id, message, &mut in_flight);
                }
            }
        }
    }
}
