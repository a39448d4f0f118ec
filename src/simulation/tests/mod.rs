use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;

use crate::config::{ConfigError, SimulationConfig};
use crate::error::SimulationError;
use crate::network::ParticipantId;
use crate::signal::SimulationState;
use crate::simulation::{wait_for_consensus, Outcome, Simulation};

fn fast_config(participant_count: usize) -> SimulationConfig {
    SimulationConfig {
        participant_count,
        retry_interval_ms: 100,
        tick_interval: Duration::from_millis(50),
        delay_step: Duration::from_millis(5),
        seed: Some(7),
        max_run: Some(Duration::from_secs(60)),
    }
}

fn assert_consensus(participant_count: usize) {
    let outcome = Simulation::new(fast_config(participant_count)).run().unwrap();

    let decision = outcome.decision().expect("no consensus");
    assert!(decision.proposer.0 < participant_count);
    assert!(decision.value.id >= 5);
    assert_eq!(decision.value.id % 5, 0);
    assert!(decision.prepare_attempts >= 1);
    assert!(decision.elapsed <= outcome.elapsed());
}

#[test]
#[serial]
fn single_participant_reaches_consensus() {
    assert_consensus(1);
}

#[test]
#[serial]
fn pair_reaches_consensus() {
    assert_consensus(2);
}

#[test]
#[serial]
fn five_participants_reach_consensus() {
    assert_consensus(5);
}

#[test]
#[serial]
fn seven_participants_reach_consensus() {
    assert_consensus(7);
}

#[test]
#[serial]
fn default_timings_reach_consensus() {
    let config = SimulationConfig {
        participant_count: 3,
        retry_interval_ms: 2000,
        seed: Some(11),
        max_run: Some(Duration::from_secs(120)),
        ..SimulationConfig::default()
    };
    let outcome = Simulation::new(config).run().unwrap();
    assert!(matches!(outcome, Outcome::Decided { .. }));
}

#[test]
#[serial]
fn gives_up_after_run_limit() {
    let config = SimulationConfig {
        delay_step: Duration::from_millis(500),
        max_run: Some(Duration::from_millis(20)),
        ..fast_config(3)
    };
    let outcome = Simulation::new(config).run().unwrap();
    assert!(matches!(outcome, Outcome::TimedOut { .. }));
    assert!(outcome.decision().is_none());
    assert!(outcome.elapsed() >= Duration::from_millis(20));
}

#[test]
fn rejects_empty_group() {
    let result = Simulation::new(fast_config(0)).run();
    assert!(matches!(
        result,
        Err(SimulationError::Config(ConfigError::NoParticipants))
    ));
}

#[test]
fn participant_failure_ends_wait() {
    let (sender, receiver) = unbounded();
    sender.send(SimulationState::Stop).unwrap();
    sender
        .send(SimulationState::ParticipantFailed(ParticipantId(2)))
        .unwrap();

    // no run limit, the failure alone ends the wait
    match wait_for_consensus(&receiver, None, Instant::now()) {
        Err(SimulationError::ParticipantPanicked(name)) => assert_eq!(name, "Participant_2"),
        other => panic!("unexpected {:?}", other),
    }
}
