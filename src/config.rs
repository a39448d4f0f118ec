use std::env;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use paxos::node::Config;

pub const ENV_PARTICIPANTS: &str = "SYNOD_PARTICIPANTS";
pub const ENV_RETRY_INTERVAL_MS: &str = "SYNOD_RETRY_INTERVAL_MS";
pub const ENV_TICK_INTERVAL_MS: &str = "SYNOD_TICK_INTERVAL_MS";
pub const ENV_DELAY_STEP_MS: &str = "SYNOD_DELAY_STEP_MS";
pub const ENV_SEED: &str = "SYNOD_SEED";
pub const ENV_MAX_RUN_MS: &str = "SYNOD_MAX_RUN_MS";

pub const USAGE: &str = "\
usage: synod [participants [retry_interval_ms]]

Simulates single-decree Paxos among `participants` threads (default 5) until one of them
reaches consensus. A positive `retry_interval_ms` lets a participant start a new prepare
round once its last one is older than that; zero or less (the default) disables retries.

environment:
  SYNOD_PARTICIPANTS        participant count, overridden by the first argument
  SYNOD_RETRY_INTERVAL_MS   retry interval, overridden by the second argument
  SYNOD_TICK_INTERVAL_MS    time between periodic ticks (default 1000)
  SYNOD_DELAY_STEP_MS       unit of the first-tick jitter and prepare delays (default 100)
  SYNOD_SEED                seed of every participant's random source
  SYNOD_MAX_RUN_MS          give up after this long, 0 for never (default)
  RUST_LOG                  log filter (default info)";

const DEFAULT_PARTICIPANTS: usize = 5;
const DEFAULT_RETRY_INTERVAL_MS: i64 = -1;
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_DELAY_STEP: Duration = Duration::from_millis(100);

/// Settings of one simulation run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulationConfig {
    pub participant_count: usize,

    /// Minimum age of the last prepare round before a tick starts a new one. Zero or less disables retries.
    pub retry_interval_ms: i64,

    pub tick_interval: Duration,

    pub delay_step: Duration,

    /// Seed of the participants' random sources; drawn from the operating system when unset.
    pub seed: Option<u64>,

    /// Wall-clock limit after which the run gives up without consensus.
    pub max_run: Option<Duration>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    // A setting could not be parsed, holds the setting name and the raw value
    InvalidValue { setting: &'static str, value: String },
    // More positional arguments than supported, holds the count
    TooManyArguments(usize),
    NoParticipants,
    ZeroTickInterval,
}

impl SimulationConfig {
    /// Loads defaults, then environment variables, then the positional `args` (program name excluded).
    pub fn load<I>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        Self::default()
            .with_env(|name| env::var(name).ok())?
            .with_args(args)?
            .validate()
    }

    /// Overrides the settings found through `lookup`, keyed by environment variable name.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_PARTICIPANTS) {
            self.participant_count = parse(ENV_PARTICIPANTS, &value)?;
        }
        if let Some(value) = lookup(ENV_RETRY_INTERVAL_MS) {
            self.retry_interval_ms = parse(ENV_RETRY_INTERVAL_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_TICK_INTERVAL_MS) {
            self.tick_interval = Duration::from_millis(parse(ENV_TICK_INTERVAL_MS, &value)?);
        }
        if let Some(value) = lookup(ENV_DELAY_STEP_MS) {
            self.delay_step = Duration::from_millis(parse(ENV_DELAY_STEP_MS, &value)?);
        }
        if let Some(value) = lookup(ENV_SEED) {
            self.seed = Some(parse(ENV_SEED, &value)?);
        }
        if let Some(value) = lookup(ENV_MAX_RUN_MS) {
            self.max_run = match parse(ENV_MAX_RUN_MS, &value)? {
                0 => None,
                millis => Some(Duration::from_millis(millis)),
            };
        }
        Ok(self)
    }

    /// Overrides the participant count and the retry interval from positional arguments.
    pub fn with_args<I>(mut self, args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
    {
        let args: Vec<String> = args.into_iter().collect();
        if args.len() > 2 {
            return Err(ConfigError::TooManyArguments(args.len()));
        }
        if let Some(value) = args.get(0) {
            self.participant_count = parse("participants", value)?;
        }
        if let Some(value) = args.get(1) {
            self.retry_interval_ms = parse("retry_interval_ms", value)?;
        }
        Ok(self)
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.participant_count == 0 {
            return Err(ConfigError::NoParticipants);
        }
        if self.tick_interval == Duration::default() {
            return Err(ConfigError::ZeroTickInterval);
        }
        Ok(self)
    }

    /// The retry interval, if retries are enabled.
    pub fn retry_interval(&self) -> Option<Duration> {
        match self.retry_interval_ms {
            millis if millis > 0 => Some(Duration::from_millis(millis as u64)),
            _ => None,
        }
    }

    /// The configuration shared by every participant of the run.
    pub fn engine_config(&self) -> Config {
        Config {
            participant_count: self.participant_count,
            retry_interval: self.retry_interval(),
            tick_interval: self.tick_interval,
            delay_step: self.delay_step,
            ..Config::default()
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            participant_count: DEFAULT_PARTICIPANTS,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            tick_interval: DEFAULT_TICK_INTERVAL,
            delay_step: DEFAULT_DELAY_STEP,
            seed: None,
            max_run: None,
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { setting, value } => {
                write!(f, "invalid value {:?} for {}", value, setting)
            }
            Self::TooManyArguments(count) => {
                write!(f, "expected at most 2 arguments, got {}", count)
            }
            Self::NoParticipants => write!(f, "at least one participant is required"),
            Self::ZeroTickInterval => write!(f, "the tick interval must be positive"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parse<T: FromStr>(setting: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        setting,
        value: value.to_string(),
    })
}
