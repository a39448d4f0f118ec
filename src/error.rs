use std::fmt::{Display, Formatter};
use std::io::{Error, ErrorKind};

use crate::config::ConfigError;

#[derive(Debug)]
pub enum SimulationError {
    // The configuration was rejected before any participant started
    Config(ConfigError),
    // A participant thread could not be spawned
    Spawn(Error),
    // A participant thread panicked, holds the thread name
    ParticipantPanicked(String),
}

impl Display for SimulationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "invalid configuration: {}", err),
            Self::Spawn(err) => write!(f, "could not spawn participant thread: {}", err),
            Self::ParticipantPanicked(name) => write!(f, "{} panicked", name),
        }
    }
}

impl std::error::Error for SimulationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Spawn(err) => Some(err),
            Self::ParticipantPanicked(_) => None,
        }
    }
}

impl From<ConfigError> for SimulationError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<SimulationError> for Error {
    fn from(err: SimulationError) -> Self {
        let kind = match &err {
            SimulationError::Config(_) => ErrorKind::InvalidInput,
            SimulationError::Spawn(err) => err.kind(),
            SimulationError::ParticipantPanicked(_) => ErrorKind::Other,
        };
        Error::new(kind, err)
    }
}
