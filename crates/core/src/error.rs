use std::time::Duration;

use thiserror::Error;

use crate::types::ChatMode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The input surface could not be opened or confirmed.
    #[error("channel unavailable: {reason}")]
    ChannelUnavailable { reason: String },

    #[error("could not reach {target} mode (last seen: {last})")]
    ModeUnreachable { target: ChatMode, last: ChatMode },

    /// The command was submitted but no differing output appeared.
    #[error("no response to '{command}' after {waited:?}")]
    NoResponseObserved { command: String, waited: Duration },

    #[error("label '{label}' no longer matches its cached region and a re-scan was inconclusive")]
    RecognitionAmbiguous { label: String },

    #[error("label '{label}' moved or disappeared")]
    StalePosition { label: String },

    #[error("command rejected: {0}")]
    InvalidCommand(String),

    #[error("platform: {0}")]
    Platform(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

/// Which escalation counter an error feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Soft,
    Hard,
}

impl Error {
    pub fn counter(&self) -> Option<Counter> {
        match self {
            Error::ChannelUnavailable { .. } | Error::ModeUnreachable { .. } => Some(Counter::Soft),
            Error::NoResponseObserved { .. } => Some(Counter::Hard),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Platform(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Platform(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_mapping() {
        let unavailable = Error::ChannelUnavailable { reason: "closed".into() };
        let mode = Error::ModeUnreachable { target: ChatMode::Global, last: ChatMode::Local };
        let silent = Error::NoResponseObserved { command: "#ListPlayers true".into(), waited: Duration::from_secs(1) };
        assert_eq!(unavailable.counter(), Some(Counter::Soft));
        assert_eq!(mode.counter(), Some(Counter::Soft));
        assert_eq!(silent.counter(), Some(Counter::Hard));
        assert_eq!(Error::StalePosition { label: "x".into() }.counter(), None);
        assert_eq!(Error::Fatal("no launcher".into()).counter(), None);
    }
}
