use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Timed out after {elapsed:?} waiting for {condition}")]
    Timeout { condition: String, elapsed: Duration },

    #[error("Driver fault: {0}")]
    Driver(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("CDP error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error should abort a polling loop instead of being retried.
    ///
    /// Launch failures and a torn-down session cannot heal by waiting; everything
    /// else is treated as a transient driver fault and retried up to the deadline.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Launch(_) | Error::SessionClosed)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
