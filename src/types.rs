// src/types.rs

use std::fmt;

/// How a worker process should be stopped.
///
/// - `Graceful`: close the worker's stdin and give it a moment to exit on its
///   own before falling back to a kill.
/// - `Force`: kill the process immediately. The provider always uses this
///   when it discards a retained process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Graceful,
    Force,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationSignal::Graceful => f.write_str("graceful"),
            TerminationSignal::Force => f.write_str("force"),
        }
    }
}

/// Result of a single run executed against a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The worker answered normally; carries the response line.
    Success(String),
    /// The worker reported a failed attempt but is still alive.
    Failed(String),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success(_))
    }

    pub fn response(&self) -> &str {
        match self {
            RunOutcome::Success(line) | RunOutcome::Failed(line) => line,
        }
    }
}
