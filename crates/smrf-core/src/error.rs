//! Error kinds surfaced by the distribution pipeline.
//!
//! Every failure is fatal for the run. Variants carry the originating variable
//! and time step where one exists so the driver can report them.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SmrfError>;

#[derive(Debug, Error)]
pub enum SmrfError {
    /// Unknown option, missing key or shape mismatch detected at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Observations cannot support the requested run.
    #[error("input error for {variable} at {time}: {message}")]
    Input {
        variable: String,
        time: String,
        message: String,
    },

    /// Every station value was missing for a time step.
    #[error("all station values are NaN for {variable} at {time}")]
    AllNaN { variable: String, time: String },

    /// A kernel could not solve or produced non-finite output.
    #[error("numeric error in {variable}: {message}")]
    Numeric { variable: String, message: String },

    /// An iterative solver ran out of evaluations.
    #[error("convergence failure: {message}")]
    Convergence { message: String },

    /// A queue `get` or `put` exceeded the configured timeout.
    #[error("timed out waiting on queue {queue} at {time}")]
    Timeout { queue: String, time: String },

    /// The run was stopped because another worker failed.
    #[error("run cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(String),
}

impl SmrfError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn numeric(variable: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Numeric {
            variable: variable.into(),
            message: message.into(),
        }
    }

    pub fn input(variable: impl Into<String>, time: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Input {
            variable: variable.into(),
            time: time.into(),
            message: message.into(),
        }
    }

    /// Short tag used in the final log line of a failed run.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Input { .. } | Self::AllNaN { .. } => "input",
            Self::Numeric { .. } => "numeric",
            Self::Convergence { .. } => "convergence",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::Io(_) | Self::Parse(_) => "io",
        }
    }

    /// Attach the variable and time step to errors raised below the
    /// distributor layer, which know neither.
    pub fn at(self, variable: &str, time: &str) -> Self {
        match self {
            Self::AllNaN { variable: v, .. } if v.is_empty() => Self::AllNaN {
                variable: variable.to_string(),
                time: time.to_string(),
            },
            Self::Numeric { variable: v, message } if v.is_empty() => Self::Numeric {
                variable: variable.to_string(),
                message: format!("{message} at {time}"),
            },
            Self::Convergence { message } => Self::Convergence {
                message: format!("{variable} at {time}: {message}"),
            },
            other => other,
        }
    }
}

impl From<serde_json::Error> for SmrfError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

impl From<chrono::ParseError> for SmrfError {
    fn from(e: chrono::ParseError) -> Self {
        Self::Parse(e.to_string())
    }
}
