//! Error taxonomy for the state transition machine.
//!
//! Every failure the engine can produce is a [`StmError`]. Callers that only
//! need to decide how to respond use [`StmError::kind`], which folds the
//! variants into the four classes clients and operators care about.

use crate::expr::EvalError;

/// Coarse classification of an [`StmError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or inconsistent configuration. Fatal to a load attempt only.
    Config,
    /// The actor lacks a role permitting the write in the entity's state.
    NotAllowed,
    /// The value (or attribute name) supplied by the client is unusable.
    InvalidValue,
    /// Corrupt entity, misconfigured cycle or evaluator fault.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "CONFIG_ERROR",
            Self::NotAllowed => "NOT_ALLOWED",
            Self::InvalidValue => "INVALID_VALUE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StmError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(
        "attribute '{attribute}' is not allowed to be set by roles [{roles}] for nft with state '{state}'"
    )]
    NotAllowed {
        attribute: String,
        state: String,
        roles: String,
    },

    #[error("invalid value for attribute '{attribute}': {reason}")]
    InvalidValue { attribute: String, reason: String },

    #[error("unknown attribute '{0}'")]
    UnknownAttribute(String),

    #[error("nft is in unknown state '{0}'")]
    UnknownState(String),

    #[error("transition cycle detected: {}", .path.join(" -> "))]
    TransitionCycle { path: Vec<String> },

    #[error("expression evaluation failed: {0}")]
    Eval(#[from] EvalError),
}

impl StmError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::NotAllowed { .. } => ErrorKind::NotAllowed,
            // An unknown attribute is reported to clients as a bad value.
            Self::InvalidValue { .. } | Self::UnknownAttribute(_) => ErrorKind::InvalidValue,
            Self::UnknownState(_) | Self::TransitionCycle { .. } | Self::Eval(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Message safe to hand to a client. Internal errors carry no detail.
    pub fn client_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "internal error".to_string(),
            _ => self.to_string(),
        }
    }

    pub(crate) fn invalid(attribute: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            attribute: attribute.to_string(),
            reason: reason.into(),
        }
    }
}

pub type StmResult<T> = std::result::Result<T, StmError>;
