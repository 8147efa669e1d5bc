//! Unified error taxonomy for the SIP signaling engine.
//!
//! Each variant corresponds to one failure kind with its own propagation
//! policy (never fatal to the server, surfaced as a response, or logged and
//! dropped). Callers match on the variant to decide what to do; the engine
//! itself never panics on malformed input or a missing peer.

use std::fmt;

/// Unified error type for the signaling engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SipError {
    /// Malformed SIP text. Logged with the raw body; no response is
    /// emitted, since a well-formed response cannot safely be built.
    Parse {
        message: String,
        context: Option<String>,
    },

    /// Account not found, digest mismatch, or missing challenge. Surfaced
    /// as a 401 Unauthorized to the peer; never fatal to the server.
    Auth { reason: String },

    /// Persistence failure during challenge issuance or verification.
    /// Logged; the request is dropped and the peer will retry.
    Registration { reason: String },

    /// In-dialog message with no matching Call-ID. Surfaced as 481 for
    /// requests; logged for stray responses.
    UnknownDialog { call_id: String },

    /// Scenario configuration names a program-id with no matching Program.
    UnknownProgram { program_id: String },

    /// Scenario configuration is absent or has no root program.
    EmptyScenario,

    /// Transport send failure. Logged; no retry at this layer.
    Transport { reason: String },

    /// Per-message deadline elapsed before the handler chain finished.
    DeadlineExceeded,

    /// Persistent-store I/O error, surfaced by a `Store` implementation.
    Store { reason: String },
}

impl fmt::Display for SipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SipError::Parse { message, context } => {
                write!(f, "parse error: {message}")?;
                if let Some(ctx) = context {
                    write!(f, " ({ctx})")?;
                }
                Ok(())
            }
            SipError::Auth { reason } => write!(f, "authentication error: {reason}"),
            SipError::Registration { reason } => write!(f, "registration error: {reason}"),
            SipError::UnknownDialog { call_id } => {
                write!(f, "unknown dialog for Call-ID {call_id}")
            }
            SipError::UnknownProgram { program_id } => {
                write!(f, "unknown program id {program_id}")
            }
            SipError::EmptyScenario => write!(f, "scenario has no programs configured"),
            SipError::Transport { reason } => write!(f, "transport error: {reason}"),
            SipError::DeadlineExceeded => write!(f, "per-message deadline exceeded"),
            SipError::Store { reason } => write!(f, "store error: {reason}"),
        }
    }
}

impl std::error::Error for SipError {}

impl SipError {
    pub fn parse(message: impl Into<String>) -> Self {
        SipError::Parse {
            message: message.into(),
            context: None,
        }
    }

    pub fn parse_with_context(message: impl Into<String>, context: impl Into<String>) -> Self {
        SipError::Parse {
            message: message.into(),
            context: Some(context.into()),
        }
    }

    pub fn auth(reason: impl Into<String>) -> Self {
        SipError::Auth {
            reason: reason.into(),
        }
    }

    pub fn registration(reason: impl Into<String>) -> Self {
        SipError::Registration {
            reason: reason.into(),
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        SipError::Transport {
            reason: reason.into(),
        }
    }

    pub fn store(reason: impl Into<String>) -> Self {
        SipError::Store {
            reason: reason.into(),
        }
    }

    /// Whether the underlying operation is safe to let the peer retry,
    /// rather than treating it as fatal to the server process.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SipError::EmptyScenario)
    }

    /// Status code to answer a request with, when this error must be
    /// surfaced to the peer rather than only logged.
    pub fn as_status_code(&self) -> Option<u16> {
        match self {
            SipError::Auth { .. } => Some(401),
            SipError::UnknownDialog { .. } => Some(481),
            SipError::UnknownProgram { .. } | SipError::EmptyScenario => Some(500),
            SipError::DeadlineExceeded => Some(500),
            SipError::Parse { .. }
            | SipError::Registration { .. }
            | SipError::Transport { .. }
            | SipError::Store { .. } => None,
        }
    }
}

/// Result type for signaling-engine operations.
pub type SipResult<T> = Result<T, SipError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(SipError::auth("bad digest").as_status_code(), Some(401));
        assert_eq!(
            SipError::UnknownDialog {
                call_id: "abc".into()
            }
            .as_status_code(),
            Some(481)
        );
        assert_eq!(SipError::EmptyScenario.as_status_code(), Some(500));
        assert_eq!(SipError::parse("bad").as_status_code(), None);
    }

    #[test]
    fn display_includes_context() {
        let e = SipError::parse_with_context("missing Via", "first line");
        assert!(e.to_string().contains("missing Via"));
        assert!(e.to_string().contains("first line"));
    }
}
