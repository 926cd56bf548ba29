//! Error taxonomy for the overlay client.
//!
//! Every variant is recoverable: callers catch errors at the action boundary,
//! record them in the event log and return the session to a retryable state.

pub type OverlayResult<T> = Result<T, OverlayError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum OverlayError {
    /// Local configuration problem (no video source, no tool when one is required).
    #[error("config error: {0}")]
    Config(String),

    /// An enabled tool is missing a required field.
    #[error("validation error: {0}")]
    Validation(String),

    /// A lifecycle operation was attempted while another one owns the session.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Non-2xx backend response or failed round trip.
    #[error("backend error: {message}")]
    Backend { message: String },

    /// Media feed or metadata channel dropped after being established.
    #[error("transport error: {0}")]
    Transport(String),

    /// A user action that the current session state does not accept.
    #[error("cannot {action} while {state}")]
    InvalidState { action: &'static str, state: String },

    /// Malformed metadata message.
    #[error("decode error: {0}")]
    Decode(String),
}

impl OverlayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Local, pre-network errors the user can fix inline.
    pub fn is_user_correctable(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(OverlayError::config("x").to_string().starts_with("config error:"));
        assert!(OverlayError::validation("x")
            .to_string()
            .starts_with("validation error:"));
        assert!(OverlayError::conflict("x").to_string().starts_with("conflict:"));
        assert_eq!(
            OverlayError::backend("Session not found.").to_string(),
            "backend error: Session not found."
        );
    }

    #[test]
    fn only_local_errors_are_user_correctable() {
        assert!(OverlayError::config("x").is_user_correctable());
        assert!(OverlayError::validation("x").is_user_correctable());
        assert!(!OverlayError::backend("x").is_user_correctable());
        assert!(!OverlayError::transport("x").is_user_correctable());
    }
}
