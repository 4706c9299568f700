//! Error types surfaced by the provider and the session manager.
//!
//! Provider and session failures are values, never panics. Config and CLI
//! plumbing use `anyhow` instead.

use thiserror::Error;

/// Failure reported by an identity or storage provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The backend answered with a non-success status.
    #[error("{operation} failed (HTTP {status}): {message}")]
    Rejected {
        operation: &'static str,
        status: u16,
        message: String,
    },
    /// The request never produced a usable response.
    #[error("{operation} failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },
    /// An authenticated call was made without a session.
    #[error("{operation} requires an active session")]
    NoSession { operation: &'static str },
}

impl ProviderError {
    pub fn rejected(operation: &'static str, status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            operation,
            status,
            message: message.into(),
        }
    }

    pub fn transport(operation: &'static str, message: impl std::fmt::Display) -> Self {
        Self::Transport {
            operation,
            message: message.to_string(),
        }
    }
}

/// Failure returned by a `SessionManager` operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Sign-up registered the identity but the profile row was not created.
    /// The provider keeps the identity; nothing is rolled back.
    #[error("account created but profile could not be saved: {0}")]
    ProfileCreate(ProviderError),

    /// Profile could not be loaded for the current identity.
    #[error("profile could not be loaded: {0}")]
    ProfileFetch(ProviderError),

    #[error("file is {size} bytes, the limit is {limit} bytes")]
    AssetTooLarge { size: usize, limit: usize },

    #[error("not signed in")]
    NotSignedIn,

    /// The manager was disposed before the operation completed.
    #[error("session manager is closed")]
    Closed,
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;
