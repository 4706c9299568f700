//! Warga core library (identity session, role-gated navigation, backend
//! provider, config).

pub mod assets;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod navigation;
pub mod provider;
pub mod session;

pub use error::{ProviderError, SessionError};
pub use navigation::{NavigationController, Page, View};
pub use session::{SessionManager, SessionOptions, SessionState};
