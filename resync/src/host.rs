//! The environment the pipeline runs inside.
//!
//! An interactive host (a desktop GIS session, say) may already hold a
//! signed-in portal token, and expects failures as an execution error rather
//! than a process exit. A standalone invocation has neither.

use std::fmt::Debug;

/// Capabilities the hosting environment provides.
pub trait HostSession: Send + Sync + Debug {
    /// A portal token the host is already signed in with.
    fn signin_token(&self) -> Option<String>;

    /// Whether the host expects a host-native execution error on failure.
    fn is_interactive(&self) -> bool;
}

/// Command line invocation: no ambient token, failures end the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandaloneHost;

impl HostSession for StandaloneHost {
    fn signin_token(&self) -> Option<String> {
        None
    }

    fn is_interactive(&self) -> bool {
        false
    }
}

/// An embedding host, optionally signed in.
#[derive(Debug, Clone, Default)]
pub struct InteractiveHost {
    token: Option<String>,
}

impl InteractiveHost {
    /// Creates a host with no signed-in session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a host signed in with `token`.
    #[must_use]
    pub fn signed_in(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }
}

impl HostSession for InteractiveHost {
    fn signin_token(&self) -> Option<String> {
        self.token.clone()
    }

    fn is_interactive(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hosts() {
        assert!(!StandaloneHost.is_interactive());
        assert!(StandaloneHost.signin_token().is_none());

        let host = InteractiveHost::signed_in("abc");
        assert!(host.is_interactive());
        assert_eq!(host.signin_token().as_deref(), Some("abc"));
        assert!(InteractiveHost::new().signin_token().is_none());
    }
}
