//! Workspace capabilities injected into the Transform and Load stages.

use crate::store::{DirectoryWorkspaceFactory, WorkspaceFactory};
use std::sync::Arc;

/// The two stores a stage may touch: the staged replica and the destination.
#[derive(Clone)]
pub struct StorePorts {
    /// Opens staged datasets by their location.
    pub staging: Arc<dyn WorkspaceFactory>,
    /// Opens the destination by its connection.
    pub destination: Arc<dyn WorkspaceFactory>,
}

impl std::fmt::Debug for StorePorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorePorts")
            .field("staging", &self.staging)
            .field("destination", &self.destination)
            .finish()
    }
}

impl StorePorts {
    /// Creates ports from two factories.
    #[must_use]
    pub fn new(staging: Arc<dyn WorkspaceFactory>, destination: Arc<dyn WorkspaceFactory>) -> Self {
        Self {
            staging,
            destination,
        }
    }

    /// Uses one factory for both stores.
    #[must_use]
    pub fn shared(factory: Arc<dyn WorkspaceFactory>) -> Self {
        Self {
            staging: Arc::clone(&factory),
            destination: factory,
        }
    }
}

impl Default for StorePorts {
    fn default() -> Self {
        Self::shared(Arc::new(DirectoryWorkspaceFactory))
    }
}
