//! Registry of connected datapaths

use crate::models::DatapathId;
use std::collections::BTreeSet;
use tracing::debug;

/// Tracks which switches currently hold a control connection
#[derive(Debug, Default)]
pub struct SwitchRegistry {
    datapaths: BTreeSet<DatapathId>,
}

impl SwitchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a datapath. Returns false if it was already present.
    pub fn register(&mut self, datapath_id: DatapathId) -> bool {
        let added = self.datapaths.insert(datapath_id);
        if added {
            debug!(datapath_id, "Registering datapath");
        }
        added
    }

    /// Unregister a datapath. Returns false if it was not present.
    pub fn unregister(&mut self, datapath_id: DatapathId) -> bool {
        let removed = self.datapaths.remove(&datapath_id);
        if removed {
            debug!(datapath_id, "Unregistering datapath");
        }
        removed
    }

    /// Currently connected datapaths, in ascending id order
    pub fn active(&self) -> Vec<DatapathId> {
        self.datapaths.iter().copied().collect()
    }

    pub fn contains(&self, datapath_id: DatapathId) -> bool {
        self.datapaths.contains(&datapath_id)
    }

    pub fn len(&self) -> usize {
        self.datapaths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datapaths.is_empty()
    }
}
