use std::sync::{Arc, RwLock};

use crate::error::SnapshotError;
use crate::types::Reading;

/// Latest published reading, shared between the poller and any number of readers.
///
/// Readers always get a copy of one whole reading; a query never touches the bus.
#[derive(Clone, Default)]
pub struct Snapshot {
    latest: Arc<RwLock<Option<Reading>>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, reading: Reading) {
        // A poisoned lock only means a reader panicked while copying, the value is intact
        let mut latest = self.latest.write().unwrap_or_else(|e| e.into_inner());
        *latest = Some(reading);
    }

    pub fn latest(&self) -> Result<Reading, SnapshotError> {
        let latest = self.latest.read().unwrap_or_else(|e| e.into_inner());
        (*latest).ok_or(SnapshotError::NoData)
    }

    pub fn query(&self) -> Result<String, SnapshotError> {
        self.latest().map(|reading| reading.to_string())
    }
}
