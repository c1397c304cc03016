//! Registry of symmetric keys by id.

use std::collections::HashMap;

use crate::lock::ResourceLock;
use crate::types::CourierError;

/// Maps opaque key ids to raw key bytes. Safe for concurrent use without
/// external locking; keys are provisioned by the embedding application
/// and never generated or rotated here; cycling is a caller
/// responsibility.
#[derive(Debug, Default)]
pub struct KeyRing {
    keys: ResourceLock<HashMap<String, Vec<u8>>>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self {
            keys: ResourceLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) the key bytes for an id.
    pub fn add_key(&self, id: impl Into<String>, key: impl Into<Vec<u8>>) {
        let (id, key) = (id.into(), key.into());
        self.keys.run_with_lock(|keys| {
            keys.insert(id, key);
        });
    }

    /// Resolve an optional key id. `None` means the unencrypted path and
    /// resolves to `Ok(None)`; an id with no registered bytes is
    /// [`CourierError::UnknownKey`].
    pub fn key_for_id(&self, id: Option<&str>) -> Result<Option<Vec<u8>>, CourierError> {
        let Some(id) = id else {
            return Ok(None);
        };
        self.keys.run_with_lock(|keys| {
            keys.get(id)
                .cloned()
                .map(Some)
                .ok_or_else(|| CourierError::UnknownKey(id.to_string()))
        })
    }
}
