//! Channel ID allocation and handle registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::channel::ChannelHandle;
use crate::error::{Error, Result};

/// Registry of live channels, keyed by channel ID.
///
/// IDs are allocated sequentially ascending from 1; after a wrap the
/// cursor skips IDs still in use. All operations hold one internal
/// lock, never across an await point.
pub(crate) struct ChannelRegistry {
    inner: Mutex<RegistryInner>,
}

struct RegistryInner {
    channels: HashMap<u16, Arc<ChannelHandle>>,
    cursor: u16,
    limit: u16,
}

impl ChannelRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                channels: HashMap::new(),
                cursor: 0,
                limit: u16::MAX,
            }),
        }
    }

    /// Apply the negotiated channel cap. 0 keeps the protocol maximum.
    pub(crate) fn set_limit(&self, limit: u16) {
        let mut inner = self.inner.lock().unwrap();
        inner.limit = if limit == 0 { u16::MAX } else { limit };
    }

    /// Allocate the next free channel ID in `1..=limit`.
    pub(crate) fn next(&self) -> Result<u16> {
        let mut inner = self.inner.lock().unwrap();
        if inner.channels.len() >= inner.limit as usize {
            return Err(Error::channel_max());
        }
        loop {
            inner.cursor = if inner.cursor >= inner.limit {
                1
            } else {
                inner.cursor + 1
            };
            if !inner.channels.contains_key(&inner.cursor) {
                return Ok(inner.cursor);
            }
        }
    }

    pub(crate) fn add(&self, id: u16, handle: Arc<ChannelHandle>) {
        self.inner.lock().unwrap().channels.insert(id, handle);
    }

    pub(crate) fn get(&self, id: u16) -> Option<Arc<ChannelHandle>> {
        self.inner.lock().unwrap().channels.get(&id).cloned()
    }

    pub(crate) fn remove(&self, id: u16) -> Option<Arc<ChannelHandle>> {
        self.inner.lock().unwrap().channels.remove(&id)
    }

    /// Atomically empty the registry and return every live handle.
    pub(crate) fn remove_all(&self) -> Vec<Arc<ChannelHandle>> {
        let mut inner = self.inner.lock().unwrap();
        inner.channels.drain().map(|(_, handle)| handle).collect()
    }
}
