//! Table of commands waiting for a Cinema 4D response

use crate::protocol::ApplicationResponse;
use c4d_mcp_core::{BridgeError, Result};
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Channel a waiting caller receives its response on
pub type Waiter = oneshot::Sender<Result<ApplicationResponse>>;

struct PendingEntry {
    /// Connection the frame was written on
    epoch: u64,
    waiter: Waiter,
}

/// Correlation tag -> waiting caller
///
/// Each tag leaves the table exactly once: by `complete`, `cancel`,
/// `fail_epoch` or `fail_all`. Whichever runs first wins and the others
/// see the tag as absent.
#[derive(Default)]
pub struct PendingTable {
    entries: HashMap<u64, PendingEntry>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter; a tag that is still pending is refused
    pub fn insert(&mut self, tag: u64, epoch: u64, waiter: Waiter) -> Result<()> {
        if self.entries.contains_key(&tag) {
            return Err(BridgeError::Encoding(format!(
                "correlation tag {} is already pending",
                tag
            )));
        }
        self.entries.insert(tag, PendingEntry { epoch, waiter });
        Ok(())
    }

    /// Hand a response to the caller waiting on `tag`
    ///
    /// Returns false when nobody is waiting (late, stale or duplicate frame).
    pub fn complete(&mut self, tag: u64, response: ApplicationResponse) -> bool {
        match self.entries.remove(&tag) {
            Some(entry) => {
                // The caller may have given up between removal and send
                let _ = entry.waiter.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Forget a caller that stopped waiting
    pub fn cancel(&mut self, tag: u64) -> bool {
        self.entries.remove(&tag).is_some()
    }

    /// Fail every caller whose frame went out on connection `epoch`
    pub fn fail_epoch(&mut self, epoch: u64, error: impl Fn() -> BridgeError) -> usize {
        let tags: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.epoch == epoch)
            .map(|(tag, _)| *tag)
            .collect();

        for tag in &tags {
            if let Some(entry) = self.entries.remove(tag) {
                let _ = entry.waiter.send(Err(error()));
            }
        }
        tags.len()
    }

    /// Fail every caller
    pub fn fail_all(&mut self, error: impl Fn() -> BridgeError) -> usize {
        let count = self.entries.len();
        for (_, entry) in self.entries.drain() {
            let _ = entry.waiter.send(Err(error()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
