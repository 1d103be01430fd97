//! Per-key flash feedback
//!
//! After a dispatch a key flashes success or failure, then reverts to its
//! normal face. Each key owns at most one pending revert task. A newer press
//! aborts the old task and bumps the key's epoch, so a revert that already
//! woke up still refuses to clear the newer flash.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::dispatch::DispatchResult;
use crate::error::ErrorKind;

/// Default flash length
pub const DEFAULT_FLASH: Duration = Duration::from_millis(100);

/// Visual phase of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FeedbackPhase {
    #[default]
    Normal,
    FlashSuccess,
    FlashFailure,
}

/// Published to the renderer whenever a key changes phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackUpdate {
    pub key_no: u32,
    pub phase: FeedbackPhase,
    pub error: Option<ErrorKind>,
}

struct KeyFlash {
    phase: FeedbackPhase,
    error: Option<ErrorKind>,
    epoch: u64,
    deadline: Instant,
    revert: JoinHandle<()>,
}

pub struct FeedbackController {
    keys: Arc<DashMap<u32, KeyFlash>>,
    epoch: AtomicU64,
    flash: Duration,
    updates: mpsc::UnboundedSender<FeedbackUpdate>,
}

impl FeedbackController {
    /// Create a controller and the receiver the renderer drains
    pub fn new(flash: Duration) -> (Self, mpsc::UnboundedReceiver<FeedbackUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = Self {
            keys: Arc::new(DashMap::new()),
            epoch: AtomicU64::new(0),
            flash,
            updates: tx,
        };
        (controller, rx)
    }

    pub fn flash_duration(&self) -> Duration {
        self.flash
    }

    /// Start a flash for `key_no` and schedule its revert.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_result(&self, key_no: u32, result: DispatchResult) {
        let phase = if result.success {
            FeedbackPhase::FlashSuccess
        } else {
            FeedbackPhase::FlashFailure
        };
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed) + 1;
        let deadline = Instant::now() + self.flash;

        // Hold the entry while spawning so the revert cannot observe the map
        // before the new flash is in place
        let entry = self.keys.entry(key_no);
        let flash = KeyFlash {
            phase,
            error: result.error,
            epoch,
            deadline,
            revert: self.spawn_revert(key_no, epoch, deadline),
        };

        let _ = self.updates.send(FeedbackUpdate {
            key_no,
            phase,
            error: result.error,
        });

        match entry {
            Entry::Occupied(mut occupied) => {
                let prev = occupied.insert(flash);
                prev.revert.abort();
                trace!("Key {} flash superseded (epoch {} -> {})", key_no, prev.epoch, epoch);
            },
            Entry::Vacant(vacant) => {
                vacant.insert(flash);
            },
        }
    }

    fn spawn_revert(&self, key_no: u32, epoch: u64, deadline: Instant) -> JoinHandle<()> {
        let keys = self.keys.clone();
        let updates = self.updates.clone();

        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;

            // Only the latest flash for this key may revert it
            if keys.remove_if(&key_no, |_, flash| flash.epoch == epoch).is_some() {
                debug!("Key {} reverted to normal", key_no);
                let _ = updates.send(FeedbackUpdate {
                    key_no,
                    phase: FeedbackPhase::Normal,
                    error: None,
                });
            }
        })
    }

    /// Current phase of a key
    pub fn phase(&self, key_no: u32) -> FeedbackPhase {
        self.keys
            .get(&key_no)
            .map(|flash| flash.phase)
            .unwrap_or_default()
    }

    /// Error carried by a key's failure flash
    pub fn error(&self, key_no: u32) -> Option<ErrorKind> {
        self.keys.get(&key_no).and_then(|flash| flash.error)
    }

    /// When the key's current flash ends
    pub fn revert_deadline(&self, key_no: u32) -> Option<Instant> {
        self.keys.get(&key_no).map(|flash| flash.deadline)
    }
}

impl Drop for FeedbackController {
    fn drop(&mut self) {
        for flash in self.keys.iter() {
            flash.revert.abort();
        }
    }
}
