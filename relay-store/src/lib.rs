//! Durable state for the relay bot: per-sender transcripts, the
//! pending-message queue, and advertising markers.
//!
//! Everything here is filesystem-as-database: one record per file,
//! append-only transcripts, atomic creates. No entity is mutated in
//! place except by append, which is what makes a restart safe without
//! transactions.

mod error;
mod history;
mod markers;
mod queue;
mod sender;

pub use error::{Result, StoreError};
pub use history::{HistoryStore, Role, Turn};
pub use markers::MarkerStore;
pub use queue::{QueueItem, QueueStore};
pub use sender::SenderKey;

use std::path::{Path, PathBuf};

/// All three stores rooted at one base directory:
/// `<base>/<sender>.txt` transcripts, `<base>/queue/` records,
/// `<base>/markers/` advertising markers.
pub struct Storage {
    base_dir: PathBuf,
    pub history: HistoryStore,
    pub queue: QueueStore,
    pub markers: MarkerStore,
}

impl Storage {
    /// Creates the on-disk layout. An uncreatable directory is fatal to
    /// startup; callers propagate the error rather than recovering.
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let history = HistoryStore::open(&base_dir)?;
        let queue = QueueStore::open(base_dir.join("queue"))?;
        let markers = MarkerStore::open(base_dir.join("markers"))?;
        Ok(Self {
            base_dir,
            history,
            queue,
            markers,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}
