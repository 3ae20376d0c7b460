use crate::error::{Result, StoreError};
use crate::sender::SenderKey;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Timestamp width in record names. 20 digits covers the full u64
/// range, so lexicographic name order equals numeric timestamp order.
const TIMESTAMP_WIDTH: usize = 20;
const RECORD_SUFFIX: &str = ".json";

/// JSON body of a queue record. The timestamp lives in the file name,
/// not the body, so that a directory listing alone gives total order.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueueRecord {
    sender: SenderKey,
    message: String,
}

/// One pending inbound message, as read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    pub enqueued_at_ms: u64,
    pub sender: SenderKey,
    pub message: String,
    record_path: PathBuf,
}

impl QueueItem {
    pub fn record_name(&self) -> &str {
        self.record_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// Durable FIFO of pending inbound messages: one record per file under
/// the queue directory, named `<timestamp>_<sender>.json` so records
/// sort by `(enqueued_at, sender)`.
///
/// Many writers may enqueue concurrently (each enqueue creates a
/// uniquely named record); a single reader peeks and removes.
pub struct QueueStore {
    dir: PathBuf,
    // High-water mark for issued timestamps. Same-millisecond enqueues
    // get bumped forward so stamps from this process strictly increase.
    last_stamp_ms: Mutex<u64>,
}

impl QueueStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let store = Self {
            dir,
            last_stamp_ms: Mutex::new(0),
        };
        // Seed the high-water mark from records already on disk, so a
        // reopen under wall-clock regression cannot stamp a new record
        // earlier than a pending one.
        let mut high = 0u64;
        for name in store.sorted_record_names()? {
            if let Some((stamp_part, _)) = name.split_once('_') {
                if let Ok(stamp) = stamp_part.parse::<u64>() {
                    high = high.max(stamp);
                }
            }
        }
        *store.last_stamp_ms.lock().unwrap_or_else(|e| e.into_inner()) = high;
        Ok(store)
    }

    /// Persists a new queue record and returns it. The record is fully
    /// written and renamed into place before this returns; a crash
    /// after `enqueue` cannot lose the item.
    pub fn enqueue(&self, sender: &SenderKey, message: &str) -> Result<QueueItem> {
        let stamp = self.next_stamp_ms();
        let name = format!("{:0width$}_{}{}", stamp, sender, RECORD_SUFFIX, width = TIMESTAMP_WIDTH);
        let final_path = self.dir.join(&name);
        // Dot-prefixed temp file, then rename: readers never observe a
        // partially written record.
        let tmp_path = self.dir.join(format!(".{name}.tmp"));

        let record = QueueRecord {
            sender: sender.clone(),
            message: message.to_string(),
        };
        let body = serde_json::to_vec(&record)
            .map_err(|e| StoreError::malformed(&final_path, e.to_string()))?;
        std::fs::write(&tmp_path, &body).map_err(|e| StoreError::io(&tmp_path, e))?;
        std::fs::rename(&tmp_path, &final_path).map_err(|e| StoreError::io(&final_path, e))?;

        tracing::debug!(sender = %sender, record = %name, "queued inbound message");
        Ok(QueueItem {
            enqueued_at_ms: stamp,
            sender: sender.clone(),
            message: message.to_string(),
            record_path: final_path,
        })
    }

    /// The oldest pending item, without removing it. Records that fail
    /// to parse are unrecoverable garbage: deleted, logged at warn
    /// level, and skipped.
    pub fn peek_oldest(&self) -> Result<Option<QueueItem>> {
        for name in self.sorted_record_names()? {
            let path = self.dir.join(&name);
            match self.read_record(&path, &name) {
                Ok(item) => return Ok(Some(item)),
                Err(e) => {
                    tracing::warn!(record = %name, error = %e, "dropping malformed queue record");
                    if let Err(remove_err) = std::fs::remove_file(&path) {
                        if remove_err.kind() != std::io::ErrorKind::NotFound {
                            return Err(StoreError::io(&path, remove_err));
                        }
                    }
                }
            }
        }
        Ok(None)
    }

    /// Deletes a consumed record. Removing an already-removed item is a
    /// no-op, so a retried cycle can call this safely.
    pub fn remove(&self, item: &QueueItem) -> Result<()> {
        match std::fs::remove_file(&item.record_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(record = %item.record_name(), "queue record already removed");
                Ok(())
            }
            Err(e) => Err(StoreError::io(&item.record_path, e)),
        }
    }

    /// Number of pending records (malformed ones included until a peek
    /// sweeps them).
    pub fn pending(&self) -> Result<usize> {
        Ok(self.sorted_record_names()?.len())
    }

    fn next_stamp_ms(&self) -> u64 {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let mut last = self.last_stamp_ms.lock().unwrap_or_else(|e| e.into_inner());
        let stamp = now_ms.max(*last + 1);
        *last = stamp;
        stamp
    }

    fn sorted_record_names(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let mut names: Vec<String> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.ends_with(RECORD_SUFFIX) && !name.starts_with('.') {
                names.push(name);
            }
        }
        // Lexicographic sort; names carry zero-padded timestamps, so
        // this is (enqueued_at, sender) order.
        names.sort();
        Ok(names)
    }

    fn read_record(&self, path: &Path, name: &str) -> Result<QueueItem> {
        let stem = name
            .strip_suffix(RECORD_SUFFIX)
            .ok_or_else(|| StoreError::malformed(path, "missing .json suffix"))?;
        let (stamp_part, _) = stem
            .split_once('_')
            .ok_or_else(|| StoreError::malformed(path, "record name missing '_' separator"))?;
        let enqueued_at_ms: u64 = stamp_part
            .parse()
            .map_err(|_| StoreError::malformed(path, "record name has non-numeric timestamp"))?;

        let body = std::fs::read(path).map_err(|e| StoreError::io(path, e))?;
        let record: QueueRecord = serde_json::from_slice(&body)
            .map_err(|e| StoreError::malformed(path, e.to_string()))?;
        Ok(QueueItem {
            enqueued_at_ms,
            sender: record.sender,
            message: record.message,
            record_path: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, QueueStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = QueueStore::open(tmp.path().join("queue")).expect("open queue store");
        (tmp, store)
    }

    #[test]
    fn peek_returns_items_in_enqueue_order() {
        let (_tmp, store) = store();
        let a = SenderKey::sanitize("alice");
        let b = SenderKey::sanitize("bob");
        store.enqueue(&a, "first").unwrap();
        store.enqueue(&b, "second").unwrap();
        store.enqueue(&a, "third").unwrap();

        let first = store.peek_oldest().unwrap().expect("item");
        assert_eq!(first.sender, a);
        assert_eq!(first.message, "first");
        store.remove(&first).unwrap();

        let second = store.peek_oldest().unwrap().expect("item");
        assert_eq!(second.sender, b);
        assert_eq!(second.message, "second");
    }

    #[test]
    fn stamps_strictly_increase_within_a_process() {
        let (_tmp, store) = store();
        let sender = SenderKey::sanitize("rapid");
        let mut last = 0u64;
        for i in 0..50 {
            let item = store.enqueue(&sender, &format!("msg {i}")).unwrap();
            assert!(item.enqueued_at_ms > last, "stamp did not increase");
            last = item.enqueued_at_ms;
        }
    }

    #[test]
    fn equal_stamps_order_by_sender() {
        // Records from another process can carry the same timestamp;
        // the name's sender suffix breaks the tie.
        let (_tmp, store) = store();
        for sender in ["zed", "ann"] {
            let body = serde_json::json!({ "sender": sender, "message": "tied" });
            std::fs::write(
                store.dir.join(format!("{:020}_{sender}.json", 7_000u64)),
                serde_json::to_vec(&body).unwrap(),
            )
            .unwrap();
        }
        let first = store.peek_oldest().unwrap().expect("item");
        assert_eq!(first.sender.as_str(), "ann");
        assert_eq!(first.enqueued_at_ms, 7_000);
    }

    #[test]
    fn items_survive_store_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("queue");
        let sender = SenderKey::sanitize("durable");
        {
            let store = QueueStore::open(&dir).unwrap();
            store.enqueue(&sender, "survive me").unwrap();
        }
        let reopened = QueueStore::open(&dir).unwrap();
        let item = reopened.peek_oldest().unwrap().expect("item after reopen");
        assert_eq!(item.sender, sender);
        assert_eq!(item.message, "survive me");
        assert_eq!(reopened.pending().unwrap(), 1);
    }

    #[test]
    fn reopen_never_stamps_behind_existing_records() {
        // A pending record far in the future stands in for a restart
        // under wall-clock regression.
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("queue");
        let future_stamp = u64::MAX - 1;
        {
            let store = QueueStore::open(&dir).unwrap();
            let body = serde_json::json!({ "sender": "early", "message": "pending" });
            std::fs::write(
                store.dir.join(format!("{future_stamp:020}_early.json")),
                serde_json::to_vec(&body).unwrap(),
            )
            .unwrap();
        }
        let reopened = QueueStore::open(&dir).unwrap();
        let item = reopened
            .enqueue(&SenderKey::sanitize("late"), "after restart")
            .unwrap();
        assert!(item.enqueued_at_ms > future_stamp, "new stamp fell behind disk");

        let first = reopened.peek_oldest().unwrap().expect("item");
        assert_eq!(first.sender.as_str(), "early");
    }

    #[test]
    fn remove_is_idempotent() {
        let (_tmp, store) = store();
        let item = store
            .enqueue(&SenderKey::sanitize("once"), "hello")
            .unwrap();
        store.remove(&item).unwrap();
        store.remove(&item).expect("second remove is a no-op");
        assert!(store.peek_oldest().unwrap().is_none());
    }

    #[test]
    fn malformed_record_is_deleted_and_skipped() {
        let (_tmp, store) = store();
        let garbage = store.dir.join(format!("{:020}_junk.json", 1u64));
        std::fs::write(&garbage, b"{ not json").unwrap();
        let good = store
            .enqueue(&SenderKey::sanitize("good"), "valid")
            .unwrap();

        let peeked = store.peek_oldest().unwrap().expect("valid item");
        assert_eq!(peeked.message, "valid");
        assert_eq!(peeked.sender, good.sender);
        assert!(!garbage.exists(), "garbage record should be deleted");
    }

    #[test]
    fn bad_record_name_is_treated_as_malformed() {
        let (_tmp, store) = store();
        std::fs::write(store.dir.join("no-separator.json"), b"{}").unwrap();
        assert!(store.peek_oldest().unwrap().is_none());
        assert_eq!(store.pending().unwrap(), 0);
    }

    #[test]
    fn temp_files_are_invisible_to_peek() {
        let (_tmp, store) = store();
        std::fs::write(store.dir.join(".00000000000000000001_x.json.tmp"), b"{").unwrap();
        assert!(store.peek_oldest().unwrap().is_none());
    }
}
