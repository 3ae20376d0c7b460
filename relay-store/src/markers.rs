use crate::error::{Result, StoreError};
use crate::sender::SenderKey;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// One durable record per sender meaning "advertising message already
/// sent": `<dir>/<sender>.sent`.
///
/// The marker is written before the send is attempted. A crash between
/// marking and sending loses that one send, but the broadcast can never
/// double-deliver, which is the trade chosen here.
pub struct MarkerStore {
    dir: PathBuf,
}

impl MarkerStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        Ok(Self { dir })
    }

    fn marker_path(&self, sender: &SenderKey) -> PathBuf {
        self.dir.join(format!("{sender}.sent"))
    }

    /// Atomically creates the marker. Returns `false` when the sender
    /// was already marked, `true` when this call created the marker and
    /// the caller may proceed with the send.
    pub fn mark_if_new(&self, sender: &SenderKey) -> Result<bool> {
        let path = self.marker_path(sender);
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        let marked_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        file.write_all(format!("{marked_at_ms}\n").as_bytes())
            .map_err(|e| StoreError::io(&path, e))?;
        Ok(true)
    }

    pub fn is_marked(&self, sender: &SenderKey) -> bool {
        self.marker_path(sender).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_mark_wins_second_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MarkerStore::open(tmp.path().join("markers")).unwrap();
        let sender = SenderKey::sanitize("911234567890");

        assert!(!store.is_marked(&sender));
        assert!(store.mark_if_new(&sender).unwrap());
        assert!(store.is_marked(&sender));
        assert!(!store.mark_if_new(&sender).unwrap());
    }

    #[test]
    fn markers_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("markers");
        let sender = SenderKey::sanitize("persist");
        {
            let store = MarkerStore::open(&dir).unwrap();
            assert!(store.mark_if_new(&sender).unwrap());
        }
        let reopened = MarkerStore::open(&dir).unwrap();
        assert!(!reopened.mark_if_new(&sender).unwrap());
    }
}
