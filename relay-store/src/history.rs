use crate::error::{Result, StoreError};
use crate::sender::SenderKey;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

const USER_PREFIX: &str = "user: ";
const ASSISTANT_PREFIX: &str = "assistant: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn prefix(self) -> &'static str {
        match self {
            Role::User => USER_PREFIX,
            Role::Assistant => ASSISTANT_PREFIX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// Append-only per-sender transcript: `<base>/<sender>.txt`, one
/// `user: ` / `assistant: ` prefixed line per turn. Lines without a
/// recognized prefix are continuations of the previous turn, so
/// multi-line messages survive a read back. Turns are never rewritten
/// or deleted.
pub struct HistoryStore {
    base_dir: PathBuf,
}

impl HistoryStore {
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir).map_err(|e| StoreError::io(&base_dir, e))?;
        Ok(Self { base_dir })
    }

    fn transcript_path(&self, sender: &SenderKey) -> PathBuf {
        self.base_dir.join(format!("{sender}.txt"))
    }

    /// Full transcript for a sender, oldest turn first. Unknown senders
    /// read as an empty transcript.
    pub fn read(&self, sender: &SenderKey) -> Result<Vec<Turn>> {
        let path = self.transcript_path(sender);
        let contents = match std::fs::read_to_string(&path) {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        let mut turns: Vec<Turn> = Vec::new();
        for line in contents.lines() {
            if let Some(text) = line.strip_prefix(USER_PREFIX) {
                turns.push(Turn {
                    role: Role::User,
                    text: text.to_string(),
                });
            } else if let Some(text) = line.strip_prefix(ASSISTANT_PREFIX) {
                turns.push(Turn {
                    role: Role::Assistant,
                    text: text.to_string(),
                });
            } else if let Some(last) = turns.last_mut() {
                last.text.push('\n');
                last.text.push_str(line);
            }
            // A continuation line before any turn has nothing to attach
            // to; dropped.
        }
        Ok(turns)
    }

    pub fn append_user(&self, sender: &SenderKey, text: &str) -> Result<()> {
        self.append(sender, Role::User, text)
    }

    pub fn append_assistant(&self, sender: &SenderKey, text: &str) -> Result<()> {
        self.append(sender, Role::Assistant, text)
    }

    fn append(&self, sender: &SenderKey, role: Role, text: &str) -> Result<()> {
        let path = self.transcript_path(sender);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        // One write_all per turn keeps the append atomic from this
        // process's point of view.
        let line = format!("{}{}\n", role.prefix(), text);
        file.write_all(line.as_bytes())
            .map_err(|e| StoreError::io(&path, e))?;
        Ok(())
    }

    /// Transcript rendered the way it is stored, for prompt assembly.
    pub fn render(turns: &[Turn]) -> String {
        let mut out = String::new();
        for turn in turns {
            out.push_str(turn.role.prefix());
            out.push_str(&turn.text);
            out.push('\n');
        }
        out
    }
}
