use serde::{Deserialize, Serialize};
use std::fmt;

/// Sanitized sender identity: the join key across the history store,
/// the queue store, and the marker store.
///
/// Only `[0-9A-Za-z_+-]` survive sanitization, so the key is always a
/// safe file-name component. Sanitization is deterministic; raw ids
/// that differ only in disallowed characters collide, which the
/// expected input domain (phone-number-shaped ids) does not produce.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SenderKey(String);

impl SenderKey {
    pub fn sanitize(raw: &str) -> Self {
        let cleaned: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '+'))
            .collect();
        Self(cleaned)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SenderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SenderKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
