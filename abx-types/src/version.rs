//! Config version identifiers.
//!
//! A [`ConfigVersion`] is attached to every experiment revision. It is a
//! UUIDv7 rendered as the canonical hyphenated string, so comparing two
//! versions as strings is the same as comparing their creation times. That
//! property is load-bearing: the snapshot selector picks the newest
//! snapshot by sorting object keys, and the SDK cache rejects stale deltas
//! with a plain `<=` check.

use std::sync::{Mutex, MutexGuard, OnceLock};

use serde::{Deserialize, Serialize};
use uuid::timestamp::context::ContextV7;
use uuid::{Timestamp, Uuid};

/// Process-wide V7 context so versions generated within the same
/// millisecond still come out strictly increasing.
fn context() -> MutexGuard<'static, ContextV7> {
    static CONTEXT: OnceLock<Mutex<ContextV7>> = OnceLock::new();
    CONTEXT
        .get_or_init(|| Mutex::new(ContextV7::new()))
        .lock()
        .unwrap()
}

/// Time-ordered unique identifier for one experiment revision.
///
/// Ordering is lexical over the string form, which matches chronological
/// order for UUIDv7 values. The default value is the empty string and
/// sorts before every real version.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigVersion(String);

impl ConfigVersion {
    /// Generate a fresh version for "now".
    #[must_use]
    pub fn generate() -> Self {
        let ts = Timestamp::now(&*context());
        Self(Uuid::new_v7(ts).to_string())
    }

    /// True for the default (pre-bootstrap) value.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }

    /// The version as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 48-bit millisecond timestamp embedded in the version.
    ///
    /// Returns `None` when the version is empty or not a parseable UUID
    /// (for example when an operator hand-edited a fixture).
    #[must_use]
    pub fn timestamp_ms(&self) -> Option<u64> {
        let uuid = Uuid::parse_str(&self.0).ok()?;
        let bytes = uuid.as_bytes();
        let mut ms: u64 = 0;
        for b in &bytes[..6] {
            ms = (ms << 8) | u64::from(*b);
        }
        Some(ms)
    }
}

impl From<String> for ConfigVersion {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConfigVersion {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
