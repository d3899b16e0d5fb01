//! Unix timestamps and clocks for requirement expiry and spending windows.
//!
//! Everything time-dependent in the x402 handshake (requirement `expiresAt`,
//! authorization `validAfter`/`validBefore`, rolling spending windows) reads time
//! through the [`Clock`] trait so tests can move time explicitly.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::ops::Add;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// A Unix timestamp representing seconds since the Unix epoch (1970-01-01T00:00:00Z).
///
/// # Serialization
///
/// Serialized as a JSON integer, which is what x402 SDKs put into `expiresAt` and
/// `validBefore`. Deserialization also accepts a stringified integer.
///
/// ```
/// use x402_types::timestamp::UnixTimestamp;
///
/// let now = UnixTimestamp::from_secs(1_700_000_000);
/// let expires = now + 300;
/// assert_eq!(expires.as_secs(), 1_700_000_300);
/// assert_eq!(serde_json::to_string(&expires).unwrap(), "1700000300");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Hash, Default)]
pub struct UnixTimestamp(u64);

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Number(u64),
            Text(String),
        }

        match Wire::deserialize(deserializer)? {
            Wire::Number(secs) => Ok(UnixTimestamp(secs)),
            Wire::Text(s) => s
                .parse::<u64>()
                .map(UnixTimestamp)
                .map_err(|_| serde::de::Error::custom("timestamp must be a non-negative integer")),
        }
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        UnixTimestamp(self.0.saturating_add(rhs))
    }
}

impl UnixTimestamp {
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Returns the current system time.
    ///
    /// A clock set before the Unix epoch reads as zero.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self(secs)
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    pub fn saturating_sub(self, secs: u64) -> Self {
        UnixTimestamp(self.0.saturating_sub(secs))
    }
}

/// Source of "now" for expiry checks and spending windows.
pub trait Clock: Send + Sync {
    fn now(&self) -> UnixTimestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> UnixTimestamp {
        UnixTimestamp::now()
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> UnixTimestamp {
        (**self).now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time, so a test can hold one handle and
/// advance the clock seen by a verifier or a spending guard.
///
/// ```
/// use x402_types::timestamp::{Clock, ManualClock};
///
/// let clock = ManualClock::new(1_000);
/// clock.advance(301);
/// assert_eq!(clock.now().as_secs(), 1_301);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn new(secs: u64) -> Self {
        Self(Arc::new(AtomicU64::new(secs)))
    }

    /// Starts at the current wall-clock time.
    pub fn starting_now() -> Self {
        Self::new(UnixTimestamp::now().as_secs())
    }

    pub fn set(&self, secs: u64) {
        self.0.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> UnixTimestamp {
        UnixTimestamp(self.0.load(Ordering::SeqCst))
    }
}
