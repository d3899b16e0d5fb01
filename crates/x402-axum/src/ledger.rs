//! Nonce bookkeeping for issued payment requirements.
//!
//! Every 402 response registers its requirement under its nonce. A nonce is
//! accepted at most once: [`NonceLedger::compare_and_set_used`] flips it from
//! pending to used atomically, so of N concurrent submissions of the same
//! authorization exactly one wins.
//!
//! Used entries stay in the ledger until their requirement expires. After that an
//! authorization for them is rejected as expired anyway, so forgetting the nonce
//! does not reopen it for replay.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use x402_types::proto::{PaymentNonce, PaymentRequirement};
use x402_types::timestamp::UnixTimestamp;

/// Entries kept by [`InMemoryNonceLedger::default`].
pub const DEFAULT_LEDGER_CAPACITY: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceState {
    Pending,
    Used { consumed_at: UnixTimestamp },
}

/// An issued requirement and whether it has been paid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceRecord {
    pub requirement: PaymentRequirement,
    pub state: NonceState,
}

impl NonceRecord {
    pub fn is_used(&self) -> bool {
        matches!(self.state, NonceState::Used { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Nonce ledger is full ({capacity} live entries)")]
    CapacityExceeded { capacity: usize },
    #[error("Nonce {0} is already registered")]
    DuplicateNonce(PaymentNonce),
    #[error("Nonce ledger backend failed: {0}")]
    Backend(String),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::CapacityExceeded { .. } => "LEDGER_CAPACITY_EXCEEDED",
            LedgerError::DuplicateNonce(_) => "DUPLICATE_NONCE",
            LedgerError::Backend(_) => "LEDGER_UNAVAILABLE",
        }
    }
}

/// Storage for issued nonces.
///
/// The in-memory implementation serves a single process. A deployment with several
/// replicas needs a shared store whose `compare_and_set_used` is atomic across them.
#[async_trait]
pub trait NonceLedger: Send + Sync {
    /// Records a freshly issued requirement as pending.
    async fn register(
        &self,
        requirement: PaymentRequirement,
        now: UnixTimestamp,
    ) -> Result<(), LedgerError>;

    async fn lookup(&self, nonce: &PaymentNonce) -> Result<Option<NonceRecord>, LedgerError>;

    /// Marks a pending nonce as used. Returns `true` for exactly one caller per nonce.
    async fn compare_and_set_used(
        &self,
        nonce: &PaymentNonce,
        now: UnixTimestamp,
    ) -> Result<bool, LedgerError>;

    /// Forgets requirements that expired before `now`. Returns how many were dropped.
    async fn purge_expired(&self, now: UnixTimestamp) -> Result<usize, LedgerError>;
}

#[async_trait]
impl<T: NonceLedger + ?Sized> NonceLedger for Arc<T> {
    async fn register(
        &self,
        requirement: PaymentRequirement,
        now: UnixTimestamp,
    ) -> Result<(), LedgerError> {
        (**self).register(requirement, now).await
    }

    async fn lookup(&self, nonce: &PaymentNonce) -> Result<Option<NonceRecord>, LedgerError> {
        (**self).lookup(nonce).await
    }

    async fn compare_and_set_used(
        &self,
        nonce: &PaymentNonce,
        now: UnixTimestamp,
    ) -> Result<bool, LedgerError> {
        (**self).compare_and_set_used(nonce, now).await
    }

    async fn purge_expired(&self, now: UnixTimestamp) -> Result<usize, LedgerError> {
        (**self).purge_expired(now).await
    }
}

/// Process-local ledger on a sharded concurrent map.
///
/// Holds at most `capacity` entries. When full it makes room by dropping the oldest
/// issued entries that are expired or still pending; a pending entry is only an unpaid
/// offer, so evicting it merely invalidates that offer. Used entries are kept until
/// they expire. Only a ledger full of live used entries refuses new requirements with
/// [`LedgerError::CapacityExceeded`].
#[derive(Debug)]
pub struct InMemoryNonceLedger {
    entries: DashMap<PaymentNonce, NonceRecord>,
    /// Nonces in issue order. Registration holds this lock for the whole
    /// check-evict-insert step, so the capacity bound is exact.
    issued: Mutex<VecDeque<PaymentNonce>>,
    capacity: usize,
}

impl InMemoryNonceLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            issued: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn issued(&self) -> MutexGuard<'_, VecDeque<PaymentNonce>> {
        self.issued.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn purge(&self, now: UnixTimestamp, issued: &mut VecDeque<PaymentNonce>) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, record| !record.requirement.is_expired_at(now));
        issued.retain(|nonce| self.entries.contains_key(nonce));
        before.saturating_sub(self.entries.len())
    }

    /// Frees slots until there is room for one more entry.
    fn make_room(
        &self,
        now: UnixTimestamp,
        issued: &mut VecDeque<PaymentNonce>,
    ) -> Result<(), LedgerError> {
        let mut evicted = 0usize;
        while self.entries.len() >= self.capacity {
            let Some(oldest) = issued.pop_front() else {
                self.purge(now, issued);
                if self.entries.len() >= self.capacity {
                    return Err(LedgerError::CapacityExceeded {
                        capacity: self.capacity,
                    });
                }
                break;
            };
            // A live used entry is dropped from the queue only; the map keeps it.
            if self
                .entries
                .remove_if(&oldest, |_, record| {
                    !record.is_used() || record.requirement.is_expired_at(now)
                })
                .is_some()
            {
                evicted += 1;
            }
        }
        #[cfg(feature = "telemetry")]
        if evicted > 0 {
            tracing::debug!(evicted, "Nonce ledger at capacity, dropped oldest offers");
        }
        #[cfg(not(feature = "telemetry"))]
        let _ = evicted;
        Ok(())
    }
}

impl Default for InMemoryNonceLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_CAPACITY)
    }
}

#[async_trait]
impl NonceLedger for InMemoryNonceLedger {
    async fn register(
        &self,
        requirement: PaymentRequirement,
        now: UnixTimestamp,
    ) -> Result<(), LedgerError> {
        let nonce = requirement.nonce;
        let mut issued = self.issued();
        if self.entries.contains_key(&nonce) {
            return Err(LedgerError::DuplicateNonce(nonce));
        }
        self.make_room(now, &mut issued)?;
        match self.entries.entry(nonce) {
            Entry::Occupied(_) => Err(LedgerError::DuplicateNonce(nonce)),
            Entry::Vacant(slot) => {
                slot.insert(NonceRecord {
                    requirement,
                    state: NonceState::Pending,
                });
                issued.push_back(nonce);
                Ok(())
            }
        }
    }

    async fn lookup(&self, nonce: &PaymentNonce) -> Result<Option<NonceRecord>, LedgerError> {
        Ok(self.entries.get(nonce).map(|record| record.value().clone()))
    }

    async fn compare_and_set_used(
        &self,
        nonce: &PaymentNonce,
        now: UnixTimestamp,
    ) -> Result<bool, LedgerError> {
        // The shard stays write-locked while the state is checked and flipped.
        let Some(mut record) = self.entries.get_mut(nonce) else {
            return Ok(false);
        };
        if record.is_used() {
            return Ok(false);
        }
        record.state = NonceState::Used { consumed_at: now };
        Ok(true)
    }

    async fn purge_expired(&self, now: UnixTimestamp) -> Result<usize, LedgerError> {
        let mut issued = self.issued();
        Ok(self.purge(now, &mut issued))
    }
}
