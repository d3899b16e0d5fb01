//! Spending limits for agents that pay on their own.
//!
//! A [`SpendingGuard`] caps what one client may spend per request, per rolling hour and
//! per rolling day. Spend is only recorded once the provider has accepted a payment:
//! [`SpendingGuard::reserve`] holds the amount while the paid request is in flight,
//! [`Reservation::commit`] records it, and dropping the reservation gives it back.
//!
//! ```rust
//! use x402_reqwest::{SpendingGuard, SpendingLimits};
//!
//! let guard = SpendingGuard::new(SpendingLimits::default());
//! let reservation = guard.reserve("0.10".parse().unwrap()).unwrap();
//! reservation.commit();
//! assert_eq!(guard.status().spent_last_hour.to_string(), "0.10");
//! assert!(guard.check("1.01".parse().unwrap()).is_err());
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use x402_types::timestamp::{Clock, SystemClock, UnixTimestamp};
use x402_types::util::MoneyAmount;

const HOUR_SECS: u64 = 60 * 60;
const DAY_SECS: u64 = 24 * HOUR_SECS;

/// Spending ceilings, in the token's human units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingLimits {
    pub per_request: MoneyAmount,
    pub per_hour: MoneyAmount,
    pub per_day: MoneyAmount,
}

impl Default for SpendingLimits {
    /// 1 per request, 10 per hour, 100 per day.
    fn default() -> Self {
        Self {
            per_request: MoneyAmount(Decimal::ONE),
            per_hour: MoneyAmount(Decimal::TEN),
            per_day: MoneyAmount(Decimal::ONE_HUNDRED),
        }
    }
}

/// A payment the guard refused. `spent` includes payments still in flight.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpendingLimitError {
    #[error("Payment of {amount} exceeds the per-request limit of {limit}")]
    PerRequest {
        amount: MoneyAmount,
        limit: MoneyAmount,
    },
    #[error("Payment of {amount} would exceed the hourly limit of {limit} ({spent} spent)")]
    Hourly {
        amount: MoneyAmount,
        spent: MoneyAmount,
        limit: MoneyAmount,
    },
    #[error("Payment of {amount} would exceed the daily limit of {limit} ({spent} spent)")]
    Daily {
        amount: MoneyAmount,
        spent: MoneyAmount,
        limit: MoneyAmount,
    },
}

/// Snapshot of a guard's windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingStatus {
    pub spent_last_hour: MoneyAmount,
    pub spent_last_day: MoneyAmount,
    pub in_flight: MoneyAmount,
    pub limits: SpendingLimits,
    pub remaining_hour: MoneyAmount,
    pub remaining_day: MoneyAmount,
}

#[derive(Debug, Default)]
struct SpendLog {
    /// Committed payments, oldest first.
    committed: VecDeque<(UnixTimestamp, Decimal)>,
    in_flight: Decimal,
}

impl SpendLog {
    fn spent_within(&self, now: UnixTimestamp, window: u64) -> Decimal {
        self.committed
            .iter()
            .filter(|(at, _)| now.as_secs().saturating_sub(at.as_secs()) < window)
            .map(|(_, amount)| *amount)
            .sum()
    }

    fn prune(&mut self, now: UnixTimestamp) {
        while let Some((at, _)) = self.committed.front()
            && now.as_secs().saturating_sub(at.as_secs()) >= DAY_SECS
        {
            self.committed.pop_front();
        }
    }

    fn release(&mut self, amount: Decimal) {
        self.in_flight = (self.in_flight - amount).max(Decimal::ZERO);
    }
}

fn lock(log: &Mutex<SpendLog>) -> MutexGuard<'_, SpendLog> {
    // Every update leaves the log valid, so a poisoned lock is still usable.
    log.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Rolling per-request, hourly and daily spending limits.
///
/// Clones share the same windows, so one guard can cap several clients.
#[derive(Clone)]
pub struct SpendingGuard {
    limits: SpendingLimits,
    clock: Arc<dyn Clock>,
    log: Arc<Mutex<SpendLog>>,
}

impl std::fmt::Debug for SpendingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpendingGuard")
            .field("limits", &self.limits)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

impl Default for SpendingGuard {
    fn default() -> Self {
        Self::new(SpendingLimits::default())
    }
}

impl SpendingGuard {
    pub fn new(limits: SpendingLimits) -> Self {
        Self::with_clock(limits, Arc::new(SystemClock))
    }

    pub fn with_clock(limits: SpendingLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            limits,
            clock,
            log: Arc::new(Mutex::new(SpendLog::default())),
        }
    }

    pub fn limits(&self) -> &SpendingLimits {
        &self.limits
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Whether `amount` could be paid right now. Changes nothing.
    pub fn check(&self, amount: MoneyAmount) -> Result<(), SpendingLimitError> {
        let now = self.clock.now();
        self.evaluate(&lock(&self.log), now, amount)
    }

    /// Holds `amount` against all three limits until the reservation is committed or dropped.
    pub fn reserve(&self, amount: MoneyAmount) -> Result<Reservation, SpendingLimitError> {
        let now = self.clock.now();
        let mut log = lock(&self.log);
        log.prune(now);
        self.evaluate(&log, now, amount)?;
        log.in_flight += amount.0;
        Ok(Reservation {
            log: self.log.clone(),
            clock: self.clock.clone(),
            amount,
            settled: false,
        })
    }

    pub fn status(&self) -> SpendingStatus {
        let now = self.clock.now();
        let log = lock(&self.log);
        let hour = log.spent_within(now, HOUR_SECS);
        let day = log.spent_within(now, DAY_SECS);
        let remaining =
            |limit: MoneyAmount, spent: Decimal| (limit.0 - spent - log.in_flight).max(Decimal::ZERO);
        SpendingStatus {
            spent_last_hour: MoneyAmount(hour),
            spent_last_day: MoneyAmount(day),
            in_flight: MoneyAmount(log.in_flight),
            limits: self.limits,
            remaining_hour: MoneyAmount(remaining(self.limits.per_hour, hour)),
            remaining_day: MoneyAmount(remaining(self.limits.per_day, day)),
        }
    }

    fn evaluate(
        &self,
        log: &SpendLog,
        now: UnixTimestamp,
        amount: MoneyAmount,
    ) -> Result<(), SpendingLimitError> {
        let limits = &self.limits;
        if amount > limits.per_request {
            return Err(SpendingLimitError::PerRequest {
                amount,
                limit: limits.per_request,
            });
        }
        let hour = log.spent_within(now, HOUR_SECS) + log.in_flight;
        if hour + amount.0 > limits.per_hour.0 {
            return Err(SpendingLimitError::Hourly {
                amount,
                spent: MoneyAmount(hour.normalize()),
                limit: limits.per_hour,
            });
        }
        let day = log.spent_within(now, DAY_SECS) + log.in_flight;
        if day + amount.0 > limits.per_day.0 {
            return Err(SpendingLimitError::Daily {
                amount,
                spent: MoneyAmount(day.normalize()),
                limit: limits.per_day,
            });
        }
        Ok(())
    }
}

/// An amount held by a [`SpendingGuard`]. Released on drop unless committed.
#[must_use = "dropping a reservation releases it immediately"]
pub struct Reservation {
    log: Arc<Mutex<SpendLog>>,
    clock: Arc<dyn Clock>,
    amount: MoneyAmount,
    settled: bool,
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("amount", &self.amount)
            .field("settled", &self.settled)
            .finish()
    }
}

impl Reservation {
    pub fn amount(&self) -> MoneyAmount {
        self.amount
    }

    /// Records the payment as spent now.
    pub fn commit(mut self) {
        let now = self.clock.now();
        let mut log = lock(&self.log);
        log.release(self.amount.0);
        log.committed.push_back((now, self.amount.0));
        self.settled = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            lock(&self.log).release(self.amount.0);
        }
    }
}
