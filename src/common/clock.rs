use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeDelta, Utc};

/// Source of raw wall-clock readings.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Readings are exact to the nanosecond.
///
/// Only instants with a nanosecond timestamp that fits in an `i64` (roughly
/// 1677 to 2262) can be represented; anything else is rejected.
#[derive(Debug)]
pub struct ManualClock {
    nanos: AtomicI64,
}

fn timestamp_nanos(time: DateTime<Utc>) -> Result<i64> {
    time.timestamp_nanos_opt()
        .ok_or_else(|| anyhow!("{} is outside the manual clock's range", time))
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Result<Self> {
        Ok(Self {
            nanos: AtomicI64::new(timestamp_nanos(start)?),
        })
    }

    pub fn set(&self, time: DateTime<Utc>) -> Result<()> {
        self.nanos.store(timestamp_nanos(time)?, Ordering::SeqCst);
        Ok(())
    }

    pub fn advance(&self, delta: TimeDelta) -> Result<()> {
        let nanos = delta
            .num_nanoseconds()
            .ok_or_else(|| anyhow!("cannot advance the manual clock by {}", delta))?;
        self.nanos
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| current.checked_add(nanos))
            .map_err(|_| anyhow!("advancing the manual clock by {} overflows", delta))?;
        Ok(())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.nanos.load(Ordering::SeqCst))
    }
}

/// The process-local adjusted clock:
/// `now() = clock + base_offset + cumulative corrections`.
///
/// Construction and corrections both refuse offsets that would push `now()`
/// outside the range `DateTime<Utc>` can represent.
pub struct TimeService {
    clock: Arc<dyn Clock>,
    base_offset: TimeDelta,
    // Nanoseconds; only this process ever changes it.
    cumulative_offset: AtomicI64,
}

impl TimeService {
    pub fn new(clock: Arc<dyn Clock>, base_offset: TimeDelta) -> Result<Self> {
        let time = Self {
            clock,
            base_offset,
            cumulative_offset: AtomicI64::new(0),
        };
        time.adjusted(TimeDelta::zero())
            .ok_or_else(|| anyhow!("base offset {} puts the clock out of range", base_offset))?;
        Ok(time)
    }

    pub fn system(base_offset: TimeDelta) -> Result<Self> {
        Self::new(Arc::new(SystemClock), base_offset)
    }

    fn adjusted(&self, cumulative: TimeDelta) -> Option<DateTime<Utc>> {
        let offset = self.base_offset.checked_add(&cumulative)?;
        self.clock.now().checked_add_signed(offset)
    }

    /// Saturates at the edge of the representable range if the underlying
    /// clock itself drifts out of it.
    pub fn now(&self) -> DateTime<Utc> {
        let cumulative = self.cumulative_offset();
        self.adjusted(cumulative).unwrap_or_else(|| {
            let behind = self
                .base_offset
                .checked_add(&cumulative)
                .map_or(self.base_offset < TimeDelta::zero(), |offset| offset < TimeDelta::zero());
            if behind { DateTime::<Utc>::MIN_UTC } else { DateTime::<Utc>::MAX_UTC }
        })
    }

    pub fn base_offset(&self) -> TimeDelta {
        self.base_offset
    }

    pub fn cumulative_offset(&self) -> TimeDelta {
        TimeDelta::nanoseconds(self.cumulative_offset.load(Ordering::SeqCst))
    }

    pub fn apply_correction(&self, delta: TimeDelta) -> Result<()> {
        let nanos = delta
            .num_nanoseconds()
            .ok_or_else(|| anyhow!("correction {} out of range", delta))?;
        self.cumulative_offset
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current
                    .checked_add(nanos)
                    .filter(|&next| self.adjusted(TimeDelta::nanoseconds(next)).is_some())
            })
            .map_err(|_| anyhow!("correction {} puts the clock out of range", delta))?;
        Ok(())
    }
}
