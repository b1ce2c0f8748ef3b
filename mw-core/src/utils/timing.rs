//! Monotonic time sources and the busy-wait primitive shared by every
//! supervised motion.
//!
//! `EmbassyClock` reads `embassy_time::Instant` and is what firmware and the
//! host simulator use. `ManualClock` is fully deterministic: each `now()`
//! sample advances it by a fixed tick, which keeps poll loops finite in tests.

use core::cell::Cell;

use embassy_time::{Duration, Instant, TICK_HZ};
use embedded_hal::delay::DelayNs;

/// Source of monotonic elapsed time.
pub trait MonotonicClock {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;
}

impl<C: MonotonicClock + ?Sized> MonotonicClock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

/// Clock backed by the embassy time driver.
#[derive(Debug, Clone, Copy)]
pub struct EmbassyClock {
    origin: Instant,
}

impl EmbassyClock {
    /// Start a clock whose origin is the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for EmbassyClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for EmbassyClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Deterministic clock advanced by hand and by a fixed tick per sample.
#[derive(Debug)]
pub struct ManualClock {
    now_us: Cell<u64>,
    tick_us: u64,
}

impl ManualClock {
    /// Create a clock at zero that advances by `tick` every time it is sampled.
    pub fn new(tick: Duration) -> Self {
        Self {
            now_us: Cell::new(0),
            tick_us: tick.as_micros(),
        }
    }

    /// Move the clock forward without sampling it.
    pub fn advance(
        &self,
        by: Duration,
    ) {
        self.now_us.set(self.now_us.get().saturating_add(by.as_micros()));
    }

    /// Current reading, without applying the sampling tick.
    pub fn peek(&self) -> Duration {
        Duration::from_micros(self.now_us.get())
    }
}

impl MonotonicClock for ManualClock {
    fn now(&self) -> Duration {
        let t = self.now_us.get();
        self.now_us.set(t.saturating_add(self.tick_us));
        Duration::from_micros(t)
    }
}

/// Blocking on a `ManualClock` simply moves it forward.
impl DelayNs for ManualClock {
    fn delay_ns(
        &mut self,
        ns: u32,
    ) {
        self.advance(Duration::from_micros(u64::from(ns).div_ceil(1_000)));
    }

    fn delay_us(
        &mut self,
        us: u32,
    ) {
        self.advance(Duration::from_micros(u64::from(us)));
    }

    fn delay_ms(
        &mut self,
        ms: u32,
    ) {
        self.advance(Duration::from_millis(u64::from(ms)));
    }
}

/// How a bounded poll ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// The predicate held before the budget ran out.
    Satisfied(Duration),
    /// The budget elapsed first.
    Expired(Duration),
}

impl PollResult {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, PollResult::Satisfied(_))
    }

    /// Elapsed time at which the poll ended.
    pub fn elapsed(&self) -> Duration {
        match *self {
            PollResult::Satisfied(d) | PollResult::Expired(d) => d,
        }
    }
}

/// Busy-wait until `predicate` holds or `budget` elapses on `clock`.
///
/// The predicate is sampled before the deadline is checked, so a zero budget
/// still polls exactly once.
pub fn poll_until<C, P>(
    clock: &C,
    budget: Duration,
    mut predicate: P,
) -> PollResult
where
    C: MonotonicClock + ?Sized,
    P: FnMut() -> bool,
{
    let start = clock.now();
    loop {
        if predicate() {
            return PollResult::Satisfied(elapsed_since(clock, start));
        }
        let elapsed = elapsed_since(clock, start);
        if elapsed >= budget {
            return PollResult::Expired(elapsed);
        }
    }
}

/// Milliseconds as a `Duration`, saturating at `Duration::MAX` instead of
/// overflowing the tick conversion.
pub fn millis_saturating(ms: u64) -> Duration {
    const MAX_MS: u64 = u64::MAX / TICK_HZ;
    if ms > MAX_MS {
        Duration::MAX
    } else {
        Duration::from_millis(ms)
    }
}

/// Busy-wait with no deadline.
pub fn spin_until<P>(mut predicate: P)
where
    P: FnMut() -> bool,
{
    while !predicate() {
        core::hint::spin_loop();
    }
}

fn elapsed_since<C: MonotonicClock + ?Sized>(
    clock: &C,
    start: Duration,
) -> Duration {
    clock
        .now()
        .checked_sub(start)
        .unwrap_or(Duration::from_ticks(0))
}
