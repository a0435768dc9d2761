//! Clock capability: wall-clock microseconds plus a monotonic tick source.
//!
//! The abstraction only exists because microsecond wall time and nanosecond
//! monotonic time come from different sources on some platforms.
use std::fmt;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// A source of wall-clock and monotonic time.
pub trait Clock: fmt::Debug + Send + Sync {
    /// Current wall-clock time, in microseconds since the Unix epoch.
    fn current_time_micros(&self) -> i64;

    /// Current monotonic tick, in nanoseconds. Only comparable to other
    /// ticks from the same `Clock` instance.
    fn current_nano_ticks(&self) -> i64;

    /// Whether `current_time_micros` actually has microsecond resolution.
    ///
    /// When `false`, `Span::finish` prefers `current_nano_ticks` deltas to
    /// compute duration rather than subtracting two wall-clock readings.
    fn is_micros_accurate(&self) -> bool {
        true
    }
}

/// The default `Clock`, backed by `std::time::SystemTime` and `std::time::Instant`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock {
    epoch: Option<Instant>,
}
impl SystemClock {
    /// Makes a new `SystemClock`.
    pub fn new() -> Self {
        SystemClock { epoch: None }
    }
}
impl Clock for SystemClock {
    fn current_time_micros(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        (now.as_secs() as i64) * 1_000_000 + i64::from(now.subsec_micros())
    }

    fn current_nano_ticks(&self) -> i64 {
        // `Instant` has no fixed epoch; callers only ever compare two ticks
        // taken from this process, so an arbitrary (but stable) reference
        // point is fine.
        lazy_epoch().elapsed().as_nanos() as i64
    }

    fn is_micros_accurate(&self) -> bool {
        true
    }
}

fn lazy_epoch() -> Instant {
    use std::sync::Once;

    static INIT: Once = Once::new();
    static mut EPOCH: Option<Instant> = None;
    unsafe {
        INIT.call_once(|| EPOCH = Some(Instant::now()));
        EPOCH.expect("initialized by Once")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn system_clock_micros_move_forward() {
        let clock = SystemClock::new();
        let a = clock.current_time_micros();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = clock.current_time_micros();
        assert!(b > a);
    }

    #[test]
    fn system_clock_nano_ticks_move_forward() {
        let clock = SystemClock::new();
        let a = clock.current_nano_ticks();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = clock.current_nano_ticks();
        assert!(b > a);
    }
}
