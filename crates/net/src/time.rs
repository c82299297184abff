use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Source of the network clock, in seconds.
pub trait Clock: Send {
    fn now(&self) -> f64;

    /// Called between reads while a caller spins waiting for a reply.
    fn idle(&self);
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn idle(&self) {
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    bits: Arc<AtomicU64>,
    step: f64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::with_step(0.01)
    }

    /// `step` is how far `idle()` moves the clock.
    pub fn with_step(step: f64) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(0f64.to_bits())),
            step,
        }
    }

    pub fn set(&self, time: f64) {
        self.bits.store(time.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, dt: f64) {
        let mut current = self.bits.load(Ordering::SeqCst);
        loop {
            let next = (f64::from_bits(current) + dt).to_bits();
            match self
                .bits
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }

    fn idle(&self) {
        self.advance(self.step);
        std::thread::sleep(Duration::from_micros(200));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance(1.5);
        assert_eq!(other.now(), 1.5);
        other.set(10.0);
        assert_eq!(clock.now(), 10.0);
    }

    #[test]
    fn test_manual_clock_idle_steps() {
        let clock = ManualClock::with_step(0.25);
        clock.idle();
        clock.idle();
        assert_eq!(clock.now(), 0.5);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        clock.idle();
        assert!(clock.now() > a);
    }
}
