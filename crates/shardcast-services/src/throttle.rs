//! Throttle: caps how many inbound requests are processed at once.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::interfaces::Throttler;

/// Counting throttler. `can_process` is advisory: callers check it during
/// admission and then hold a [`ThrottleSlot`] for the processing.
#[derive(Debug)]
pub struct CountingThrottler {
    in_flight: AtomicU32,
    max: u32,
}

impl CountingThrottler {
    pub fn new(max: u32) -> Self {
        Self {
            in_flight: AtomicU32::new(0),
            max,
        }
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Acquire)
    }
}

impl Throttler for CountingThrottler {
    fn can_process(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) < self.max
    }

    fn start_processing(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    fn end_processing(&self) {
        // Never wraps below zero on an unmatched end.
        let _ = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

/// RAII hold on one throttle slot. Released on drop, including unwinding.
pub struct ThrottleSlot<'a> {
    throttler: &'a dyn Throttler,
}

impl<'a> ThrottleSlot<'a> {
    pub fn acquire(throttler: &'a dyn Throttler) -> Self {
        throttler.start_processing();
        Self { throttler }
    }
}

impl Drop for ThrottleSlot<'_> {
    fn drop(&mut self) {
        self.throttler.end_processing();
    }
}
