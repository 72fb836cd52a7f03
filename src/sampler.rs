//! Rolling drift-sample window and per-second phase accumulation.

use crate::fixed::Milli;
use crate::timebase::NOMINAL_CLOCK;

/// Ticks counted across one closed window minus the expected count, as a
/// signed value. Wrapping subtraction keeps this correct across one 32-bit
/// tick wrap.
pub fn window_delta(current: u32, previous: u32, window_secs: u32) -> i64 {
    i64::from(current.wrapping_sub(previous))
        - i64::from(window_secs) * i64::from(NOMINAL_CLOCK)
}

/// Rolling buffer of per-window frequency deltas, oldest first.
///
/// After (re)acquisition of fix the first closed window measures across the
/// reference gap and is garbage; `arm_skip` arms a marker and the next
/// recorded delta only disarms it instead of entering the buffer. The
/// marker is the port of the distinguished fill count -1.
#[derive(Debug)]
pub struct SampleBuffer {
    window: Vec<i32>,
    capacity: usize,
    skip_next: bool,
}

impl SampleBuffer {
    /// A fresh buffer starts with the warm-up marker armed, matching the
    /// power-on state.
    pub fn new(capacity: usize) -> Self {
        SampleBuffer {
            window: Vec::with_capacity(capacity),
            capacity,
            skip_next: true,
        }
    }

    /// Discard the history and arm the warm-up marker.
    pub fn arm_skip(&mut self) {
        self.window.clear();
        self.skip_next = true;
    }

    pub fn skip_armed(&self) -> bool {
        self.skip_next
    }

    /// Insert one window delta, rotating the oldest sample out at capacity.
    /// Returns false when the delta was consumed by the warm-up marker.
    pub fn record(&mut self, delta: i32) -> bool {
        if self.skip_next {
            self.skip_next = false;
            return false;
        }
        if self.window.len() == self.capacity {
            self.window.remove(0);
        }
        self.window.push(delta);
        true
    }

    pub fn fill(&self) -> usize {
        self.window.len()
    }

    pub fn is_full(&self) -> bool {
        self.window.len() == self.capacity
    }

    pub fn sum(&self) -> i64 {
        self.window.iter().map(|&d| i64::from(d)).sum()
    }

    pub fn samples(&self) -> &[i32] {
        &self.window
    }
}

/// Running sum of per-PPS phase errors across the open window.
#[derive(Debug, Default)]
pub struct PhaseAccumulator {
    sum: i64,
    count: u32,
}

impl PhaseAccumulator {
    /// Fold in one reading. Zero phase error sits at the midpoint code.
    pub fn record(&mut self, midpoint: u16, reading: u16) {
        self.sum += i64::from(midpoint) - i64::from(reading);
        self.count += 1;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Close the window: average over its nominal length (not the count
    /// actually accumulated) and rescale to thousandths of the midpoint.
    /// Resets the accumulator.
    pub fn close(&mut self, window_secs: u32, midpoint: u16) -> Milli {
        let average = self.sum / i64::from(window_secs);
        self.sum = 0;
        self.count = 0;
        Milli(average * 1000 / i64::from(midpoint))
    }
}
