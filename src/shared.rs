//! State shared between the capture path, the sentence path and the
//! foreground loop.
//!
//! Every scalar an interrupt-context path publishes is a single atomic of
//! its natural width; the foreground only ever compares the counters
//! against its last snapshot. The sample buffer is multi-word and sits
//! behind a mutex. Publication order matters in one place: the capture
//! path stores `sample_count` with Release after the buffer update, and
//! the foreground loads it with Acquire before locking the buffer.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, AtomicU32, Ordering};
use std::sync::Mutex;

use crate::config::SamplingConfig;
use crate::sampler::SampleBuffer;
use crate::status::GpsFix;
use crate::timebase::TickCounter;

pub struct SharedState {
    /// Extended tick counter high half (overflow interrupt writes it).
    pub ticks: TickCounter,
    /// PPS edges seen while holding 3D fix. Monotonic; foreground compares
    /// against its last snapshot to detect a new edge.
    pub pps_count: AtomicU32,
    /// Closed sample windows. An advance publishes `samples`.
    pub sample_count: AtomicU32,
    /// Latest raw phase-comparator code.
    pub last_adc: AtomicU16,
    /// Out-of-bounds delta kept for diagnostics; 0 means none pending.
    pub erroneous_delta: AtomicI32,
    /// PPS edges remaining in the current window, counting W down to 1.
    pub window_pos: AtomicU32,
    fix_3d: AtomicBool,
    pub samples: Mutex<SampleBuffer>,
    /// Last PDOP field from the receiver, diagnostic only.
    pub pdop: Mutex<String>,
}

impl SharedState {
    pub fn new(cfg: &SamplingConfig) -> Self {
        SharedState {
            ticks: TickCounter::new(),
            pps_count: AtomicU32::new(0),
            sample_count: AtomicU32::new(0),
            last_adc: AtomicU16::new(cfg.phase_midpoint),
            erroneous_delta: AtomicI32::new(0),
            window_pos: AtomicU32::new(cfg.sample_seconds),
            fix_3d: AtomicBool::new(false),
            samples: Mutex::new(SampleBuffer::new(cfg.sample_count)),
            pdop: Mutex::new(String::new()),
        }
    }

    pub fn fix(&self) -> GpsFix {
        if self.fix_3d.load(Ordering::Acquire) {
            GpsFix::Locked3D
        } else {
            GpsFix::Unlocked
        }
    }

    pub fn set_fix(&self, fix: GpsFix) {
        self.fix_3d
            .store(fix == GpsFix::Locked3D, Ordering::Release);
    }
}
