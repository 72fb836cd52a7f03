//! End-to-end discipline scenarios.
//!
//! The rig wires the real capture front, fix gate and foreground to the
//! bench instrument models and drives PPS edges with exact tick counts, so
//! every scenario exercises the same integer arithmetic the firmware runs.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, RwLock};

use gpsdo::bench::{BenchAdc, BenchDac, BenchOscillator, BenchState, MemCell, MemTrimStore, NullLeds, NullWatchdog};
use gpsdo::config::SystemConfig;
use gpsdo::controller::{CaptureFront, FixGate, Foreground};
use gpsdo::nmea::encode_gsa;
use gpsdo::persistence::BLANK_WORD;
use gpsdo::shared::SharedState;
use gpsdo::status::{DisciplineStatus, GpsFix, LockGrade, ResetCause};
use gpsdo::timebase::NOMINAL_CLOCK;
use gpsdo::trim::DAC_MIDPOINT;

const W: u64 = 25;
const NOMINAL: u64 = NOMINAL_CLOCK as u64;

struct Rig {
    shared: Arc<SharedState>,
    state: Rc<RefCell<BenchState>>,
    front: CaptureFront<BenchAdc>,
    gate: FixGate,
    foreground: Foreground<BenchDac, MemTrimStore, NullWatchdog, NullLeds>,
    store: Rc<RefCell<MemCell>>,
    status: Arc<RwLock<DisciplineStatus>>,
    total_ticks: u64,
}

impl Rig {
    fn new(stored_word: u16) -> Rig {
        let config = SystemConfig::default();
        let shared = Arc::new(SharedState::new(&config.sampling));
        let status = Arc::new(RwLock::new(DisciplineStatus::default()));
        let state = BenchState::shared(0.0, config.sampling.phase_midpoint);
        let (mem, store) = MemTrimStore::with_word(stored_word);

        let front = CaptureFront::new(shared.clone(), BenchAdc(state.clone()), &config.sampling);
        let gate = FixGate::new(shared.clone(), &config.sampling);
        let foreground = Foreground::new(
            shared.clone(),
            config,
            BenchDac(state.clone()),
            mem,
            NullWatchdog,
            NullLeds,
            ResetCause::PowerOn,
            status.clone(),
        )
        .expect("boot");

        Rig {
            shared,
            state,
            front,
            gate,
            foreground,
            store,
            status,
            total_ticks: 0,
        }
    }

    /// One PPS edge advancing the oscillator by `ticks`, with the overflow
    /// interrupts replayed and a foreground pass afterwards.
    fn pps(&mut self, ticks: u64) {
        self.total_ticks += ticks;
        let target = ((self.total_ticks >> 16) & 0xFFFF) as u16;
        while self.shared.ticks.hibits() != target {
            self.shared.ticks.overflow();
        }
        self.front
            .on_capture((self.total_ticks & 0xFFFF) as u16, false)
            .expect("capture");
        self.foreground.poll().expect("poll");
    }

    /// One full window whose tick surplus lands on the closing edge.
    fn window(&mut self, delta: i64) {
        for _ in 0..W - 1 {
            self.pps(NOMINAL);
        }
        self.pps(NOMINAL.wrapping_add_signed(delta));
    }

    fn lock(&mut self) {
        self.gate.on_sentence(&encode_gsa(true, "1.61"));
        self.foreground.poll().expect("poll");
    }

    fn unlock(&mut self) {
        self.gate.on_sentence(&encode_gsa(false, "9.99"));
        self.foreground.poll().expect("poll");
    }

    fn status(&self) -> DisciplineStatus {
        self.status.read().unwrap().clone()
    }

    fn dac_word(&self) -> u16 {
        self.state.borrow().dac_word
    }

    fn dac_writes(&self) -> u32 {
        self.state.borrow().dac_writes
    }

    fn nv_writes(&self) -> u32 {
        self.store.borrow().writes
    }
}

// ---------------------------------------------------------------------------
// Scenario 1: cold start from uninitialized EEPROM
// ---------------------------------------------------------------------------

#[test]
fn test_cold_start_blank_eeprom() {
    let mut rig = Rig::new(BLANK_WORD);

    // Blank cell defaults to mid-scale; the part powers up there, so no
    // physical frame goes out.
    assert_eq!(rig.dac_word(), DAC_MIDPOINT);
    assert_eq!(rig.dac_writes(), 0);

    // Unlocked edge establishes the baseline, then the fix arrives.
    rig.pps(NOMINAL);
    rig.lock();
    assert_eq!(rig.status().fix, GpsFix::Locked3D);
    assert_eq!(rig.dac_word(), DAC_MIDPOINT);

    // The first closed window is the warm-up: no PI update.
    rig.window(0);
    let st = rig.status();
    assert_eq!(st.windows_seen, 1);
    assert_eq!(st.sample_fill, 0);
    assert_eq!(st.total_error_centi, 0);
    assert_eq!(rig.dac_writes(), 0);
    assert_eq!(st.trim_percent_centi, 0);
}

// ---------------------------------------------------------------------------
// Scenario 2: steady state with zero error
// ---------------------------------------------------------------------------

#[test]
fn test_steady_state_zero_error() {
    let mut rig = Rig::new(DAC_MIDPOINT);
    rig.pps(NOMINAL);
    rig.lock();
    rig.window(0); // warm-up

    for _ in 0..10 {
        rig.window(0);
    }

    let st = rig.status();
    assert_eq!(st.sample_fill, 10);
    assert_eq!(st.sample_drift_deci, 0);
    assert_eq!(st.current_error_centi, 0);
    assert_eq!(st.total_error_centi, 0);
    assert_eq!(st.grade, LockGrade::Best);
    assert_eq!(rig.dac_word(), DAC_MIDPOINT);
    assert_eq!(rig.dac_writes(), 0);
    // Drift criterion holds but the stored word is already in range.
    assert_eq!(rig.nv_writes(), 0);
}

// ---------------------------------------------------------------------------
// Scenario 3: step frequency error
// ---------------------------------------------------------------------------

#[test]
fn test_step_error_converges_monotonically() {
    let mut rig = Rig::new(DAC_MIDPOINT);
    rig.pps(NOMINAL);
    rig.lock();
    rig.window(0); // warm-up

    let mut last_word = rig.dac_word();
    for n in 1..=10i64 {
        rig.window(100);
        let st = rig.status();

        // Rolling sum is 100 per held sample; division is by K regardless
        // of fill.
        assert_eq!(st.sample_fill, n as usize);
        assert_eq!(st.sample_drift_deci, 100 * n);

        if n == 1 {
            // First measured window, exact integer chain:
            // CE = 10*100, adj = -(1000*31400 + 1000*13)/10000 = -3141,
            // trim +31.41 steps, word up 31.
            assert_eq!(st.current_error_centi, 1000);
            assert_eq!(st.total_error_centi, 1000);
            assert_eq!(rig.dac_word(), DAC_MIDPOINT + 31);
        }

        // Running fast: the word climbs every window, pulling the
        // oscillator down.
        assert!(rig.dac_word() > last_word, "window {n}: word must rise");
        last_word = rig.dac_word();
    }
}

// ---------------------------------------------------------------------------
// Scenario 4: outlier rejection
// ---------------------------------------------------------------------------

#[test]
fn test_outlier_rejected_without_side_effects() {
    let mut rig = Rig::new(DAC_MIDPOINT);
    rig.pps(NOMINAL);
    rig.lock();
    rig.window(0); // warm-up
    for _ in 0..3 {
        rig.window(0);
    }
    let before = rig.status();

    // 3000 ticks over the bound: reported, discarded, nothing else moves.
    rig.window(3000);
    let st = rig.status();
    assert_eq!(st.sample_fill, before.sample_fill);
    assert_eq!(st.windows_seen, before.windows_seen);
    assert_eq!(st.total_error_centi, before.total_error_centi);
    assert_eq!(rig.dac_word(), DAC_MIDPOINT);

    // The next window proceeds normally.
    rig.window(0);
    let st = rig.status();
    assert_eq!(st.windows_seen, before.windows_seen + 1);
    assert_eq!(st.sample_fill, before.sample_fill + 1);
}

// ---------------------------------------------------------------------------
// Scenario 5: lock loss and recovery (holdover)
// ---------------------------------------------------------------------------

#[test]
fn test_lock_loss_holds_trim_and_recovery_warms_up() {
    let mut rig = Rig::new(DAC_MIDPOINT);
    rig.pps(NOMINAL);
    rig.lock();
    rig.window(0); // warm-up
    for _ in 0..10 {
        rig.window(50);
    }
    let disciplined_word = rig.dac_word();
    assert!(disciplined_word > DAC_MIDPOINT);
    assert_ne!(rig.status().total_error_centi, 0);

    rig.unlock();
    let st = rig.status();
    assert_eq!(st.fix, GpsFix::Unlocked);
    assert_eq!(st.grade, LockGrade::None);
    assert_eq!(st.total_error_centi, 0);
    // Holdover: the DAC stands at the last commanded word.
    assert_eq!(rig.dac_word(), disciplined_word);

    // Ten seconds adrift: edges are tracked but not counted.
    let pps_before = rig.status().pps_seen;
    for _ in 0..10 {
        rig.pps(NOMINAL + 7);
    }
    assert_eq!(rig.status().pps_seen, pps_before);

    rig.lock();
    let windows_before = rig.status().windows_seen;
    rig.window(0);
    let st = rig.status();
    // The window across the gap went to the warm-up marker.
    assert_eq!(st.windows_seen, windows_before + 1);
    assert_eq!(st.sample_fill, 0);
    assert_eq!(rig.dac_word(), disciplined_word);

    // Samples accumulate from scratch afterwards.
    rig.window(0);
    assert_eq!(rig.status().sample_fill, 1);
}

// ---------------------------------------------------------------------------
// Scenario 6: the NV write gate
// ---------------------------------------------------------------------------

#[test]
fn test_nv_write_gate_requires_both_criteria() {
    // Blank cell: the stored word (0xFFFF) is far from anything the loop
    // commands, so the distance criterion is satisfied from the start.
    let mut rig = Rig::new(BLANK_WORD);
    rig.pps(NOMINAL);
    rig.lock();
    rig.window(0); // warm-up

    // Small error: CE = 10*1*10/10*10 = 10, inside the steady band.
    rig.window(1);
    assert_eq!(rig.status().current_error_centi, 10);
    assert_eq!(rig.nv_writes(), 1);
    assert_eq!(rig.store.borrow().word, rig.dac_word());

    // Still steady, but now the stored word is in range: no second write.
    rig.window(1);
    assert!(rig.status().current_error_centi.abs() < 100);
    assert_eq!(rig.nv_writes(), 1);
}

#[test]
fn test_nv_write_gate_blocks_on_large_error() {
    let mut rig = Rig::new(BLANK_WORD);
    rig.pps(NOMINAL);
    rig.lock();
    rig.window(0); // warm-up

    // CE = 200: outside the steady band, no write no matter how far the
    // stored word is.
    rig.window(20);
    assert_eq!(rig.status().current_error_centi, 200);
    assert_eq!(rig.nv_writes(), 0);
}

// ---------------------------------------------------------------------------
// Closed loop against the bench oscillator
// ---------------------------------------------------------------------------

#[test]
fn test_bench_loop_disciplines_a_fast_oscillator() {
    let config = SystemConfig::default();
    let shared = Arc::new(SharedState::new(&config.sampling));
    let status = Arc::new(RwLock::new(DisciplineStatus::default()));
    let state = BenchState::shared(40.0, config.sampling.phase_midpoint);
    let (mem, _cell) = MemTrimStore::blank();

    let mut oscillator = BenchOscillator::new(shared.clone(), state.clone(), &config.sampling);
    let mut gate = FixGate::new(shared.clone(), &config.sampling);
    let mut foreground = Foreground::new(
        shared,
        config,
        BenchDac(state.clone()),
        mem,
        NullWatchdog,
        NullLeds,
        ResetCause::PowerOn,
        status.clone(),
    )
    .expect("boot");

    // 10 s of acquisition, then a solid 3D fix for 7600 s (~300 windows).
    for second in 1..=7600u32 {
        gate.on_sentence(&encode_gsa(second > 10, "1.61"));
        oscillator.pps_second().expect("pps");
        foreground.poll().expect("poll");
    }

    let residual = state.borrow().error_ppb();
    assert!(
        residual.abs() < 5.0,
        "after 300 windows the 40 ppb error should be mostly gone, got {residual:+.2} ppb"
    );
    // The inverting DAC was driven up to slow the oscillator down.
    assert!(state.borrow().dac_word > DAC_MIDPOINT);
    let st = status.read().unwrap();
    assert_eq!(st.fix, GpsFix::Locked3D);
    assert!(st.grade >= LockGrade::Good, "grade was {:?}", st.grade);
}
