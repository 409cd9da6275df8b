//! The acquisition engine: the tick-driven capture state machine, the
//! circular sample buffer, the sign-change trigger detector, and the snapshot
//! frozen at the moment of trigger.
//!
//! `tick` runs from the sampling ISR. While RUNNING it continuously overwrites
//! the ring with one frame (all mapped channels) per engine pass, so the ring
//! always holds the most recent `BUFFER_SIZE` samples. A trigger switches to
//! ACQUIRING, which tops the ring up with `acq_time = BUFFER_SIZE - pre_trig`
//! further samples and then halts: whatever was already in the ring becomes
//! the pre-trigger record. `first_element` marks the oldest retained sample,
//! so readback walks `(first_element + offset) % BUFFER_SIZE`.
//!
//! Everything shared across the ISR/task boundary is a single-word atomic;
//! there are no locks anywhere on the tick path.

use core::sync::atomic::{
    AtomicBool, AtomicU32, AtomicU8, AtomicUsize,
    Ordering::{Acquire, Relaxed, Release},
};

use num_enum::TryFromPrimitive;

use crate::registry::{self, Probe};
use crate::{BUFFER_SIZE, NUM_CHANNELS, RT_BUFFER_LEN};

/// Capture state machine. Repr u8 is for passing over the wire.
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ScopeState {
    /// Not sampling. The only state that accepts timing changes.
    Halted = 0,
    /// Continuously sampling into the ring, armed for a trigger.
    Running = 1,
    /// Trigger seen; filling the post-trigger remainder of the ring.
    Acquiring = 2,
    /// `init` found fewer registered variables than channels. Sticky until
    /// re-init; the engine does nothing here.
    Misconfigured = 3,
}

/// Trigger edge selection.
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TriggerMode {
    Disabled = 0,
    Rising = 1,
    Falling = 2,
    Both = 3,
}

static STATE: AtomicU8 = AtomicU8::new(ScopeState::Halted as u8);
/// Requested state; the engine reads it on its next pass. Written by the
/// dispatcher and by trigger emission.
static REQUEST: AtomicU8 = AtomicU8::new(ScopeState::Halted as u8);

static DIVIDER: AtomicU32 = AtomicU32::new(1);
static PRE_TRIG: AtomicU32 = AtomicU32::new(0);
static ACQ_TIME: AtomicU32 = AtomicU32::new(BUFFER_SIZE as u32);

// Engine-local carry-over between ticks. Only `tick` writes these.
static DIVIDER_TICKS: AtomicU32 = AtomicU32::new(0);
static RUN_INDEX: AtomicU32 = AtomicU32::new(0);

static WRITE_INDEX: AtomicUsize = AtomicUsize::new(0);
static FIRST_ELEMENT: AtomicUsize = AtomicUsize::new(0);

// Trigger configuration. Threshold is f32 bits so it stays a single word.
static TRIG_THRESHOLD: AtomicU32 = AtomicU32::new(0);
static TRIG_CHANNEL: AtomicU8 = AtomicU8::new(0);
static TRIG_MODE: AtomicU8 = AtomicU8::new(TriggerMode::Disabled as u8);
/// Set on (re)configuration; makes the detector reseed its comparison point
/// instead of comparing across the discontinuity.
static TRIG_INVALID: AtomicBool = AtomicBool::new(true);
/// Detector state: last sample's delta against the threshold, as f32 bits.
static LAST_DELTA: AtomicU32 = AtomicU32::new(0);

const MAP_ZERO: AtomicU8 = AtomicU8::new(0);
static CHANNEL_MAP: [AtomicU8; NUM_CHANNELS] = [MAP_ZERO; NUM_CHANNELS];

// The capture ring: f32 bits, one row per sample. Statically allocated;
// BUFFER_SIZE * NUM_CHANNELS words.
const SAMPLE_ZERO: AtomicU32 = AtomicU32::new(0);
const ROW_ZERO: [AtomicU32; NUM_CHANNELS] = [SAMPLE_ZERO; NUM_CHANNELS];
static BUFFER: [[AtomicU32; NUM_CHANNELS]; BUFFER_SIZE] = [ROW_ZERO; BUFFER_SIZE];

/// Acquisition metadata + RT values frozen when the trigger lands, plus the
/// oldest-sample index once the capture completes. The host reads these
/// through the snapshot queries only after `SNAPSHOT_VALID` is observed true.
struct Snapshot {
    divider: AtomicU32,
    pre_trig: AtomicU32,
    channel_map: [AtomicU8; NUM_CHANNELS],
    threshold: AtomicU32,
    trig_channel: AtomicU8,
    trig_mode: AtomicU8,
    rt_values: [AtomicU32; RT_BUFFER_LEN],
    rt_count: AtomicU8,
}

static SNAPSHOT: Snapshot = Snapshot {
    divider: AtomicU32::new(0),
    pre_trig: AtomicU32::new(0),
    channel_map: [MAP_ZERO; NUM_CHANNELS],
    threshold: AtomicU32::new(0),
    trig_channel: AtomicU8::new(0),
    trig_mode: AtomicU8::new(0),
    rt_values: [SAMPLE_ZERO; RT_BUFFER_LEN],
    rt_count: AtomicU8::new(0),
};

static SNAPSHOT_VALID: AtomicBool = AtomicBool::new(false);

/// Plain-value copy of the frozen snapshot, for the dispatcher.
pub(crate) struct SnapshotMeta {
    pub divider: u32,
    pub pre_trig: u32,
    pub channel_map: [u8; NUM_CHANNELS],
    pub threshold: f32,
    pub trig_channel: u8,
    pub trig_mode: u8,
    pub rt_values: [f32; RT_BUFFER_LEN],
    pub rt_count: u8,
}

/// Reset the engine for `init`. Timing returns to divider 1 / no pre-trigger,
/// the trigger is disabled, the ring is zeroed, and the channel map is rebuilt
/// as the identity over the catalog (channels past the catalog fall back to
/// variable 0).
pub(crate) fn reset(var_count: u8) {
    let state = if (var_count as usize) < NUM_CHANNELS {
        ScopeState::Misconfigured
    } else {
        ScopeState::Halted
    };
    STATE.store(state as u8, Relaxed);
    REQUEST.store(ScopeState::Halted as u8, Relaxed);

    DIVIDER.store(1, Relaxed);
    PRE_TRIG.store(0, Relaxed);
    ACQ_TIME.store(BUFFER_SIZE as u32, Relaxed);
    DIVIDER_TICKS.store(0, Relaxed);
    RUN_INDEX.store(0, Relaxed);
    WRITE_INDEX.store(0, Relaxed);
    FIRST_ELEMENT.store(0, Relaxed);

    TRIG_THRESHOLD.store(0, Relaxed);
    TRIG_CHANNEL.store(0, Relaxed);
    TRIG_MODE.store(TriggerMode::Disabled as u8, Relaxed);
    TRIG_INVALID.store(true, Relaxed);
    LAST_DELTA.store(0, Relaxed);

    for (ch, cell) in CHANNEL_MAP.iter().enumerate() {
        let id = if ch < var_count as usize { ch as u8 } else { 0 };
        cell.store(id, Relaxed);
    }

    for row in &BUFFER {
        for cell in row {
            cell.store(0, Relaxed);
        }
    }

    SNAPSHOT.rt_count.store(0, Relaxed);
    SNAPSHOT_VALID.store(false, Relaxed);
}

pub(crate) fn state() -> ScopeState {
    ScopeState::try_from(STATE.load(Relaxed)).unwrap_or(ScopeState::Misconfigured)
}

pub(crate) fn request_state(state: ScopeState) {
    REQUEST.store(state as u8, Relaxed);
}

/// Force a trigger. No-op unless the scope is armed (RUNNING); the engine
/// picks the request up on its next pass.
pub(crate) fn manual_trigger() {
    if state() == ScopeState::Running {
        REQUEST.store(ScopeState::Acquiring as u8, Relaxed);
    }
}

pub(crate) fn divider() -> u32 {
    DIVIDER.load(Relaxed)
}

pub(crate) fn pre_trig() -> u32 {
    PRE_TRIG.load(Relaxed)
}

/// Install new timing. Validation (range, HALTED) is the dispatcher's job.
pub(crate) fn set_timing(divider: u32, pre_trig: u32) {
    DIVIDER.store(divider, Relaxed);
    PRE_TRIG.store(pre_trig, Relaxed);
    ACQ_TIME.store(BUFFER_SIZE as u32 - pre_trig, Relaxed);
}

pub(crate) fn channel_map() -> [u8; NUM_CHANNELS] {
    let mut map = [0; NUM_CHANNELS];
    for (dst, cell) in map.iter_mut().zip(&CHANNEL_MAP) {
        *dst = cell.load(Relaxed);
    }
    map
}

/// Validate and install a new channel map. All-or-nothing: if any id is out
/// of the catalog, nothing changes and `false` comes back.
pub(crate) fn set_channel_map(ids: &[u8]) -> bool {
    let var_count = registry::registry().var_count;
    if ids.iter().any(|&id| id >= var_count) {
        return false;
    }
    for (cell, &id) in CHANNEL_MAP.iter().zip(ids) {
        cell.store(id, Relaxed);
    }
    true
}

/// The probe a channel currently samples.
pub(crate) fn channel_probe(ch: usize) -> &'static Probe {
    let reg = registry::registry();
    let id = CHANNEL_MAP[ch].load(Relaxed);
    if id < reg.var_count {
        reg.vars[id as usize].probe
    } else {
        registry::zero_probe()
    }
}

/// One live frame: the current value of every mapped channel.
pub(crate) fn current_frame() -> [f32; NUM_CHANNELS] {
    let mut frame = [0.; NUM_CHANNELS];
    for (ch, value) in frame.iter_mut().enumerate() {
        *value = channel_probe(ch).get();
    }
    frame
}

pub(crate) fn trigger_config() -> (f32, u8, u8) {
    (
        f32::from_bits(TRIG_THRESHOLD.load(Relaxed)),
        TRIG_CHANNEL.load(Relaxed),
        TRIG_MODE.load(Relaxed),
    )
}

/// Install new trigger config and invalidate the detector's comparison point,
/// so the config change itself can never fake an edge.
pub(crate) fn set_trigger(threshold: f32, channel: u8, mode: TriggerMode) {
    TRIG_THRESHOLD.store(threshold.to_bits(), Relaxed);
    TRIG_CHANNEL.store(channel, Relaxed);
    TRIG_MODE.store(mode as u8, Relaxed);
    TRIG_INVALID.store(true, Relaxed);
}

pub(crate) fn snapshot_ready() -> bool {
    SNAPSHOT_VALID.load(Acquire)
}

pub(crate) fn snapshot_meta() -> SnapshotMeta {
    let mut meta = SnapshotMeta {
        divider: SNAPSHOT.divider.load(Relaxed),
        pre_trig: SNAPSHOT.pre_trig.load(Relaxed),
        channel_map: [0; NUM_CHANNELS],
        threshold: f32::from_bits(SNAPSHOT.threshold.load(Relaxed)),
        trig_channel: SNAPSHOT.trig_channel.load(Relaxed),
        trig_mode: SNAPSHOT.trig_mode.load(Relaxed),
        rt_values: [0.; RT_BUFFER_LEN],
        rt_count: SNAPSHOT.rt_count.load(Relaxed),
    };
    for (dst, cell) in meta.channel_map.iter_mut().zip(&SNAPSHOT.channel_map) {
        *dst = cell.load(Relaxed);
    }
    for (dst, cell) in meta.rt_values.iter_mut().zip(&SNAPSHOT.rt_values) {
        *dst = f32::from_bits(cell.load(Relaxed));
    }
    meta
}

/// Read one captured frame, `offset` samples past the oldest retained one.
pub(crate) fn read_sample(offset: usize) -> [f32; NUM_CHANNELS] {
    let index = (FIRST_ELEMENT.load(Relaxed) + offset) % BUFFER_SIZE;
    let mut frame = [0.; NUM_CHANNELS];
    for (value, cell) in frame.iter_mut().zip(&BUFFER[index]) {
        *value = f32::from_bits(cell.load(Relaxed));
    }
    frame
}

/// The ISR entry point: one sampling tick.
pub(crate) fn tick() {
    let ticks = DIVIDER_TICKS.load(Relaxed) + 1;
    if ticks < DIVIDER.load(Relaxed) {
        DIVIDER_TICKS.store(ticks, Relaxed);
        return;
    }
    DIVIDER_TICKS.store(0, Relaxed);

    check_trigger();

    let request = REQUEST.load(Relaxed);
    match state() {
        ScopeState::Halted => {
            WRITE_INDEX.store(0, Relaxed);
            if request == ScopeState::Running as u8 {
                STATE.store(ScopeState::Running as u8, Relaxed);
                SNAPSHOT_VALID.store(false, Relaxed);
            }
        }
        ScopeState::Running => {
            if request == ScopeState::Halted as u8 {
                STATE.store(ScopeState::Halted as u8, Relaxed);
            }
            if request == ScopeState::Acquiring as u8 {
                capture_snapshot();
                if ACQ_TIME.load(Relaxed) == 0 {
                    // Nothing to record post-trigger; the ring as it stands is
                    // the whole capture.
                    STATE.store(ScopeState::Halted as u8, Relaxed);
                    FIRST_ELEMENT.store(WRITE_INDEX.load(Relaxed), Relaxed);
                    SNAPSHOT_VALID.store(true, Release);
                } else {
                    STATE.store(ScopeState::Acquiring as u8, Relaxed);
                    RUN_INDEX.store(1, Relaxed);
                }
            }
            // The transition ticks above still record their frame.
            save_frame();
        }
        ScopeState::Acquiring => {
            if RUN_INDEX.load(Relaxed) == ACQ_TIME.load(Relaxed) {
                STATE.store(ScopeState::Halted as u8, Relaxed);
                FIRST_ELEMENT.store(WRITE_INDEX.load(Relaxed), Relaxed);
                SNAPSHOT_VALID.store(true, Release);
            } else {
                RUN_INDEX.fetch_add(1, Relaxed);
                save_frame();
            }
        }
        ScopeState::Misconfigured => {}
    }
}

/// Copy the current frame into the ring at the write index, then advance it.
fn save_frame() {
    let w = WRITE_INDEX.load(Relaxed);
    for (ch, cell) in BUFFER[w].iter().enumerate() {
        cell.store(channel_probe(ch).get().to_bits(), Relaxed);
    }
    WRITE_INDEX.store((w + 1) % BUFFER_SIZE, Relaxed);
}

/// Freeze acquisition metadata and the RT values at the moment of trigger.
fn capture_snapshot() {
    SNAPSHOT.divider.store(DIVIDER.load(Relaxed), Relaxed);
    SNAPSHOT.pre_trig.store(PRE_TRIG.load(Relaxed), Relaxed);
    for (dst, src) in SNAPSHOT.channel_map.iter().zip(&CHANNEL_MAP) {
        dst.store(src.load(Relaxed), Relaxed);
    }
    SNAPSHOT.threshold.store(TRIG_THRESHOLD.load(Relaxed), Relaxed);
    SNAPSHOT.trig_channel.store(TRIG_CHANNEL.load(Relaxed), Relaxed);
    SNAPSHOT.trig_mode.store(TRIG_MODE.load(Relaxed), Relaxed);

    // rt_count is sealed at init; copied anyway so the frozen record is
    // self-contained.
    let reg = registry::registry();
    SNAPSHOT.rt_count.store(reg.rt_count, Relaxed);
    for i in 0..reg.rt_count as usize {
        SNAPSHOT.rt_values[i].store(reg.rt[i].probe.get().to_bits(), Relaxed);
    }
}

/// Run the edge detector for this tick and emit a trigger request if it
/// fires. Runs in every state so the comparison point stays fresh; emission
/// itself only has an effect while RUNNING.
fn check_trigger() {
    let channel = TRIG_CHANNEL.load(Relaxed) as usize;
    let threshold = f32::from_bits(TRIG_THRESHOLD.load(Relaxed));
    let current = channel_probe(channel).get() - threshold;

    // First pass after (re)configuration: seed the comparison point only.
    if TRIG_INVALID.swap(false, Relaxed) {
        LAST_DELTA.store(current.to_bits(), Relaxed);
        return;
    }

    let last = f32::from_bits(LAST_DELTA.load(Relaxed));
    let mode = TriggerMode::try_from(TRIG_MODE.load(Relaxed)).unwrap_or(TriggerMode::Disabled);
    if edge_fires(last, current, mode) {
        manual_trigger();
    }

    LAST_DELTA.store(current.to_bits(), Relaxed);
}

/// Sign-change edge test on consecutive threshold deltas. A zero delta on
/// either side makes the product zero, not negative, so a sample sitting
/// exactly on the threshold never produces an edge by itself; that keeps two
/// same-direction crossings through zero from double-firing.
fn edge_fires(last: f32, current: f32, mode: TriggerMode) -> bool {
    if current * last < 0. {
        match mode {
            TriggerMode::Disabled => false,
            TriggerMode::Rising => current > 0.,
            TriggerMode::Falling => current < 0.,
            TriggerMode::Both => true,
        }
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_detector_truth_table() {
        use TriggerMode::*;

        // Rising crossing: delta goes negative -> positive.
        assert!(edge_fires(-1., 1., Rising));
        assert!(edge_fires(-1., 1., Both));
        assert!(!edge_fires(-1., 1., Falling));
        assert!(!edge_fires(-1., 1., Disabled));

        // Falling crossing.
        assert!(edge_fires(1., -1., Falling));
        assert!(edge_fires(1., -1., Both));
        assert!(!edge_fires(1., -1., Rising));

        // No crossing.
        assert!(!edge_fires(0.5, 2., Both));
        assert!(!edge_fires(-0.5, -2., Both));
    }

    #[test]
    fn edge_detector_zero_is_signless() {
        use TriggerMode::*;

        // A sample landing exactly on the threshold contributes no sign, in
        // either position; two same-direction crossings that touch zero on
        // the way must not double-fire.
        assert!(!edge_fires(0., 1., Both));
        assert!(!edge_fires(0., -1., Both));
        assert!(!edge_fires(-1., 0., Both));
        assert!(!edge_fires(1., 0., Both));
        assert!(!edge_fires(0., 0., Both));
    }

    #[test]
    fn edge_detector_ignores_nan() {
        assert!(!edge_fires(f32::NAN, 1., TriggerMode::Both));
        assert!(!edge_fires(-1., f32::NAN, TriggerMode::Both));
    }
}
