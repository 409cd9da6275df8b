//! VScope: an on-device virtual oscilloscope for embedded microcontrollers.
//!
//! The scope samples a set of registered float variables from a timer ISR at
//! a fixed rate into a circular capture buffer with a configurable
//! pre-trigger region, exposes a second set of live "RT" variables the host
//! can read and write at any time, and serves a framed binary protocol over
//! whatever byte transport the application provides (UART, USB CDC, SPI...)
//! so a workstation tool can configure acquisition, arm a trigger, and
//! download captured snapshots.
//!
//! The wire format is CRSF-shaped (sync byte 0xC8, length, type, payload,
//! CRC-8 poly 0xD5 over type + payload); see `protocol` for the frame layout
//! and `wire` for the CRC. [Background on that framing style.](https://github.com/crsf-wg/crsf/wiki)
//!
//! There is exactly one scope per device. The application registers its
//! variables, calls [`init`] once at startup, and then drives the scope from
//! two places: the sampling ISR calls [`tick`], and the transport's receive
//! path calls [`feed`]. Responses go out synchronously through the `tx`
//! callback handed to [`init`].
//!
//! ```no_run
//! use vscope::Probe;
//!
//! static MOTOR_CURRENT: Probe = Probe::new(0.);
//! static BUS_VOLTAGE: Probe = Probe::new(0.);
//! static LOOP_GAIN: Probe = Probe::new(0.12);
//!
//! fn uart_send(bytes: &[u8]) {
//!     // Hand the response frame to the transport driver.
//! }
//!
//! fn startup() {
//!     vscope::register_var("motor_current", &MOTOR_CURRENT);
//!     vscope::register_var("bus_voltage", &BUS_VOLTAGE);
//!     vscope::register_rt_buffer("loop_gain", &LOOP_GAIN);
//!     vscope::init("bench-psu", 8, uart_send);
//! }
//!
//! // In the sampling timer ISR: publish fresh values, then tick.
//! fn sample_isr(adc_current: f32, adc_voltage: f32) {
//!     MOTOR_CURRENT.set(adc_current);
//!     BUS_VOLTAGE.set(adc_voltage);
//!     vscope::tick();
//! }
//!
//! // In the serial RX path:
//! fn on_serial_rx(bytes: &[u8], now_us: u32) {
//!     vscope::feed(bytes, now_us);
//! }
//! ```

#![cfg_attr(not(test), no_std)]

mod acquisition;
mod fmt;
mod protocol;
mod registry;
mod util;
mod wire;

use fmt::{info, log_warn as warn};

pub use acquisition::{ScopeState, TriggerMode};
pub use registry::{Probe, TxFn};
pub use wire::{crc8, MAX_PAYLOAD, SYNC_BYTE};

/// Acquisition channels sampled per frame.
pub const NUM_CHANNELS: usize = 5;

/// Capture buffer depth, in samples. At 20 bytes per frame this is the bulk
/// of the scope's RAM footprint.
pub const BUFFER_SIZE: usize = 1000;

/// Width of every name field (variables, RT entries, device name), including
/// the NUL pad; usable length is one less.
pub const NAME_LEN: usize = 16;

/// Variable catalog capacity.
pub const MAX_VARIABLES: usize = 32;

/// RT catalog capacity.
pub const RT_BUFFER_LEN: usize = 16;

/// Reported in the first byte of the GET_INFO response.
pub const PROTOCOL_VERSION: u8 = 1;

/// Inter-byte receive timeout. A partial frame whose next byte takes longer
/// than this is discarded; generous enough for USB CDC burst scheduling,
/// short enough to resync between host retries.
pub const FRAME_TIMEOUT_US: u32 = 100_000;

/// Register a variable for acquisition. The channel map can then route it
/// onto any acquisition channel.
///
/// Only valid before [`init`]; later calls are ignored, as are calls once the
/// catalog is full ([`MAX_VARIABLES`]). The host sees the registered count in
/// GET_INFO. Names longer than [`NAME_LEN`]` - 1` bytes are truncated.
pub fn register_var(name: &str, probe: &'static Probe) {
    registry::register_var(name, probe);
}

/// Register a live RT entry the host can read and write at any time (control
/// gains, setpoints, mode switches...). Same rules as [`register_var`], with
/// capacity [`RT_BUFFER_LEN`].
pub fn register_rt_buffer(name: &str, probe: &'static Probe) {
    registry::register_rt_buffer(name, probe);
}

/// Initialize the scope: seal registration, install the transmit callback,
/// reset acquisition to divider 1 / no pre-trigger with the trigger disabled,
/// and map channels onto the first registered variables.
///
/// The scope comes up HALTED, or MISCONFIGURED when fewer than
/// [`NUM_CHANNELS`] variables registered (the protocol still answers there,
/// so the host can see what happened).
///
/// Must complete before the sampling interrupt is enabled and before bytes
/// are fed; [`tick`] and [`feed`] do nothing until it has. May be called
/// again later (with the interrupt masked) to reset the scope; the catalogs
/// stay sealed.
pub fn init(device_name: &str, isr_khz: u16, tx: TxFn) {
    registry::configure(device_name, isr_khz, tx);
    let reg = registry::registry();
    acquisition::reset(reg.var_count);
    protocol::reset_receiver();
    registry::seal();

    if acquisition::state() == ScopeState::Misconfigured {
        warn!(
            "vscope: misconfigured, {} vars registered for {} channels",
            reg.var_count, NUM_CHANNELS as u8
        );
    } else {
        info!(
            "vscope: up, {} vars, {} rt entries, {} kHz",
            reg.var_count, reg.rt_count, isr_khz
        );
    }
}

/// Feed raw received transport bytes into the protocol. Call from the serial
/// RX path (task context) with a microsecond timestamp for the inter-byte
/// timeout; responses are transmitted synchronously from inside this call.
pub fn feed(data: &[u8], now_us: u32) {
    if !registry::sealed() {
        return;
    }
    protocol::feed(data, now_us);
}

/// One sampling tick. Call from the acquisition timer ISR at the rate
/// declared to [`init`]; the configured divider is applied internally.
pub fn tick() {
    if !registry::sealed() {
        return;
    }
    acquisition::tick();
}

/// Force a trigger, as if the edge detector had fired. Callable from either
/// context; has an effect only while the scope is RUNNING.
pub fn manual_trigger() {
    acquisition::manual_trigger();
}

/// Where the capture state machine currently stands.
pub fn state() -> ScopeState {
    acquisition::state()
}

/// True while a completed capture is available for the snapshot queries.
/// Cleared when the scope is re-armed (HALTED -> RUNNING).
pub fn snapshot_ready() -> bool {
    acquisition::snapshot_ready()
}

/// Read an RT entry by catalog index; 0.0 when out of range.
pub fn get_rt_buffer(idx: u8) -> f32 {
    let reg = registry::registry();
    if idx >= reg.rt_count {
        return 0.;
    }
    reg.rt[idx as usize].probe.get()
}

/// Write an RT entry by catalog index; ignored when out of range.
pub fn set_rt_buffer(idx: u8, value: f32) {
    let reg = registry::registry();
    if idx < reg.rt_count {
        reg.rt[idx as usize].probe.set(value);
    }
}
