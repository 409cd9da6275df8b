//! Variable registration and the sealed catalogs.
//!
//! During startup the application registers the float values it wants the
//! scope to see: samplable variables (mapped onto acquisition channels) and
//! RT entries (live controls the host can read and write at any time). Both
//! catalogs are append-only and sealed by `init`; registration attempts after
//! that are ignored, and the host discovers what actually registered through
//! GET_INFO's counts.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::fmt::debug;
use crate::util::ContextCell;
use crate::wire;
use crate::{MAX_VARIABLES, NAME_LEN, RT_BUFFER_LEN};

/// Callback that puts response bytes on the wire. Blocking, best-effort: the
/// scope assumes success and never retries.
pub type TxFn = fn(&[u8]);

/// A float value shared between the application and the scope: the
/// application owns it as a `static`, writes it from wherever the value is
/// produced, and registers a reference to it. Backed by a single atomic word,
/// so reads and writes never tear between the sampling ISR and task code.
#[repr(transparent)]
pub struct Probe(AtomicU32);

impl Probe {
    pub const fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Sampling target for channels mapped past the end of the catalog (or for an
/// empty catalog); always reads 0.
static ZERO: Probe = Probe::new(0.);

pub(crate) fn zero_probe() -> &'static Probe {
    &ZERO
}

#[derive(Clone, Copy)]
pub(crate) struct Entry {
    pub name: [u8; NAME_LEN],
    pub probe: &'static Probe,
}

const EMPTY_ENTRY: Entry = Entry {
    name: [0; NAME_LEN],
    probe: &ZERO,
};

pub(crate) struct Registry {
    pub vars: [Entry; MAX_VARIABLES],
    pub var_count: u8,
    pub rt: [Entry; RT_BUFFER_LEN],
    pub rt_count: u8,
    pub device_name: [u8; NAME_LEN],
    pub isr_khz: u16,
    pub tx: TxFn,
}

fn tx_stub(_: &[u8]) {}

static REGISTRY: ContextCell<Registry> = ContextCell::new(Registry {
    vars: [EMPTY_ENTRY; MAX_VARIABLES],
    var_count: 0,
    rt: [EMPTY_ENTRY; RT_BUFFER_LEN],
    rt_count: 0,
    device_name: [0; NAME_LEN],
    isr_khz: 0,
    tx: tx_stub,
});

/// True once `init` has sealed registration. Doubles as the gate that keeps
/// `tick` and `feed` out until the catalogs stop changing.
static SEALED: AtomicBool = AtomicBool::new(false);

pub(crate) fn sealed() -> bool {
    SEALED.load(Ordering::Acquire)
}

/// Read access to the catalogs and link config.
pub(crate) fn registry() -> &'static Registry {
    // SAFETY: mutation only happens through `with_mut` below, which is
    // confined to the startup window before the sampling interrupt and the
    // serial task run (the crate-level init contract).
    unsafe { REGISTRY.get_ref() }
}

fn with_mut<R>(f: impl FnOnce(&mut Registry) -> R) -> R {
    // SAFETY: only reachable from registration and `init`, which the init
    // contract confines to a single context before the scope is live.
    unsafe { REGISTRY.with_mut(f) }
}

pub(crate) fn register_var(name: &str, probe: &'static Probe) {
    if sealed() {
        debug!("vscope: var registration after init ignored");
        return;
    }
    with_mut(|reg| {
        if (reg.var_count as usize) == MAX_VARIABLES {
            debug!("vscope: var catalog full");
            return;
        }
        let entry = &mut reg.vars[reg.var_count as usize];
        wire::write_str_fixed(&mut entry.name, name);
        entry.probe = probe;
        reg.var_count += 1;
    });
}

pub(crate) fn register_rt_buffer(name: &str, probe: &'static Probe) {
    if sealed() {
        debug!("vscope: rt registration after init ignored");
        return;
    }
    with_mut(|reg| {
        if (reg.rt_count as usize) == RT_BUFFER_LEN {
            debug!("vscope: rt catalog full");
            return;
        }
        let entry = &mut reg.rt[reg.rt_count as usize];
        wire::write_str_fixed(&mut entry.name, name);
        entry.probe = probe;
        reg.rt_count += 1;
    });
}

/// Store the link configuration. Part of `init`; see the contract there.
pub(crate) fn configure(device_name: &str, isr_khz: u16, tx: TxFn) {
    with_mut(|reg| {
        wire::write_str_fixed(&mut reg.device_name, device_name);
        reg.isr_khz = isr_khz;
        reg.tx = tx;
    });
}

pub(crate) fn seal() {
    SEALED.store(true, Ordering::Release);
}
