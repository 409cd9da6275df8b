//! Before `init`, the scope is inert: bytes fed to it go nowhere and ticks do
//! nothing. Needs its own process to observe the pre-init window at all.

use std::sync::Mutex;

use vscope::{crc8, Probe, ScopeState};

static A: Probe = Probe::new(0.);
static B: Probe = Probe::new(0.);
static C: Probe = Probe::new(0.);
static D: Probe = Probe::new(0.);
static E: Probe = Probe::new(0.);

static TX: Mutex<Vec<u8>> = Mutex::new(Vec::new());

fn capture_tx(bytes: &[u8]) {
    TX.lock().unwrap().extend_from_slice(bytes);
}

fn get_state_frame() -> Vec<u8> {
    let mut frame = vec![0xC8, 0x02, 0x04];
    frame.push(crc8(&frame[2..]));
    frame
}

#[test]
fn inert_until_init() {
    vscope::register_var("a", &A);
    vscope::register_var("b", &B);
    vscope::register_var("c", &C);
    vscope::register_var("d", &D);
    vscope::register_var("e", &E);

    // No init yet: a perfectly valid request draws no response, and ticking
    // is a no-op.
    vscope::feed(&get_state_frame(), 0);
    assert!(TX.lock().unwrap().is_empty());
    for _ in 0..10 {
        vscope::tick();
    }
    vscope::manual_trigger();
    assert!(!vscope::snapshot_ready());
    assert_eq!(vscope::get_rt_buffer(0), 0.);

    // After init the same bytes get their answer.
    vscope::init("late-riser", 2, capture_tx);
    assert_eq!(vscope::state(), ScopeState::Halted);
    vscope::feed(&get_state_frame(), 0);
    let tx = TX.lock().unwrap();
    assert_eq!(tx.as_slice(), &[0xC8, 0x03, 0x04, 0x00, 0x2C]);
}
