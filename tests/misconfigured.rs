//! A scope initialized with fewer variables than channels comes up
//! MISCONFIGURED: the protocol still answers (so the host can see what
//! happened), but the engine refuses to run. Needs its own process because
//! the catalogs seal once per process.

use std::sync::Mutex;

use vscope::{crc8, Probe, ScopeState};

static VOLTAGE: Probe = Probe::new(0.);
static CURRENT: Probe = Probe::new(0.);
static GAIN: Probe = Probe::new(0.);

static TX: Mutex<Vec<u8>> = Mutex::new(Vec::new());

fn capture_tx(bytes: &[u8]) {
    TX.lock().unwrap().extend_from_slice(bytes);
}

fn transact(msg_type: u8, payload: &[u8]) -> (u8, Vec<u8>) {
    let mut frame = vec![0xC8, (payload.len() + 2) as u8, msg_type];
    frame.extend_from_slice(payload);
    frame.push(crc8(&frame[2..]));
    vscope::feed(&frame, 0);

    let mut tx = TX.lock().unwrap();
    let body = tx[2..].to_vec();
    let len = tx[1] as usize;
    assert_eq!(tx.len(), len + 2, "expected exactly one response frame");
    assert_eq!(tx[0], 0xC8);
    assert_eq!(body[len - 1], crc8(&body[..len - 1]));
    tx.clear();
    (body[0], body[1..len - 1].to_vec())
}

#[test]
fn two_vars_on_five_channels() {
    vscope::register_var("voltage", &VOLTAGE);
    vscope::register_var("current", &CURRENT);
    vscope::register_rt_buffer("gain", &GAIN);
    vscope::init("half-built", 4, capture_tx);

    assert_eq!(vscope::state(), ScopeState::Misconfigured);
    assert_eq!(transact(0x04, &[]), (0x04, vec![3]));

    // Registration is sealed now; late entries are dropped on the floor.
    static LATE: Probe = Probe::new(0.);
    vscope::register_var("too_late", &LATE);
    vscope::register_rt_buffer("too_late", &LATE);
    let (_, info) = transact(0x01, &[]);
    assert_eq!(info[6], 2, "var count stays sealed");
    assert_eq!(info[7], 1, "rt count stays sealed");

    // Timing needs HALTED, which a misconfigured scope never reaches.
    let mut timing = 1u32.to_le_bytes().to_vec();
    timing.extend_from_slice(&0u32.to_le_bytes());
    assert_eq!(transact(0x03, &timing), (0xFF, vec![2]));

    // Run requests go nowhere; the engine is parked.
    transact(0x05, &[1]);
    for _ in 0..50 {
        vscope::tick();
    }
    assert_eq!(vscope::state(), ScopeState::Misconfigured);
    vscope::manual_trigger();
    assert!(!vscope::snapshot_ready());

    // Channels past the short catalog fall back to variable 0.
    assert_eq!(transact(0x0B, &[]), (0x0B, vec![0, 1, 0, 0, 0]));
    VOLTAGE.set(5.);
    CURRENT.set(2.);
    let (_, frame) = transact(0x07, &[]);
    assert_eq!(f32::from_bits(u32::from_le_bytes(frame[0..4].try_into().unwrap())), 5.);
    assert_eq!(f32::from_bits(u32::from_le_bytes(frame[4..8].try_into().unwrap())), 2.);
    assert_eq!(f32::from_bits(u32::from_le_bytes(frame[8..12].try_into().unwrap())), 5.);

    // Remapping within the short catalog is still allowed, and still
    // validated against it.
    assert_eq!(transact(0x0C, &[1, 1, 1, 1, 1]), (0x0C, vec![1, 1, 1, 1, 1]));
    assert_eq!(transact(0x0C, &[2, 0, 0, 0, 0]), (0xFF, vec![2]));
}
