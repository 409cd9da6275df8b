//! Catalog capacity and name handling: overflowing registrations are dropped
//! silently, long names truncate to the field width, and the list queries
//! clamp their windows to what one frame can carry. Needs its own process
//! because the catalogs seal once per process.

use std::sync::Mutex;

use vscope::{crc8, Probe};

static PROBES: [Probe; 40] = {
    const P: Probe = Probe::new(0.);
    [P; 40]
};

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
    let len = tx[1] as usize;
    assert_eq!(tx.len(), len + 2, "expected exactly one response frame");
    assert_eq!(tx[0], 0xC8);
    let body = tx[2..].to_vec();
    assert_eq!(body[len - 1], crc8(&body[..len - 1]));
    tx.clear();
    (body[0], body[1..len - 1].to_vec())
}

fn name16(name: &str) -> Vec<u8> {
    let mut out = name.as_bytes().to_vec();
    out.resize(16, 0);
    out
}

#[test]
fn catalogs_cap_and_names_truncate() {
    // 40 offered, capacity 32; the overflow is dropped without a word.
    vscope::register_var("a_name_well_beyond_the_field", &PROBES[0]);
    vscope::register_var("", &PROBES[1]);
    for i in 2..40 {
        let name = format!("var_{i:02}");
        vscope::register_var(&name, &PROBES[i]);
    }
    // Same for the RT catalog, capacity 16.
    for i in 0..20 {
        let name = format!("rt_{i:02}");
        vscope::register_rt_buffer(&name, &PROBES[i]);
    }
    vscope::init("a_device_name_also_too_long", 1, capture_tx);

    let (_, info) = transact(0x01, &[]);
    assert_eq!(info[6], 32, "var catalog capped");
    assert_eq!(info[7], 16, "rt catalog capped");
    // Device name: truncated to 15 bytes plus the NUL.
    assert_eq!(&info[10..26], name16("a_device_name_a").as_slice());

    // A full var list doesn't fit one frame; the window clamps to 14 entries.
    let (_, list) = transact(0x0A, &[0, 0xFF]);
    assert_eq!(&list[..3], &[32, 0, 14]);
    assert_eq!(list.len(), 3 + 14 * 17);

    // Entry 0: truncated name. Entry 1: the nameless one reads all zero.
    assert_eq!(list[3], 0);
    assert_eq!(&list[4..20], name16("a_name_well_bey").as_slice());
    assert_eq!(list[20], 1);
    assert_eq!(&list[21..37], &[0u8; 16]);
    assert_eq!(list[37], 2);
    assert_eq!(&list[38..54], name16("var_02").as_slice());

    // Walking the rest of the catalog window by window.
    let (_, list) = transact(0x0A, &[14, 0xFF]);
    assert_eq!(&list[..3], &[32, 14, 14]);
    let (_, list) = transact(0x0A, &[28, 0xFF]);
    assert_eq!(&list[..3], &[32, 28, 4]);
    assert_eq!(list[3], 28);
    assert_eq!(&list[4..20], name16("var_28").as_slice());

    // RT labels clamp the same way.
    let (_, labels) = transact(0x0E, &[0, 0xFF]);
    assert_eq!(&labels[..3], &[16, 0, 14]);
    let (_, labels) = transact(0x0E, &[14, 0xFF]);
    assert_eq!(&labels[..3], &[16, 14, 2]);
    assert_eq!(&labels[4..20], name16("rt_14").as_slice());
}
