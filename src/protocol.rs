//! The host link: a framed, CRC-checked request/response protocol over the
//! user-supplied byte transport.
//!
//! Frame layout, both directions:
//!
//! `SYNC (0xC8) | LEN | TYPE | PAYLOAD | CRC8(TYPE..PAYLOAD)`
//!
//! where LEN counts TYPE + PAYLOAD + CRC. The receiver is a byte-fed state
//! machine with an inter-byte timeout, so a half-delivered frame eventually
//! flushes and the next sync byte re-synchronizes the stream. Every valid
//! request produces exactly one response frame (possibly an ERROR frame);
//! frames that fail the length gate or the CRC are dropped without a word,
//! and the host recovers by timeout.

use num_enum::TryFromPrimitive;

use crate::acquisition::{self, ScopeState, TriggerMode};
use crate::fmt::debug;
use crate::registry;
use crate::util::ContextCell;
use crate::wire::{self, Writer, MAX_PAYLOAD, SYNC_BYTE};
use crate::{BUFFER_SIZE, FRAME_TIMEOUT_US, NAME_LEN, NUM_CHANNELS, PROTOCOL_VERSION, RT_BUFFER_LEN};

/// Request/response types. Responses echo the type of the request they answer;
/// `Error` only ever goes out.
#[derive(Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
enum MsgType {
    GetInfo = 0x01,
    GetTiming = 0x02,
    SetTiming = 0x03,
    GetState = 0x04,
    SetState = 0x05,
    Trigger = 0x06,
    GetFrame = 0x07,
    GetSnapshotHeader = 0x08,
    GetSnapshotData = 0x09,
    GetVarList = 0x0A,
    GetChannelMap = 0x0B,
    SetChannelMap = 0x0C,
    GetChannelLabels = 0x0D,
    GetRtLabels = 0x0E,
    GetRtBuffer = 0x0F,
    SetRtBuffer = 0x10,
    GetTrigger = 0x11,
    SetTrigger = 0x12,
    Error = 0xFF,
}

/// Error codes carried by ERROR frames. 3 is deliberately unused.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ErrorCode {
    BadLen = 1,
    BadParam = 2,
    Range = 4,
    NotReady = 5,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum RxState {
    Idle,
    Len,
    Data,
}

/// Byte-fed frame receiver. Holds at most one frame in flight; `buf` carries
/// TYPE + PAYLOAD + CRC (never the sync or length bytes).
struct Receiver {
    state: RxState,
    expected_len: usize,
    index: usize,
    last_byte_us: u32,
    buf: [u8; MAX_PAYLOAD + 2],
}

impl Receiver {
    const fn new() -> Self {
        Self {
            state: RxState::Idle,
            expected_len: 0,
            index: 0,
            last_byte_us: 0,
            buf: [0; MAX_PAYLOAD + 2],
        }
    }

    fn reset(&mut self) {
        self.state = RxState::Idle;
        self.expected_len = 0;
        self.index = 0;
    }

    /// Run `data` through the framing state machine, handing the type and
    /// payload of each CRC-valid frame to `sink`.
    fn feed(&mut self, data: &[u8], now_us: u32, mut sink: impl FnMut(u8, &[u8])) {
        if self.state != RxState::Idle
            && now_us.wrapping_sub(self.last_byte_us) > FRAME_TIMEOUT_US
        {
            // The line went quiet mid-frame; flush the stale partial.
            debug!("vscope: rx timeout, partial frame dropped");
            self.reset();
        }

        for &byte in data {
            match self.state {
                RxState::Idle => {
                    if byte == SYNC_BYTE {
                        self.state = RxState::Len;
                        self.last_byte_us = now_us;
                    }
                }
                RxState::Len => {
                    let len = byte as usize;
                    if len < 2 || len > MAX_PAYLOAD + 2 {
                        self.reset();
                    } else {
                        self.expected_len = len;
                        self.index = 0;
                        self.state = RxState::Data;
                    }
                    self.last_byte_us = now_us;
                }
                RxState::Data => {
                    self.buf[self.index] = byte;
                    self.index += 1;
                    self.last_byte_us = now_us;
                    if self.index >= self.expected_len {
                        let received = self.buf[self.expected_len - 1];
                        let calculated = wire::crc8(&self.buf[..self.expected_len - 1]);
                        if received == calculated {
                            sink(self.buf[0], &self.buf[1..self.expected_len - 1]);
                        } else {
                            debug!("vscope: rx crc mismatch, frame dropped");
                        }
                        self.reset();
                    }
                }
            }
        }
    }
}

static RECEIVER: ContextCell<Receiver> = ContextCell::new(Receiver::new());

/// Flush any in-flight frame; part of `init`.
pub(crate) fn reset_receiver() {
    // SAFETY: called from the startup context before the link is live.
    unsafe { RECEIVER.with_mut(Receiver::reset) }
}

/// Push received transport bytes through framing and dispatch.
pub(crate) fn feed(data: &[u8], now_us: u32) {
    if data.is_empty() {
        return;
    }
    // SAFETY: `feed` is only ever called from the single serial task context
    // (crate-level contract), so the receiver has one owner.
    unsafe { RECEIVER.with_mut(|rx| rx.feed(data, now_us, dispatch)) }
}

fn dispatch(msg_type: u8, payload: &[u8]) {
    let Ok(msg) = MsgType::try_from(msg_type) else {
        debug!("vscope: unknown message type {}", msg_type);
        send_error(ErrorCode::BadParam);
        return;
    };

    match msg {
        MsgType::GetInfo => {
            if expect_empty(payload) {
                get_info();
            }
        }
        MsgType::GetTiming => {
            if expect_empty(payload) {
                send_timing(MsgType::GetTiming);
            }
        }
        MsgType::SetTiming => set_timing(payload),
        MsgType::GetState => {
            if expect_empty(payload) {
                send_state(MsgType::GetState);
            }
        }
        MsgType::SetState => set_state(payload),
        MsgType::Trigger => {
            if expect_empty(payload) {
                acquisition::manual_trigger();
                send_frame(MsgType::Trigger, &[]);
            }
        }
        MsgType::GetFrame => {
            if expect_empty(payload) {
                get_frame();
            }
        }
        MsgType::GetSnapshotHeader => {
            if expect_empty(payload) {
                get_snapshot_header();
            }
        }
        MsgType::GetSnapshotData => get_snapshot_data(payload),
        MsgType::GetVarList => {
            let total = registry::registry().var_count;
            send_list(MsgType::GetVarList, payload, total, |id| {
                &registry::registry().vars[id as usize].name
            });
        }
        MsgType::GetChannelMap => {
            if expect_empty(payload) {
                send_channel_map(MsgType::GetChannelMap);
            }
        }
        MsgType::SetChannelMap => set_channel_map(payload),
        MsgType::GetChannelLabels => {
            if expect_empty(payload) {
                get_channel_labels();
            }
        }
        MsgType::GetRtLabels => {
            let total = registry::registry().rt_count;
            send_list(MsgType::GetRtLabels, payload, total, |id| {
                &registry::registry().rt[id as usize].name
            });
        }
        MsgType::GetRtBuffer => get_rt_buffer(payload),
        MsgType::SetRtBuffer => set_rt_buffer(payload),
        MsgType::GetTrigger => {
            if expect_empty(payload) {
                send_trigger(MsgType::GetTrigger);
            }
        }
        MsgType::SetTrigger => set_trigger(payload),
        // An inbound ERROR makes no sense; treat like an unknown type.
        MsgType::Error => send_error(ErrorCode::BadParam),
    }
}

/// Length gate for the commands that carry no payload.
fn expect_empty(payload: &[u8]) -> bool {
    if payload.is_empty() {
        true
    } else {
        send_error(ErrorCode::BadLen);
        false
    }
}

fn get_info() {
    let reg = registry::registry();
    let mut buf = [0; 10 + NAME_LEN];
    let mut w = Writer::new(&mut buf);
    w.push_u8(PROTOCOL_VERSION);
    w.push_u8(NUM_CHANNELS as u8);
    w.push_u16(BUFFER_SIZE as u16);
    w.push_u16(reg.isr_khz);
    w.push_u8(reg.var_count);
    w.push_u8(reg.rt_count);
    w.push_u8(RT_BUFFER_LEN as u8);
    w.push_u8(NAME_LEN as u8);
    w.push_bytes(&reg.device_name);
    send_frame(MsgType::GetInfo, w.done());
}

fn send_timing(reply: MsgType) {
    let mut buf = [0; 8];
    let mut w = Writer::new(&mut buf);
    w.push_u32(acquisition::divider());
    w.push_u32(acquisition::pre_trig());
    send_frame(reply, w.done());
}

fn set_timing(payload: &[u8]) {
    if payload.len() != 8 {
        send_error(ErrorCode::BadLen);
        return;
    }

    let divider = wire::read_u32(&payload[0..4]);
    let pre_trig = wire::read_u32(&payload[4..8]);

    if divider == 0 || pre_trig > BUFFER_SIZE as u32 {
        send_error(ErrorCode::BadParam);
        return;
    }
    if acquisition::state() != ScopeState::Halted {
        debug!("vscope: timing change rejected while not halted");
        send_error(ErrorCode::BadParam);
        return;
    }

    acquisition::set_timing(divider, pre_trig);
    send_timing(MsgType::SetTiming);
}

fn send_state(reply: MsgType) {
    send_frame(reply, &[acquisition::state() as u8]);
}

fn set_state(payload: &[u8]) {
    if payload.len() != 1 {
        send_error(ErrorCode::BadLen);
        return;
    }

    // MISCONFIGURED can't be requested; it is only ever entered by init.
    match ScopeState::try_from(payload[0]) {
        Ok(state) if state != ScopeState::Misconfigured => {
            acquisition::request_state(state);
            // The transition happens on a later tick; answer with where the
            // engine stands right now.
            send_state(MsgType::SetState);
        }
        _ => send_error(ErrorCode::BadParam),
    }
}

fn get_frame() {
    let mut buf = [0; NUM_CHANNELS * 4];
    let mut w = Writer::new(&mut buf);
    for value in acquisition::current_frame() {
        w.push_f32(value);
    }
    send_frame(MsgType::GetFrame, w.done());
}

fn get_snapshot_header() {
    if !acquisition::snapshot_ready() {
        send_error(ErrorCode::NotReady);
        return;
    }

    let meta = acquisition::snapshot_meta();
    let mut buf = [0; MAX_PAYLOAD];
    let mut w = Writer::new(&mut buf);
    w.push_bytes(&meta.channel_map);
    w.push_u32(meta.divider);
    w.push_u32(meta.pre_trig);
    w.push_f32(meta.threshold);
    w.push_u8(meta.trig_channel);
    w.push_u8(meta.trig_mode);
    for value in &meta.rt_values[..meta.rt_count as usize] {
        w.push_f32(*value);
    }
    send_frame(MsgType::GetSnapshotHeader, w.done());
}

fn get_snapshot_data(payload: &[u8]) {
    if !acquisition::snapshot_ready() {
        send_error(ErrorCode::NotReady);
        return;
    }
    if payload.len() != 3 {
        send_error(ErrorCode::BadLen);
        return;
    }

    let start = wire::read_u16(payload) as usize;
    let count = payload[2] as usize;

    if start >= BUFFER_SIZE || count == 0 || count > BUFFER_SIZE || start + count > BUFFER_SIZE {
        send_error(ErrorCode::BadParam);
        return;
    }

    // Whole rows only; a span that can't fit one frame is the host's problem.
    const MAX_SAMPLES: usize = MAX_PAYLOAD / (NUM_CHANNELS * 4);
    if count > MAX_SAMPLES {
        send_error(ErrorCode::BadLen);
        return;
    }

    let mut buf = [0; MAX_PAYLOAD];
    let mut w = Writer::new(&mut buf);
    for i in 0..count {
        for value in acquisition::read_sample(start + i) {
            w.push_f32(value);
        }
    }
    send_frame(MsgType::GetSnapshotData, w.done());
}

/// Shared layout for the windowed list queries (variable catalog, RT labels):
/// request is `[start, count]` with both bytes optional (missing start reads
/// as 0, missing count as 0xFF = "all"); response is total count, start,
/// emitted count, then `id + name` records.
fn send_list(
    reply: MsgType,
    payload: &[u8],
    total: u8,
    name_of: impl Fn(u8) -> &'static [u8; NAME_LEN],
) {
    if payload.len() > 2 {
        send_error(ErrorCode::BadLen);
        return;
    }
    let start = payload.first().copied().unwrap_or(0);
    let requested = payload.get(1).copied().unwrap_or(0xFF);

    if start > total {
        send_error(ErrorCode::BadParam);
        return;
    }

    const ENTRY_SIZE: usize = 1 + NAME_LEN;
    const MAX_ENTRIES: usize = (MAX_PAYLOAD - 3) / ENTRY_SIZE;
    let available = (total - start) as usize;
    let desired = if requested == 0xFF {
        available
    } else {
        requested as usize
    };
    let count = desired.min(available).min(MAX_ENTRIES);

    let mut buf = [0; MAX_PAYLOAD];
    let mut w = Writer::new(&mut buf);
    w.push_u8(total);
    w.push_u8(start);
    w.push_u8(count as u8);
    for i in 0..count {
        let id = start + i as u8;
        w.push_u8(id);
        w.push_bytes(name_of(id));
    }
    send_frame(reply, w.done());
}

fn send_channel_map(reply: MsgType) {
    send_frame(reply, &acquisition::channel_map());
}

fn set_channel_map(payload: &[u8]) {
    if payload.len() != NUM_CHANNELS {
        send_error(ErrorCode::BadLen);
        return;
    }
    if !acquisition::set_channel_map(payload) {
        send_error(ErrorCode::BadParam);
        return;
    }
    send_channel_map(MsgType::SetChannelMap);
}

fn get_channel_labels() {
    let reg = registry::registry();
    let mut buf = [0; NUM_CHANNELS * NAME_LEN];
    let mut w = Writer::new(&mut buf);
    for id in acquisition::channel_map() {
        if id < reg.var_count {
            w.push_bytes(&reg.vars[id as usize].name);
        } else {
            w.push_bytes(&[0; NAME_LEN]);
        }
    }
    send_frame(MsgType::GetChannelLabels, w.done());
}

fn get_rt_buffer(payload: &[u8]) {
    if payload.len() != 1 {
        send_error(ErrorCode::BadLen);
        return;
    }
    let idx = payload[0];
    let reg = registry::registry();
    if idx >= reg.rt_count {
        send_error(ErrorCode::Range);
        return;
    }
    send_rt_value(MsgType::GetRtBuffer, idx);
}

fn set_rt_buffer(payload: &[u8]) {
    if payload.len() != 5 {
        send_error(ErrorCode::BadLen);
        return;
    }
    let idx = payload[0];
    let reg = registry::registry();
    if idx >= reg.rt_count {
        send_error(ErrorCode::Range);
        return;
    }
    reg.rt[idx as usize].probe.set(wire::read_f32(&payload[1..5]));
    // Echo by reading back, so the host sees what actually landed.
    send_rt_value(MsgType::SetRtBuffer, idx);
}

fn send_rt_value(reply: MsgType, idx: u8) {
    let value = registry::registry().rt[idx as usize].probe.get();
    send_frame(reply, &value.to_bits().to_le_bytes());
}

fn send_trigger(reply: MsgType) {
    let (threshold, channel, mode) = acquisition::trigger_config();
    let mut buf = [0; 6];
    let mut w = Writer::new(&mut buf);
    w.push_f32(threshold);
    w.push_u8(channel);
    w.push_u8(mode);
    send_frame(reply, w.done());
}

fn set_trigger(payload: &[u8]) {
    if payload.len() != 6 {
        send_error(ErrorCode::BadLen);
        return;
    }

    let threshold = wire::read_f32(&payload[0..4]);
    let channel = payload[4];
    let Ok(mode) = TriggerMode::try_from(payload[5]) else {
        send_error(ErrorCode::BadParam);
        return;
    };
    if channel as usize >= NUM_CHANNELS {
        send_error(ErrorCode::BadParam);
        return;
    }

    acquisition::set_trigger(threshold, channel, mode);
    send_trigger(MsgType::SetTrigger);
}

/// Assemble one frame around `payload` and push it to the transport.
fn send_frame(msg_type: MsgType, payload: &[u8]) {
    if payload.len() > MAX_PAYLOAD {
        // Internal bug; never let an oversized frame onto the wire.
        debug!("vscope: oversized frame dropped ({} bytes)", payload.len());
        return;
    }

    let mut frame = [0u8; MAX_PAYLOAD + 4];
    frame[0] = SYNC_BYTE;
    frame[1] = (payload.len() + 2) as u8;
    frame[2] = msg_type as u8;
    frame[3..3 + payload.len()].copy_from_slice(payload);
    frame[3 + payload.len()] = wire::crc8(&frame[2..3 + payload.len()]);

    (registry::registry().tx)(&frame[..payload.len() + 4]);
}

fn send_error(code: ErrorCode) {
    send_frame(MsgType::Error, &[code as u8]);
}
