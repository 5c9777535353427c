#![allow(dead_code)]

use std::cell::RefCell;

use meshlink::{
    AddrMode, DataIndication, DataStatus, ExpiryChannel, Expired, FrameHeader, FrameType,
    LinkCore, MacAddr, Radio, RadioError, RxFrame, TimerId, TimerTarget, Timers, UpperLayer,
    blockpool::BufferPool,
};
use mutex::raw_impls::cs::CriticalSectionRawMutex;

pub type TestPool = BufferPool<CriticalSectionRawMutex, Box<[u8]>>;
pub type TestExpiry = meshlink::ExpiryQueue<CriticalSectionRawMutex, 16>;
pub type TestCore<'a> = LinkCore<'a, Vec<u8>, 3, 4, 4, 4>;

pub const BLOCK: usize = meshlink::PHY_MAX_PAYLOAD;

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn pool(blocks: usize) -> TestPool {
    TestPool::new_boxslice(blocks, BLOCK).unwrap()
}

pub fn addr(n: u8) -> MacAddr {
    MacAddr([0x00, 0x1D, 0x24, 0x00, n])
}

pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
}

// ---- radio ----

pub struct SentFrame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
    pub channel: u16,
}

pub struct FakeRadio {
    pub max_payload: u16,
    pub channel: u16,
    pub busy: bool,
    pub sent: Vec<SentFrame>,
}

impl FakeRadio {
    pub fn new(max_payload: u16) -> Self {
        Self {
            max_payload,
            channel: 1234,
            busy: false,
            sent: Vec::new(),
        }
    }
}

impl Radio for FakeRadio {
    fn max_tx_payload(&self) -> u16 {
        self.max_payload
    }

    fn random_channel(&mut self, channel_set: u8) -> u16 {
        self.channel + u16::from(channel_set)
    }

    fn transmit(
        &mut self,
        header: &FrameHeader,
        payload: &[u8],
        channel: u16,
    ) -> Result<(), RadioError> {
        if self.busy {
            return Err(RadioError::Busy);
        }
        self.sent.push(SentFrame {
            header: header.clone(),
            payload: payload.to_vec(),
            channel,
        });
        Ok(())
    }
}

// ---- timers ----

#[derive(Default)]
pub struct FakeTimers {
    pub next: TimerId,
    pub armed: Vec<(TimerId, u32, TimerTarget)>,
    pub cancelled: Vec<TimerId>,
    pub fail: bool,
}

impl FakeTimers {
    /// Timers armed and neither cancelled nor fired
    pub fn live(&self) -> Vec<(TimerId, TimerTarget)> {
        self.armed.iter().map(|(id, _, t)| (*id, *t)).collect()
    }

    pub fn live_for(&self, target: TimerTarget) -> Option<TimerId> {
        self.armed
            .iter()
            .find(|(_, _, t)| *t == target)
            .map(|(id, _, _)| *id)
    }

    /// Fire a timer the way a host timer service would: post, nothing more
    pub fn fire(&mut self, id: TimerId, expiry: &dyn ExpiryChannel) {
        let Some(pos) = self.armed.iter().position(|(i, _, _)| *i == id) else {
            panic!("timer {id} is not armed");
        };
        let (id, _, target) = self.armed.remove(pos);
        expiry
            .post(Expired {
                target,
                timer: Some(id),
            })
            .unwrap();
    }

    pub fn fire_all(&mut self, expiry: &dyn ExpiryChannel) {
        while let Some((id, _, _)) = self.armed.first().copied() {
            self.fire(id, expiry);
        }
    }
}

impl Timers for FakeTimers {
    fn arm(&mut self, duration_ms: u32, target: TimerTarget) -> Option<TimerId> {
        if self.fail {
            return None;
        }
        self.next += 1;
        self.armed.push((self.next, duration_ms, target));
        Some(self.next)
    }

    fn cancel(&mut self, id: TimerId) {
        self.armed.retain(|(i, _, _)| *i != id);
        self.cancelled.push(id);
    }
}

// ---- upper layer ----

#[derive(Debug, Clone, PartialEq)]
pub struct Delivered {
    pub src_addr: MacAddr,
    pub dst_addr_mode: AddrMode,
    pub segment_count: u8,
    pub channel: u16,
    pub rssi: u16,
    pub danl: u16,
    pub timestamp: u64,
    pub payload: Vec<u8>,
}

#[derive(Default)]
pub struct Recorder {
    pub delivered: Vec<Delivered>,
}

impl UpperLayer for Recorder {
    fn data_indication(&mut self, ind: &DataIndication<'_>) {
        self.delivered.push(Delivered {
            src_addr: ind.src_addr,
            dst_addr_mode: ind.dst_addr_mode,
            segment_count: ind.segment_count,
            channel: ind.channel,
            rssi: ind.rssi,
            danl: ind.danl,
            timestamp: ind.timestamp,
            payload: ind.payload.to_vec(),
        });
    }
}

// ---- confirmations ----

thread_local! {
    static CONFIRMED: RefCell<Vec<(DataStatus, u16)>> = const { RefCell::new(Vec::new()) };
}

pub fn record_confirm(status: DataStatus, handle: u16) {
    CONFIRMED.with(|c| c.borrow_mut().push((status, handle)));
}

pub fn take_confirms() -> Vec<(DataStatus, u16)> {
    CONFIRMED.with(|c| c.take())
}

// ---- inbound frames ----

/// Build the frames a sender would produce for `data`, with `per_frame`
/// payload bytes in every frame
pub fn segments(src: MacAddr, packet_id: u8, data: &[u8], per_frame: usize) -> Vec<RxFrame<'_>> {
    let chunks: Vec<&[u8]> = data.chunks(per_frame).collect();
    let count = (chunks.len() - 1) as u8;
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut header = FrameHeader::new(FrameType::DATA);
            header.src_addr = src;
            header.packet_id = packet_id;
            header.segmentation = count > 0;
            header.segment_id = i as u8;
            header.segment_count = count;
            header.length = data.len() as u16;
            RxFrame {
                header,
                payload: chunk,
                channel: 42,
                rssi_dbm: -80.0,
                danl_dbm: -110.0,
                timestamp: 1000 + i as u64,
            }
        })
        .collect()
}

/// Turn what a [`FakeRadio`] sent into what the peer's radio would hand up
pub fn as_received<'a>(sent: &'a [SentFrame], rssi: &[f32]) -> Vec<RxFrame<'a>> {
    sent.iter()
        .zip(rssi.iter().copied().chain(std::iter::repeat(-80.0)))
        .map(|(f, rssi_dbm)| RxFrame {
            header: f.header.clone(),
            payload: &f.payload,
            channel: f.channel,
            rssi_dbm,
            danl_dbm: -110.0,
            timestamp: 5000,
        })
        .collect()
}
