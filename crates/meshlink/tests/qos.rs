mod common;

use common::*;
use meshlink::{DataRequest, DataStatus, FrameType, MacConfig, RejectReason, Scheduled};

fn link<'a>(seg: &'a TestPool, frm: &'a TestPool, expiry: &'a TestExpiry) -> TestCore<'a> {
    TestCore::new(MacConfig::DEFAULT, seg, frm, expiry).unwrap()
}

fn request(handle: u16, priority: u8, droppable: bool) -> DataRequest<Vec<u8>> {
    DataRequest {
        priority,
        droppable,
        callback: Some(record_confirm),
        ..DataRequest::new(handle, payload(20, handle as u8))
    }
}

fn handles(core: &TestCore<'_>) -> Vec<u16> {
    core.packets().handles().collect()
}

#[test]
fn higher_priority_goes_first() {
    init_log();
    let (seg, frm, expiry) = (pool(4), pool(4), TestExpiry::new());
    let mut core = link(&seg, &frm, &expiry);

    for (handle, priority) in [(10, 3), (11, 1), (12, 2)] {
        assert_eq!(core.submit(request(handle, priority, false), FrameType::DATA).unwrap(), handle);
    }
    assert_eq!(core.packets().priorities().collect::<Vec<_>>(), [3, 2, 1]);
    assert_eq!(handles(&core), [10, 12, 11]);
    assert_eq!(core.tx_queue_len(), 3);
    assert!(core.is_tx_message_pending());
}

#[test]
fn equal_priority_is_first_come_first_served() {
    init_log();
    let (seg, frm, expiry) = (pool(4), pool(4), TestExpiry::new());
    let mut core = link(&seg, &frm, &expiry);

    for (handle, priority) in [(1, 2), (2, 5), (3, 2), (4, 5)] {
        core.submit(request(handle, priority, false), FrameType::DATA).unwrap();
    }
    assert_eq!(handles(&core), [2, 4, 1, 3]);
}

#[test]
fn packet_in_progress_is_not_preempted() {
    init_log();
    let (seg, frm, expiry) = (pool(4), pool(4), TestExpiry::new());
    let mut core = link(&seg, &frm, &expiry);
    let mut radio = FakeRadio::new(239);

    core.submit(request(1, 0, true), FrameType::DATA).unwrap();
    assert!(core.schedule(&mut radio).is_frame());
    assert_eq!(core.packets().in_progress(), Some(1));

    core.submit(request(2, 9, false), FrameType::DATA).unwrap();
    core.submit(request(3, 4, false), FrameType::DATA).unwrap();
    assert_eq!(handles(&core), [1, 2, 3]);
}

#[test]
fn full_queue_evicts_least_urgent_droppable() {
    init_log();
    let (seg, frm, expiry) = (pool(4), pool(4), TestExpiry::new());
    let mut core = link(&seg, &frm, &expiry);
    take_confirms();

    for (handle, priority) in [(1, 5), (2, 4), (3, 3), (4, 1)] {
        core.submit(request(handle, priority, true), FrameType::DATA).unwrap();
    }

    core.submit(request(5, 2, false), FrameType::DATA).unwrap();
    assert_eq!(handles(&core), [1, 2, 3, 5]);
    assert_eq!(take_confirms(), [(DataStatus::TransactionOverflow, 4)]);
    // The newcomer got in, so nothing overflowed
    assert_eq!(core.counters().tx_packet_evicted, 1);
    assert_eq!(core.counters().transaction_overflow, 0);

    // A droppable packet of equal priority may be evicted too
    core.submit(request(6, 3, true), FrameType::DATA).unwrap();
    assert_eq!(handles(&core), [1, 2, 6, 5]);
    assert_eq!(take_confirms(), [(DataStatus::TransactionOverflow, 3)]);
    assert_eq!(core.counters().tx_packet_evicted, 2);
    assert_eq!(core.counters().transaction_overflow, 0);
}

#[test]
fn full_queue_without_candidates_rejects() {
    init_log();
    let (seg, frm, expiry) = (pool(4), pool(4), TestExpiry::new());
    let mut core = link(&seg, &frm, &expiry);
    let mut radio = FakeRadio::new(239);
    take_confirms();

    // The droppable head is in progress, the rest are not droppable
    core.submit(request(1, 1, true), FrameType::DATA).unwrap();
    core.schedule(&mut radio);
    for handle in 2..=4 {
        core.submit(request(handle, 6, false), FrameType::DATA).unwrap();
    }
    // A droppable packet that is more urgent than the newcomer
    core.purge(4);
    core.submit(request(4, 8, true), FrameType::DATA).unwrap();

    let err = core.submit(request(7, 7, true), FrameType::DATA).unwrap_err();
    assert_eq!(err.reason, RejectReason::Overflow);
    assert_eq!(err.request.handle, 7);
    assert_eq!(err.request.payload, payload(20, 7));
    assert_eq!(handles(&core), [1, 4, 2, 3]);
    assert_eq!(core.counters().transaction_overflow, 1);
    assert_eq!(core.counters().tx_packet_evicted, 0);
    // Rejected packets are reported through the error, not the callback
    assert!(take_confirms().is_empty());
}

#[test]
fn unsendable_payloads_are_invalid() {
    init_log();
    let (seg, frm, expiry) = (pool(4), pool(4), TestExpiry::new());
    let mut core = link(&seg, &frm, &expiry);

    let empty = DataRequest::new(1, Vec::new());
    let err = core.submit(empty, FrameType::DATA).unwrap_err();
    assert_eq!(err.reason, RejectReason::InvalidParameter);

    let huge = DataRequest::new(2, payload(meshlink::MAX_PACKET_LEN + 1, 0));
    let err = core.submit(huge, FrameType::DATA).unwrap_err();
    assert_eq!(err.reason, RejectReason::InvalidParameter);

    // Short enough, but needs more segments than a packet may have
    let long = DataRequest::new(3, payload(2800, 0));
    let err = core.submit(long, FrameType::DATA).unwrap_err();
    assert_eq!(err.reason, RejectReason::InvalidParameter);

    let fits = DataRequest::new(4, payload(2700, 0));
    assert_eq!(core.submit(fits, FrameType::DATA).unwrap(), 4);
    assert_eq!(core.tx_queue_len(), 1);
}

#[test]
fn purge_and_flush_are_silent() {
    init_log();
    let (seg, frm, expiry) = (pool(4), pool(4), TestExpiry::new());
    let mut core = link(&seg, &frm, &expiry);
    take_confirms();

    for handle in 1..=4 {
        core.submit(request(handle, 0, true), FrameType::DATA).unwrap();
    }
    assert!(core.purge(2));
    assert!(!core.purge(2));
    assert!(!core.purge(99));
    assert_eq!(handles(&core), [1, 3, 4]);

    core.flush();
    assert_eq!(core.tx_queue_len(), 0);
    assert!(!core.is_tx_message_pending());
    assert!(take_confirms().is_empty());
}

#[test]
fn purging_the_packet_in_progress() {
    init_log();
    let (seg, frm, expiry) = (pool(4), pool(4), TestExpiry::new());
    let mut core = link(&seg, &frm, &expiry);
    let mut radio = FakeRadio::new(239);
    take_confirms();

    core.submit(request(1, 5, false), FrameType::DATA).unwrap();
    core.submit(request(2, 1, false), FrameType::DATA).unwrap();
    assert!(core.poll_tx(&mut radio));
    assert_eq!(core.packets().in_progress(), Some(1));

    assert!(core.purge(1));
    assert_eq!(core.packets().in_progress(), None);

    // The frame already with the radio is retired without touching the
    // next packet
    assert_eq!(core.phy_confirm(DataStatus::Success), None);
    assert!(core.frames().is_empty());
    assert_eq!(frm.num_free(), 4);

    assert!(core.poll_tx(&mut radio));
    assert_eq!(radio.sent.len(), 2);
    assert_eq!(radio.sent[1].payload, payload(20, 2));
    assert_eq!(radio.sent[1].header.segment_id, 0);
    let done = core.phy_confirm(DataStatus::Success).unwrap();
    assert_eq!(done.handle, 2);
    assert_eq!(done.status, DataStatus::Success);
    assert_eq!(take_confirms(), [(DataStatus::Success, 2)]);
}

#[test]
fn purged_frames_drain_before_the_next_packet() {
    init_log();
    let (seg, frm, expiry) = (pool(4), pool(4), TestExpiry::new());
    let mut core = link(&seg, &frm, &expiry);
    let mut radio = FakeRadio::new(239);

    core.submit(request(1, 5, false), FrameType::DATA).unwrap();
    core.submit(request(2, 1, false), FrameType::DATA).unwrap();
    assert!(core.schedule(&mut radio).is_frame());
    assert!(core.purge(1));

    // Packet 2 may not start while packet 1's frame is queued
    assert_eq!(core.schedule(&mut radio), Scheduled::Idle);
    assert_eq!(core.packets().in_progress(), None);
    assert!(core.transmit_next(&mut radio));
    assert_eq!(core.phy_confirm(DataStatus::Success), None);

    assert!(core.schedule(&mut radio).is_frame());
    assert_eq!(core.packets().in_progress(), Some(2));
}

#[test]
fn config_is_validated() {
    let (seg, frm, expiry) = (pool(4), pool(4), TestExpiry::new());
    let bad = MacConfig {
        reliability_low_count: 8,
        ..MacConfig::DEFAULT
    };
    assert!(matches!(
        TestCore::new(bad.clone(), &seg, &frm, &expiry),
        Err(meshlink::ConfigError::ReliabilityOutOfRange)
    ));

    let small = TestPool::new_boxslice(4, 64).unwrap();
    assert!(matches!(
        TestCore::new(MacConfig::DEFAULT, &small, &frm, &expiry),
        Err(meshlink::ConfigError::BlockTooSmall)
    ));

    let mut core = link(&seg, &frm, &expiry);
    assert_eq!(
        core.set_config(bad),
        Err(meshlink::ConfigError::ReliabilityOutOfRange)
    );
    assert_eq!(core.config(), &MacConfig::DEFAULT);
}
