// tests/allocator_test.rs
//
// Partition allocation and claim behaviour of the log buffer, below the
// dispatcher surface.

use std::sync::{Arc, Barrier};
use std::thread;

use dmxp_dispatcher::Core::alloc::PartitionAllocator;
use dmxp_dispatcher::Core::Buffer::{FrameRead, LogBuffer, PartitionClaim};
use dmxp_dispatcher::Core::SharedMemory::REGION_ALIGNMENT;
use dmxp_dispatcher::Dispatch::LogBufferAppender;
use dmxp_dispatcher::{DispatcherError, Position};

const UNLIMITED: Position = Position::new(u64::MAX / 2);

#[test]
fn test_partition_allocator_bands() {
    let allocator = PartitionAllocator::new(3, 1000).unwrap();

    println!("Allocator Struct: {:#?}", allocator);

    assert_eq!(allocator.partition_count(), 3);
    assert_eq!(allocator.partition_size(), 1000);
    assert_eq!(allocator.band_stride(), 1024);
    assert_eq!(allocator.used_memory(), 3 * 1024);
    assert!(allocator.shm().size() >= allocator.used_memory());

    let partitions = allocator.create_partitions();
    assert_eq!(partitions.len(), 3);
    for (i, partition) in partitions.iter().enumerate() {
        assert_eq!(partition.index(), i);
        assert_eq!(partition.size(), 1000);
        assert_eq!(partition.tail_term(), 0);
        assert_eq!(partition.tail_offset(), 0);
        assert_eq!(allocator.band_offset(i) % REGION_ALIGNMENT, 0);
    }
}

#[test]
fn test_log_buffer_rejects_bad_geometry() {
    assert!(matches!(
        LogBuffer::new(1, 1024),
        Err(DispatcherError::Config { ref field, .. }) if field == "partition_count"
    ));
    assert!(matches!(
        LogBuffer::new(3, 1001),
        Err(DispatcherError::Config { ref field, .. }) if field == "partition_size"
    ));
    assert!(matches!(
        LogBuffer::new(3, 16),
        Err(DispatcherError::Config { ref field, .. }) if field == "partition_size"
    ));
}

#[test]
fn test_partition_claims_are_sequential() {
    let log = LogBuffer::new(3, 1024).unwrap();
    let partition = log.partition(0);

    let first = partition.try_claim(0, 120, UNLIMITED, log.codec());
    let second = partition.try_claim(0, 120, UNLIMITED, log.codec());
    assert_eq!(first, PartitionClaim::Claimed { offset: 0, filled: false });
    assert_eq!(second, PartitionClaim::Claimed { offset: 120, filled: false });
    assert_eq!(partition.tail_offset(), 240);

    // nothing committed yet
    assert!(!partition.is_committed(0));
    assert_eq!(log.frame_at(Position::ZERO), FrameRead::NotReady);

    // wrong term
    assert_eq!(
        log.partition(1).try_claim(1, 120, UNLIMITED, log.codec()),
        PartitionClaim::Stale
    );
}

#[test]
fn test_partition_claim_respects_limit() {
    let log = LogBuffer::new(3, 1024).unwrap();
    let partition = log.partition(0);

    assert_eq!(
        partition.try_claim(0, 120, Position::new(100), log.codec()),
        PartitionClaim::BackPressure
    );
    assert_eq!(partition.tail_offset(), 0);
    assert_eq!(
        partition.try_claim(0, 120, Position::new(120), log.codec()),
        PartitionClaim::Claimed { offset: 0, filled: false }
    );
}

#[test]
fn test_exact_fill_and_trip() {
    let log = LogBuffer::new(3, 256).unwrap();
    let partition = log.partition(0);

    assert_eq!(
        partition.try_claim(0, 256, UNLIMITED, log.codec()),
        PartitionClaim::Claimed { offset: 0, filled: true }
    );
    assert_eq!(partition.try_claim(0, 16, UNLIMITED, log.codec()), PartitionClaim::Exhausted);

    let other = log.partition(1);
    // the partition for term 1 is still waiting for its rotation
    assert_eq!(other.try_claim(1, 16, UNLIMITED, log.codec()), PartitionClaim::Stale);
}

#[test]
fn test_appender_pads_and_rotates() {
    let log = LogBuffer::new(3, 1024).unwrap();
    let appender = LogBufferAppender::new();

    let mut positions = Vec::new();
    for _ in 0..10 {
        let reservation = appender.claim(&log, 120, UNLIMITED).unwrap();
        positions.push(reservation.position.value());
    }

    println!("positions: {:?}", positions);
    println!("log: {:#?}", log);

    assert_eq!(positions, vec![0, 120, 240, 360, 480, 600, 720, 840, 1024, 1144]);
    assert_eq!(log.active_term(), 1);
    assert_eq!(appender.position().value(), 1264);
    assert_eq!(log.tail_position().value(), 1264);

    // the 64 bytes left in the first partition were padded
    let padding = log.partition(0).header_at(960).expect("padding committed");
    assert!(padding.is_padding());
    assert_eq!(padding.framed_length(), 64);
    assert_eq!(
        log.frame_at(Position::new(960)),
        FrameRead::Padding { next: Position::new(1024) }
    );
}

#[test]
fn test_appender_back_pressure() {
    let log = LogBuffer::new(3, 1024).unwrap();
    let appender = LogBufferAppender::new();

    for _ in 0..8 {
        appender.claim(&log, 120, Position::new(1024)).unwrap();
    }
    assert_eq!(
        appender.claim(&log, 120, Position::new(1024)),
        Err(DispatcherError::BackPressure)
    );
    assert_eq!(appender.position().value(), 960);
}

#[test]
fn test_end_of_partition_without_room_for_padding() {
    // 1016 used, 8 left: too small for a padding header
    let log = LogBuffer::new(2, 1024).unwrap();
    let appender = LogBufferAppender::new();

    appender.claim(&log, 1016, UNLIMITED).unwrap();
    let next = appender.claim(&log, 16, UNLIMITED).unwrap();
    assert_eq!(next.position.value(), 1024);
    assert_eq!(
        log.frame_at(Position::new(1016)),
        FrameRead::EndOfPartition { next: Position::new(1024) }
    );
}

#[test]
fn test_overrun_detected_after_recycle() {
    let log = LogBuffer::new(2, 256).unwrap();
    let appender = LogBufferAppender::new();

    // fill terms 0, 1 and start term 2, which reuses partition 0
    for _ in 0..3 {
        appender.claim(&log, 256, UNLIMITED).unwrap();
    }
    assert_eq!(log.active_term(), 3);
    assert!(matches!(
        log.frame_at(Position::ZERO),
        FrameRead::Overrun { term: 0, partition_term: 2 }
    ));
}

#[test]
fn test_concurrent_claims_never_overlap() {
    let threads = 4;
    let claims_per_thread = 500;
    let log = Arc::new(LogBuffer::new(4, 4096).unwrap());
    let appender = Arc::new(LogBufferAppender::new());
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let log = Arc::clone(&log);
            let appender = Arc::clone(&appender);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut claimed = Vec::with_capacity(claims_per_thread);
                for _ in 0..claims_per_thread {
                    let framed = 16 + 8 * fastrand::usize(0..32);
                    let reservation = appender.claim(&log, framed, UNLIMITED).unwrap();
                    claimed.push((reservation.position.value(), reservation.end().value()));
                }
                claimed
            })
        })
        .collect();

    let mut all: Vec<(u64, u64)> = handles
        .into_iter()
        .flat_map(|h| h.join().expect("claimer panicked"))
        .collect();
    all.sort_unstable();

    assert_eq!(all.len(), threads * claims_per_thread);
    for pair in all.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "overlapping claims {:?}", pair);
    }
    // every claim stays inside one partition
    for (start, end) in &all {
        assert_eq!(start / 4096, (end - 1) / 4096);
    }
    assert_eq!(appender.position().value(), all.last().unwrap().1);
}
