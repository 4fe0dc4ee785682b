use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::{tempdir, TempDir};

use crate::core::FRAME_HEADER_SIZE;
use crate::{RingBuffer, ShmqConfig, ShmqError};

// The TempDir has to stay alive next to the config: dropping it deletes the
// flink backing directory.
fn test_config(capacity: u32, max_payload_size: u32) -> (ShmqConfig, TempDir) {
    static REGION_COUNTER: AtomicUsize = AtomicUsize::new(0);
    let dir = tempdir().expect("failed to create temp dir");
    let cfg = ShmqConfig {
        data_dir: dir.path().to_string_lossy().into_owned(),
        name: format!(
            "shmq_test_{}_{}",
            std::process::id(),
            REGION_COUNTER.fetch_add(1, Ordering::SeqCst)
        ),
        capacity,
        max_payload_size,
    };
    (cfg, dir)
}

fn payload_for(seq: usize, len: usize) -> Vec<u8> {
    assert!(len >= 4);
    let mut bytes = vec![(seq % 251) as u8; len];
    bytes[..4].copy_from_slice(&(seq as u32).to_le_bytes());
    bytes
}

fn pop_expected(ring: &mut RingBuffer, expected: &mut VecDeque<Vec<u8>>) {
    let want = expected.pop_front().expect("nothing left to pop");
    let got = ring.pop().expect("queue unexpectedly empty");
    assert_eq!(got, want.as_slice());
}

#[test]
fn fifo_order_is_preserved() {
    let (cfg, _dir) = test_config(8192, 128);
    let mut ring = RingBuffer::create(&cfg).unwrap();

    let payloads: Vec<Vec<u8>> = (0..40).map(|i| payload_for(i, 4 + (i * 7) % 120)).collect();
    for p in &payloads {
        assert!(ring.push(p), "queue should have room for {} bytes", p.len());
    }
    for p in &payloads {
        assert_eq!(ring.pop().unwrap(), p.as_slice());
    }
    assert!(ring.is_empty());
}

#[test]
fn pop_on_empty_queue_returns_none() {
    let (cfg, _dir) = test_config(1024, 64);
    let mut ring = RingBuffer::create(&cfg).unwrap();
    assert!(ring.is_empty());
    assert!(ring.pop().is_none());
}

#[test]
fn wraparound_keeps_frames_intact() {
    // Small region so the test crosses the physical end many times, with
    // payload sizes that never divide the capacity evenly.
    let (cfg, _dir) = test_config(256, 64);
    let mut ring = RingBuffer::create(&cfg).unwrap();

    let mut expected: VecDeque<Vec<u8>> = VecDeque::new();
    let mut pushed_bytes = 0usize;
    for i in 0..600 {
        let p = payload_for(i, 4 + (i * 13) % 60);
        loop {
            if ring.push(&p) {
                break;
            }
            // Backpressure: drain one frame and retry.
            pop_expected(&mut ring, &mut expected);
        }
        pushed_bytes += p.len() + FRAME_HEADER_SIZE;
        expected.push_back(p);
        if i % 3 == 0 {
            pop_expected(&mut ring, &mut expected);
        }
    }
    while !expected.is_empty() {
        pop_expected(&mut ring, &mut expected);
    }
    assert!(ring.is_empty());
    // Far more traffic than the region holds, so it wrapped repeatedly.
    assert!(pushed_bytes > 4 * cfg.capacity as usize);
}

#[test]
fn push_fails_fast_when_consumer_lags() {
    let (cfg, _dir) = test_config(256, 64);
    let mut ring = RingBuffer::create(&cfg).unwrap();

    let p = payload_for(0, 64);
    let start = Instant::now();
    let mut accepted = 0;
    loop {
        if !ring.push(&p) {
            break;
        }
        accepted += 1;
        assert!(accepted < 64, "a 256-byte queue cannot absorb 64 frames");
    }
    assert!(accepted >= 2);
    // Ten retries with microsecond sleeps, not an unbounded stall.
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[test]
fn create_rejects_capacity_below_one_frame() {
    let (cfg, _dir) = test_config(60, 64);
    match RingBuffer::create(&cfg) {
        Err(ShmqError::CapacityTooSmall { capacity, required }) => {
            assert_eq!(capacity, 60);
            assert_eq!(required, 64 + FRAME_HEADER_SIZE as u32);
        }
        other => panic!("expected CapacityTooSmall, got {:?}", other.err()),
    }
}

#[test]
fn create_rejects_overlong_name() {
    let (mut cfg, _dir) = test_config(1024, 64);
    cfg.name = "x".repeat(64);
    assert!(matches!(
        RingBuffer::create(&cfg),
        Err(ShmqError::NameTooLong(_))
    ));
}

#[test]
fn create_rejects_existing_name() {
    let (cfg, _dir) = test_config(1024, 64);
    let ring = RingBuffer::create(&cfg).unwrap();
    assert!(matches!(
        RingBuffer::create(&cfg),
        Err(ShmqError::AlreadyExists(_))
    ));
    ring.destroy();
}

#[test]
#[should_panic(expected = "outside contract")]
fn push_panics_on_oversized_payload() {
    let (cfg, _dir) = test_config(1024, 64);
    let mut ring = RingBuffer::create(&cfg).unwrap();
    ring.push(&[0u8; 65]);
}

#[test]
#[should_panic(expected = "outside contract")]
fn push_panics_on_empty_payload() {
    let (cfg, _dir) = test_config(1024, 64);
    let mut ring = RingBuffer::create(&cfg).unwrap();
    ring.push(&[]);
}

#[test]
fn detach_leaves_region_attachable() {
    let (cfg, _dir) = test_config(1024, 64);
    let mut ring = RingBuffer::create(&cfg).unwrap();
    assert!(ring.push(b"first"));
    assert!(ring.push(b"second"));
    ring.detach();

    let mut ring = RingBuffer::attach(&cfg).unwrap();
    assert_eq!(ring.name(), cfg.name);
    assert_eq!(ring.pop().unwrap(), b"first");
    assert_eq!(ring.pop().unwrap(), b"second");
    assert!(ring.is_empty());
    ring.destroy();
}

#[test]
fn destroy_removes_region() {
    let (cfg, _dir) = test_config(1024, 64);
    let ring = RingBuffer::create(&cfg).unwrap();
    ring.destroy();
    assert!(RingBuffer::attach(&cfg).is_err());
    // The name is free again.
    let ring = RingBuffer::create(&cfg).unwrap();
    ring.destroy();
}

#[test]
fn producer_and_consumer_on_separate_mappings() {
    const MESSAGES: usize = 300;

    let (cfg, _dir) = test_config(512, 64);
    // The consumer keeps the creating mapping; the producer attaches its own.
    let mut consumer = RingBuffer::create(&cfg).unwrap();

    let producer_cfg = cfg.clone();
    let producer = thread::spawn(move || {
        let mut ring = RingBuffer::attach(&producer_cfg).unwrap();
        for i in 0..MESSAGES {
            let p = payload_for(i, 4 + (i * 11) % 60);
            while !ring.push(&p) {
                thread::sleep(Duration::from_micros(200));
            }
        }
    });

    let deadline = Instant::now() + Duration::from_secs(20);
    let mut received = 0usize;
    while received < MESSAGES {
        match consumer.pop() {
            Some(bytes) => {
                let expected = payload_for(received, 4 + (received * 11) % 60);
                assert_eq!(bytes, expected.as_slice());
                received += 1;
            }
            None => {
                assert!(Instant::now() < deadline, "consumer starved");
                thread::sleep(Duration::from_micros(200));
            }
        }
    }

    producer.join().unwrap();
    assert!(consumer.is_empty());
    consumer.destroy();
}
