use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use rilldb::{Engine, Offset, StorageError, StorageOptions, WalRecord};

fn open_engine(dir: &TempDir, namespace: &str) -> Engine {
    Engine::open(dir.path(), namespace, StorageOptions::default()).unwrap()
}

#[test]
fn waiting_before_any_append_times_out() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir, "test_wait_timeout");

    let result = engine.wait_for_append(Duration::from_millis(100), None, None);
    assert!(matches!(result, Err(StorageError::WaitTimeoutExceeded)));

    engine.close().unwrap();
}

#[test]
fn a_put_releases_a_blocked_waiter() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(open_engine(&dir, "test_wait_release"));

    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            engine.put(b"test-key", b"test-value").unwrap();
        })
    };

    let result = engine.wait_for_append(Duration::from_secs(3), None, None);
    assert!(result.is_ok(), "a put during the wait should release it");
    writer.join().unwrap();

    // With an offset already recorded and no last seen position, the wait returns at once
    engine
        .wait_for_append(Duration::from_millis(100), None, None)
        .unwrap();

    engine.close().unwrap();
}

#[test]
fn waiting_past_a_seen_offset_requires_a_newer_append() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir, "test_wait_last_seen");

    engine.put(b"k1", b"v1").unwrap();
    let seen = engine.current_offset();
    assert!(seen.is_some());

    // Nothing newer than `seen` exists yet
    let result = engine.wait_for_append(Duration::from_millis(100), seen, None);
    assert!(matches!(result, Err(StorageError::WaitTimeoutExceeded)));

    engine.put(b"k2", b"v2").unwrap();
    engine
        .wait_for_append(Duration::from_millis(100), seen, None)
        .unwrap();

    engine.close().unwrap();
}

#[test]
fn cancellation_wakes_a_waiter() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(open_engine(&dir, "test_wait_cancel"));
    engine.put(b"k", b"v").unwrap();

    let token = engine.cancel_token();
    let canceller = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            token.cancel();
        })
    };

    let result = engine.wait_for_append(Duration::from_secs(10), engine.current_offset(), Some(&token));
    assert!(matches!(result, Err(StorageError::Cancelled)));
    canceller.join().unwrap();

    engine.close().unwrap();
}

#[test]
fn one_broadcast_releases_every_waiter() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(open_engine(&dir, "test_wait_broadcast"));
    let waiters = 10;

    let handles: Vec<_> = (0..waiters)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.wait_for_append(Duration::from_secs(10), None, None))
        })
        .collect();

    // Give the waiters a moment to park before the single put
    thread::sleep(Duration::from_millis(50));
    engine.put(b"test-key", b"test-value").unwrap();

    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }

    // No waiter that saw the broadcast can observe a still-empty offset
    assert!(engine.current_offset().is_some());
    engine.close().unwrap();
}

#[test]
fn readers_stream_appended_records() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir, "test_reader");

    let pairs: Vec<(Vec<u8>, Vec<u8>)> = (0..10)
        .map(|i| {
            (
                format!("key_{i}").into_bytes(),
                format!("value_{i}").into_bytes(),
            )
        })
        .collect();
    for (key, value) in &pairs {
        engine.put(key, value).unwrap();
    }

    let mut reader = engine.new_reader().unwrap();
    let mut streamed = 0;
    while let Some((frame, _)) = reader.next().unwrap() {
        let record = WalRecord::decode(&frame).unwrap();
        assert_eq!(record.key, pairs[streamed].0);
        assert_eq!(record.value, pairs[streamed].1);
        streamed += 1;
    }
    assert_eq!(streamed, pairs.len());

    // The same reader picks up records appended after it hit the tail
    engine.put(b"late_key", b"late_value").unwrap();
    let (frame, _) = reader.next().unwrap().unwrap();
    let record = WalRecord::decode(&frame).unwrap();
    assert_eq!(record.key, b"late_key");

    engine.close().unwrap();
}

#[test]
fn readers_can_start_at_a_checkpointed_offset() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir, "test_reader_start");

    engine.put(b"old", b"old_value").unwrap();
    let resume_from = engine.current_offset().unwrap();
    engine.put(b"newer", b"newer_value").unwrap();

    // Inclusive start: the record at the provided offset is streamed first
    let mut reader = engine.new_reader_with_start(resume_from).unwrap();
    let (frame, _) = reader.next().unwrap().unwrap();
    assert_eq!(WalRecord::decode(&frame).unwrap().key, b"old");
    let (frame, _) = reader.next().unwrap().unwrap();
    assert_eq!(WalRecord::decode(&frame).unwrap().key, b"newer");
    assert!(reader.next().unwrap().is_none());

    engine.close().unwrap();
}

#[test]
fn reader_starts_past_the_current_offset_are_rejected() {
    let dir = TempDir::new().unwrap();
    let engine = open_engine(&dir, "test_reader_invalid");

    // An engine that has never appended has no valid starting point
    let result = engine.new_reader_with_start(Offset::new(1, 0, 0));
    assert!(matches!(result, Err(StorageError::InvalidOffset)));

    engine.put(b"k", b"v").unwrap();
    let current = engine.current_offset().unwrap();
    let past_the_end = Offset::new(current.segment_id + 1, 0, 0);
    let result = engine.new_reader_with_start(past_the_end);
    assert!(matches!(result, Err(StorageError::InvalidOffset)));

    engine.close().unwrap();
}

#[test]
fn a_tailing_reader_follows_a_waiting_consumer() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(open_engine(&dir, "test_reader_tail"));

    let mut reader = engine.new_reader().unwrap();
    let consumer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            engine
                .wait_for_append(Duration::from_secs(30), None, None)
                .unwrap();

            let mut seen: Vec<Vec<u8>> = vec![];
            while let Some((frame, _)) = reader.next().unwrap() {
                seen.push(WalRecord::decode(&frame).unwrap().key);
            }
            seen
        })
    };

    engine.put(b"streamed-key", b"streamed-value").unwrap();

    let seen = consumer.join().unwrap();
    assert!(seen.contains(&b"streamed-key".to_vec()));
    engine.close().unwrap();
}
