//! # Backup and Replay Tests
//!
//! This test suite covers:
//! - Close-then-init round trips across instances
//! - Byte-exact replay of persisted chunks
//! - Bad backup files never blocking startup
//! - Backup directory housekeeping

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tempfile::TempDir;

use kiroku_buffer::{Buffer, BufferConfig, RecordMap, Transporter};

#[derive(Clone, Default)]
struct CapturingTransporter {
    calls: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl CapturingTransporter {
    fn calls(&self) -> Vec<(String, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Transporter for CapturingTransporter {
    fn transport(&mut self, tag: &str, data: &[u8]) -> kiroku_buffer::Result<()> {
        self.calls.lock().unwrap().push((tag.to_string(), data.to_vec()));
        Ok(())
    }
}

fn record(pairs: &[(&str, serde_json::Value)]) -> RecordMap {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn encoded_entry(timestamp: i64, map: &RecordMap) -> Vec<u8> {
    rmp_serde::to_vec(&(timestamp, serde_json::Value::Object(map.clone()))).unwrap()
}

fn backup_config(dir: &Path) -> BufferConfig {
    BufferConfig {
        file_backup_dir: Some(dir.to_path_buf()),
        heap_buffer_mode: true,
        ..Default::default()
    }
}

fn count_backup_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .flatten()
        .filter(|e| e.path().extension() == Some(std::ffi::OsStr::new("buf")))
        .count()
}

#[test]
fn test_close_persists_and_init_replays() {
    let dir = TempDir::new().unwrap();
    let map_a = record(&[("host", json!("alpha"))]);
    let map_b = record(&[("host", json!("beta"))]);

    // First session: append across two tags, then shut down.
    {
        let buffer = Buffer::new(backup_config(dir.path())).unwrap();
        buffer.append("svc.a", 10i64, &map_a).unwrap();
        buffer.append("svc.b", 20i64, &map_b).unwrap();
        buffer.close().unwrap();
    }
    assert_eq!(count_backup_files(dir.path()), 2);

    // Second session: replay and flush to a capturing transporter.
    let buffer = Buffer::new(backup_config(dir.path())).unwrap();
    buffer.init();
    assert_eq!(count_backup_files(dir.path()), 0);

    let mut transporter = CapturingTransporter::default();
    buffer.flush(&mut transporter, true).unwrap();

    let mut calls = transporter.calls();
    calls.sort_by(|x, y| x.0.cmp(&y.0));
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], ("svc.a".to_string(), encoded_entry(10, &map_a)));
    assert_eq!(calls[1], ("svc.b".to_string(), encoded_entry(20, &map_b)));
}

#[test]
fn test_round_trip_matches_uninterrupted_delivery() {
    let dir = TempDir::new().unwrap();
    let maps: Vec<RecordMap> = (0..50)
        .map(|i| record(&[("seq", json!(i)), ("body", json!(format!("payload-{}", i)))]))
        .collect();

    // What an uninterrupted flush would have transported.
    let direct = {
        let buffer = Buffer::new(BufferConfig {
            heap_buffer_mode: true,
            ..Default::default()
        })
        .unwrap();
        for (i, map) in maps.iter().enumerate() {
            buffer.append("t", i as i64, map).unwrap();
        }
        let mut transporter = CapturingTransporter::default();
        buffer.flush(&mut transporter, true).unwrap();
        transporter.calls()
    };

    // Same appends, but the instance shuts down and a new one replays.
    let replayed = {
        {
            let buffer = Buffer::new(backup_config(dir.path())).unwrap();
            for (i, map) in maps.iter().enumerate() {
                buffer.append("t", i as i64, map).unwrap();
            }
            buffer.close().unwrap();
        }
        let buffer = Buffer::new(backup_config(dir.path())).unwrap();
        buffer.init();
        let mut transporter = CapturingTransporter::default();
        buffer.flush(&mut transporter, true).unwrap();
        transporter.calls()
    };

    let flatten = |calls: &[(String, Vec<u8>)]| -> Vec<u8> {
        calls.iter().flat_map(|(_, data)| data.clone()).collect()
    };
    assert_eq!(flatten(&direct), flatten(&replayed));
}

#[test]
fn test_unflushed_queue_chunks_are_persisted() {
    let dir = TempDir::new().unwrap();
    let config = BufferConfig {
        chunk_initial_size: 16,
        chunk_retention_size: 16,
        ..backup_config(dir.path())
    };
    let buffer = Buffer::new(config).unwrap();

    // Seal two chunks into the flush queue plus one left in retention.
    let filler = record(&[("data", json!("0123456789abcdef"))]);
    buffer.append("t", 0i64, &filler).unwrap();
    buffer.append("t", 1i64, &filler).unwrap();
    let small = record(&[("k", json!("v"))]);
    buffer.append("t", 2i64, &small).unwrap();

    buffer.close().unwrap();
    assert_eq!(count_backup_files(dir.path()), 3);

    let buffer = Buffer::new(backup_config(dir.path())).unwrap();
    buffer.init();
    let mut transporter = CapturingTransporter::default();
    buffer.flush(&mut transporter, true).unwrap();

    let delivered: Vec<u8> = transporter
        .calls()
        .iter()
        .flat_map(|(_, data)| data.clone())
        .collect();
    let mut expected = encoded_entry(0, &filler);
    expected.extend(encoded_entry(1, &filler));
    expected.extend(encoded_entry(2, &small));
    assert_eq!(delivered, expected);
}

#[test]
fn test_bad_backup_file_does_not_block_startup() {
    let dir = TempDir::new().unwrap();

    {
        let buffer = Buffer::new(backup_config(dir.path())).unwrap();
        buffer
            .append("good", 0i64, &record(&[("k", json!("v"))]))
            .unwrap();
        buffer.close().unwrap();
    }

    // A file with two params fails the arity check during replay.
    fs::write(dir.path().join("kiroku_buffer_a#b_17000000000000.buf"), b"junk").unwrap();

    let buffer = Buffer::new(backup_config(dir.path())).unwrap();
    buffer.init();

    let mut transporter = CapturingTransporter::default();
    buffer.flush(&mut transporter, true).unwrap();
    assert_eq!(transporter.calls().len(), 1);
    assert_eq!(transporter.calls()[0].0, "good");

    // The good file was consumed, the bad one left in place.
    assert_eq!(count_backup_files(dir.path()), 1);
    assert_eq!(buffer.metrics().snapshot().replay_errors, 1);
}

#[test]
fn test_clear_backup_files() {
    let dir = TempDir::new().unwrap();
    {
        let buffer = Buffer::new(backup_config(dir.path())).unwrap();
        buffer.append("a", 0i64, &record(&[("k", json!(1))])).unwrap();
        buffer.append("b", 0i64, &record(&[("k", json!(2))])).unwrap();
        buffer.close().unwrap();
    }
    assert_eq!(count_backup_files(dir.path()), 2);

    let buffer = Buffer::new(backup_config(dir.path())).unwrap();
    buffer.clear_backup_files();
    assert_eq!(count_backup_files(dir.path()), 0);

    // Nothing to replay afterwards.
    buffer.init();
    let mut transporter = CapturingTransporter::default();
    buffer.flush(&mut transporter, true).unwrap();
    assert!(transporter.calls().is_empty());
}

#[test]
fn test_tags_with_reserved_characters_survive_round_trip() {
    let dir = TempDir::new().unwrap();
    let tag = "app#1_prod/eu %weird".to_string();
    let map = record(&[("k", json!("v"))]);

    {
        let buffer = Buffer::new(backup_config(dir.path())).unwrap();
        buffer.append(&tag, 0i64, &map).unwrap();
        buffer.close().unwrap();
    }

    let buffer = Buffer::new(backup_config(dir.path())).unwrap();
    buffer.init();
    let mut transporter = CapturingTransporter::default();
    buffer.flush(&mut transporter, true).unwrap();

    let calls = transporter.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, tag);
    assert_eq!(calls[0].1, encoded_entry(0, &map));
}

#[test]
fn test_close_without_backup_dir_discards_silently() {
    let buffer = Buffer::new(BufferConfig {
        heap_buffer_mode: true,
        ..Default::default()
    })
    .unwrap();
    buffer.append("t", 0i64, &record(&[("k", json!("v"))])).unwrap();
    buffer.close().unwrap();
    assert_eq!(buffer.allocated_size(), 0);
    assert_eq!(buffer.buffered_data_size(), 0);
}

mod property_tests {
    use super::*;
    use kiroku_buffer::FileBackup;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_filename_codec_round_trips_any_tag(tag in "\\PC{1,12}") {
            let dir = TempDir::new().unwrap();
            let backup = FileBackup::new(dir.path(), Some("prop")).unwrap();
            backup.save_buffer(&[tag.clone()], b"bytes").unwrap();

            let saved = backup.saved_files();
            prop_assert_eq!(saved.len(), 1);
            prop_assert_eq!(saved[0].params(), &[tag]);
        }

        #[test]
        fn test_saved_bytes_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let dir = TempDir::new().unwrap();
            let backup = FileBackup::new(dir.path(), None).unwrap();
            backup.save_buffer(&["t".to_string()], &payload).unwrap();

            let saved = backup.saved_files();
            prop_assert_eq!(saved.len(), 1);
            let mut read_back = Vec::new();
            saved[0].open(|_, bytes| {
                read_back.extend_from_slice(bytes);
                Ok(())
            }).unwrap();
            prop_assert_eq!(read_back, payload);
        }
    }
}
