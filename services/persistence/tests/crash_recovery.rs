//! Crash scenarios for the journal store: torn writes, stale snapshots,
//! repeated restarts.

use persistence::journal::JournalWriter;
use persistence::recovery::recover;
use persistence::{CanvasStore, JournalStore, StoreConfig};
use std::fs::OpenOptions;
use std::io::Write;
use tempfile::TempDir;
use types::canvas::CanvasBounds;
use types::pixel::{PixelRequest, PixelUpdate};

fn pixel(x: i64, y: i64, color: &str, user: &str, ts: i64) -> PixelUpdate {
    PixelRequest::new(x, y, color, user)
        .validate(&CanvasBounds::default())
        .unwrap()
        .stamp(ts)
}

fn append_garbage(dir: &std::path::Path, bytes: &[u8]) {
    let mut file = OpenOptions::new()
        .append(true)
        .open(JournalWriter::journal_path(dir))
        .unwrap();
    file.write_all(bytes).unwrap();
}

#[test]
fn torn_tail_is_cut_and_writes_continue() {
    let tmp = TempDir::new().unwrap();
    {
        let store = JournalStore::open(StoreConfig::new(tmp.path())).unwrap();
        store.save(&pixel(0, 0, "#FF0000", "alice", 1)).unwrap();
        store.save(&pixel(0, 1, "#00FF00", "bob", 2)).unwrap();
    }
    append_garbage(tmp.path(), &[0x30, 0x00, 0x00, 0x00, 0xde, 0xad]);

    let store = JournalStore::open(StoreConfig::new(tmp.path())).unwrap();
    assert_eq!(store.pixel_count().unwrap(), 2);

    store.save(&pixel(0, 2, "#0000FF", "carol", 3)).unwrap();
    drop(store);

    let recovered = recover(tmp.path()).unwrap();
    assert!(recovered.corruption.is_empty());
    assert_eq!(recovered.state.len(), 3);
    assert_eq!(recovered.last_sequence, 3);
}

#[test]
fn many_restarts_preserve_last_write_wins() {
    let tmp = TempDir::new().unwrap();
    let mut ts = 0;
    for round in 0..5 {
        let store = JournalStore::open(StoreConfig::new(tmp.path())).unwrap();
        for x in 0..10 {
            ts += 1;
            let color = format!("#{:06X}", round * 16 + x);
            store.save(&pixel(x, 0, &color, "dave", ts)).unwrap();
        }
        if round % 2 == 0 {
            store.flush().unwrap();
        }
    }

    let store = JournalStore::open(StoreConfig::new(tmp.path())).unwrap();
    let all = store.load_all().unwrap();
    assert_eq!(all.len(), 10);
    for update in &all {
        let expected = format!("#{:06X}", 4 * 16 + update.x as i64);
        assert_eq!(update.color.as_str(), expected);
    }
    assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[test]
fn uncompressed_snapshots_round_trip() {
    let tmp = TempDir::new().unwrap();
    let mut config = StoreConfig::new(tmp.path());
    config.compress_snapshots = false;

    let hash = {
        let store = JournalStore::open(config.clone()).unwrap();
        store.save(&pixel(999, 999, "#abcdef", "erin", 7)).unwrap();
        store.flush().unwrap();
        store.state_hash().unwrap()
    };

    let store = JournalStore::open(config).unwrap();
    assert_eq!(store.state_hash().unwrap(), hash);
    assert_eq!(store.load_all().unwrap()[0].color.as_str(), "#ABCDEF");
}
