//! Integration tests for the page store: write/read round trips, field
//! reads, checksum enforcement, GC, and concurrency.

use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stratum_common::file_provider::{FileProvider, LocalFileProvider, XorFileProvider};
use stratum_common::CancelToken;
use stratum_pagestore::{PageStore, PageStoreConfig, WriteBatch};
use stratum_result::Error;
use tempfile::TempDir;

fn open_store(dir: &TempDir, config: PageStoreConfig) -> PageStore {
    // RUST_LOG=trace surfaces the store's allocation and GC decisions.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    PageStore::open(Arc::new(LocalFileProvider), dir.path(), config).unwrap()
}

fn pattern(byte: u8, len: usize) -> Vec<u8> {
    vec![byte; len]
}

#[test]
fn write_read_gc_round_trip() {
    let dir = TempDir::new().unwrap();
    let config = PageStoreConfig {
        block_alignment_bytes: 4096,
        heavy_gc_valid_rate: 0.99,
        ..Default::default()
    };
    let store = open_store(&dir, config);
    let cancel = CancelToken::new();

    let page1 = pattern(b'a', 100 * 1024);
    let page2 = pattern(b'b', 1024 * 1024);
    let mut batch = WriteBatch::new();
    batch.put(1, page1.clone());
    batch.put(2, page2.clone());
    store.write(batch, &cancel).unwrap();

    // Both pages packed into blob 1 at consecutive offsets.
    let snap = store.snapshot();
    let entry1 = store.directory().get(1, &snap).unwrap();
    let entry2 = store.directory().get(2, &snap).unwrap();
    assert_eq!(entry1.blob_id, 1);
    assert_eq!(entry1.offset, 0);
    assert_eq!(entry2.blob_id, 1);
    assert_eq!(entry2.offset, 100 * 1024);
    drop(snap);

    // Delete page 1; GC must rewrite the blob and preserve page 2's bytes.
    let mut batch = WriteBatch::new();
    batch.del(1);
    store.write(batch, &cancel).unwrap();

    let migrated = store.gc(&cancel).unwrap();
    assert_eq!(migrated, 1);

    let snap = store.snapshot();
    let relocated = store.directory().get(2, &snap).unwrap();
    assert_ne!(relocated.blob_id, 1);

    let pages = store.read(&[2], &snap, &cancel).unwrap();
    assert_eq!(pages[&2].data.as_ref(), page2.as_slice());
    assert!(store.directory().get(1, &snap).is_none());
}

#[test]
fn field_read_with_corruption() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, PageStoreConfig::default());
    let cancel = CancelToken::new();

    let bytes = b"0123456789ABCDEFGHIJabcdefghij".to_vec();
    let mut batch = WriteBatch::new();
    batch.put_with_fields(3, bytes, vec![0, 10, 20]);
    store.write(batch, &cancel).unwrap();

    let snap = store.snapshot();
    let pages = store
        .read_fields(&[(3, vec![1])], &snap, &cancel)
        .unwrap();
    assert_eq!(pages[&3].field_data(1).unwrap().as_ref(), b"ABCDEFGHIJ");

    // Flip one byte inside field 1 on disk.
    let blob_path = dir.path().join("blob_1");
    let mut raw = std::fs::read(&blob_path).unwrap();
    raw[15] ^= 0x40;
    std::fs::write(&blob_path, raw).unwrap();

    let err = store
        .read_fields(&[(3, vec![1])], &snap, &cancel)
        .unwrap_err();
    assert!(matches!(err, Error::ChecksumMismatch(_)), "got {err}");

    // The untouched field still verifies.
    let pages = store
        .read_fields(&[(3, vec![0])], &snap, &cancel)
        .unwrap();
    assert_eq!(pages[&3].field_data(0).unwrap().as_ref(), b"0123456789");

    // A whole-page read covers the corrupted span and must fail too.
    let err = store.read(&[3], &snap, &cancel).unwrap_err();
    assert!(matches!(err, Error::ChecksumMismatch(_)));
}

#[test]
fn multi_field_read_layout() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, PageStoreConfig::default());
    let cancel = CancelToken::new();

    let mut batch = WriteBatch::new();
    batch.put_with_fields(7, b"aaaabbbbbbcc".to_vec(), vec![0, 4, 10]);
    store.write(batch, &cancel).unwrap();

    let snap = store.snapshot();
    let pages = store
        .read_fields(&[(7, vec![2, 0])], &snap, &cancel)
        .unwrap();
    let page = &pages[&7];
    // Fields come back densely packed in ascending field order.
    assert_eq!(page.data.as_ref(), b"aaaacc");
    assert_eq!(page.field_data(0).unwrap().as_ref(), b"aaaa");
    assert_eq!(page.field_data(2).unwrap().as_ref(), b"cc");
    assert!(page.field_data(1).is_none());
}

#[test]
fn refs_and_external_pages() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, PageStoreConfig::default());
    let cancel = CancelToken::new();

    let mut batch = WriteBatch::new();
    batch.put(1, b"payload".to_vec());
    batch.put_external(50);
    store.write(batch, &cancel).unwrap();

    let mut batch = WriteBatch::new();
    batch.reference(2, 1);
    store.write(batch, &cancel).unwrap();

    let snap = store.snapshot();
    let pages = store.read(&[2, 50], &snap, &cancel).unwrap();
    assert_eq!(pages[&2].data.as_ref(), b"payload");
    assert!(pages[&50].data.is_empty());

    // Dangling ref is rejected as a bad request.
    let mut batch = WriteBatch::new();
    batch.reference(9, 999);
    assert!(matches!(
        store.write(batch, &cancel),
        Err(Error::BadRequest(_))
    ));
}

#[test]
fn large_batch_splits_across_allocations() {
    let dir = TempDir::new().unwrap();
    let config = PageStoreConfig {
        file_limit_size: 64 * 1024,
        ..Default::default()
    };
    let store = open_store(&dir, config);
    let cancel = CancelToken::new();

    // Batch larger than one blob file: every put allocates independently.
    let mut batch = WriteBatch::new();
    let payloads: Vec<Vec<u8>> = (0u8..5)
        .map(|i| pattern(b'A' + i, 40 * 1024))
        .collect();
    for (i, payload) in payloads.iter().enumerate() {
        batch.put(i as u64 + 1, payload.clone());
    }
    store.write(batch, &cancel).unwrap();

    let snap = store.snapshot();
    let ids: Vec<u64> = (1..=5).collect();
    let pages = store.read(&ids, &snap, &cancel).unwrap();
    for (i, payload) in payloads.iter().enumerate() {
        assert_eq!(pages[&(i as u64 + 1)].data.as_ref(), payload.as_slice());
    }
}

#[test]
fn gc_preserves_bytes_across_random_workload() {
    let dir = TempDir::new().unwrap();
    let config = PageStoreConfig {
        file_limit_size: 256 * 1024,
        heavy_gc_valid_rate: 0.95,
        ..Default::default()
    };
    let store = open_store(&dir, config);
    let cancel = CancelToken::new();
    let mut rng = StdRng::seed_from_u64(0x5717_A7);

    let mut live: std::collections::HashMap<u64, Vec<u8>> = Default::default();
    for page_id in 1..=60u64 {
        let len = rng.gen_range(1..16 * 1024);
        let mut payload = vec![0u8; len];
        rng.fill(payload.as_mut_slice());
        let mut batch = WriteBatch::new();
        batch.put(page_id, payload.clone());
        store.write(batch, &cancel).unwrap();
        live.insert(page_id, payload);
    }
    // Delete most pages to force heavy fragmentation.
    for page_id in 1..=45u64 {
        let mut batch = WriteBatch::new();
        batch.del(page_id);
        store.write(batch, &cancel).unwrap();
        live.remove(&page_id);
    }

    store.gc(&cancel).unwrap();

    let snap = store.snapshot();
    let ids: Vec<u64> = live.keys().copied().collect();
    let pages = store.read(&ids, &snap, &cancel).unwrap();
    for (page_id, payload) in &live {
        assert_eq!(pages[page_id].data.as_ref(), payload.as_slice(), "page {page_id}");
    }
}

#[test]
fn concurrent_writers_and_readers() {
    let dir = TempDir::new().unwrap();
    let config = PageStoreConfig {
        file_limit_size: 128 * 1024,
        ..Default::default()
    };
    let store = Arc::new(open_store(&dir, config));

    let mut handles = Vec::new();
    for t in 0..4u64 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            let cancel = CancelToken::new();
            for i in 0..50u64 {
                let page_id = t * 1000 + i;
                let payload = vec![(page_id % 251) as u8; 1024 + (i as usize % 512)];
                let mut batch = WriteBatch::new();
                batch.put(page_id, payload);
                store.write(batch, &cancel).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let cancel = CancelToken::new();
    let snap = store.snapshot();
    for t in 0..4u64 {
        for i in 0..50u64 {
            let page_id = t * 1000 + i;
            let pages = store.read(&[page_id], &snap, &cancel).unwrap();
            let page = &pages[&page_id];
            assert_eq!(page.data.len(), 1024 + (i as usize % 512));
            assert!(page.data.iter().all(|&b| b == (page_id % 251) as u8));
        }
    }
}

#[test]
fn zero_size_put_in_data_batch_is_logical_error() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, PageStoreConfig::default());
    let cancel = CancelToken::new();

    // A batch with no payload bytes at all but containing a PUT.
    let mut batch = WriteBatch::new();
    batch.put(1, Vec::new());
    assert!(matches!(
        store.write(batch, &cancel),
        Err(Error::LogicalError(_))
    ));
}

#[test]
fn restore_entries_rebuilds_space_accounting() {
    let dir = TempDir::new().unwrap();
    let cancel = CancelToken::new();
    let provider: Arc<dyn FileProvider> = Arc::new(LocalFileProvider);

    let payload = pattern(b'x', 8 * 1024);
    let (entries, expected) = {
        let store =
            PageStore::open(Arc::clone(&provider), dir.path(), PageStoreConfig::default()).unwrap();
        let mut batch = WriteBatch::new();
        batch.put(11, payload.clone());
        batch.put(12, pattern(b'y', 4 * 1024));
        store.write(batch, &cancel).unwrap();
        let snap = store.snapshot();
        let entries: Vec<_> = [11u64, 12]
            .iter()
            .map(|&id| (id, store.directory().get(id, &snap).unwrap()))
            .collect();
        (entries, payload)
    };

    // A fresh store over the same directory, primed from persisted entries.
    let store =
        PageStore::open(Arc::clone(&provider), dir.path(), PageStoreConfig::default()).unwrap();
    store.blob_store().restore_entries(&entries).unwrap();
    let pages = store.blob_store().read(entries.clone(), &cancel).unwrap();
    assert_eq!(pages[&11].data.as_ref(), expected.as_slice());

    // New writes must not land on the restored spans.
    let mut batch = WriteBatch::new();
    batch.put(13, pattern(b'z', 2 * 1024));
    store.write(batch, &cancel).unwrap();
    let snap = store.snapshot();
    let entry13 = store.directory().get(13, &snap).unwrap();
    for (_, old) in &entries {
        let no_overlap = entry13.offset >= old.offset + old.total_size()
            || old.offset >= entry13.offset + entry13.total_size()
            || entry13.blob_id != old.blob_id;
        assert!(no_overlap);
    }
}

#[test]
fn encrypted_provider_is_transparent() {
    let dir = TempDir::new().unwrap();
    let provider: Arc<dyn FileProvider> = Arc::new(XorFileProvider::new(0xFEED));
    let store = PageStore::open(provider, dir.path(), PageStoreConfig::default()).unwrap();
    let cancel = CancelToken::new();

    let payload = pattern(b'q', 64 * 1024);
    let mut batch = WriteBatch::new();
    batch.put_with_fields(1, payload.clone(), vec![0, 1000, 50_000]);
    store.write(batch, &cancel).unwrap();

    let snap = store.snapshot();
    let pages = store.read(&[1], &snap, &cancel).unwrap();
    assert_eq!(pages[&1].data.as_ref(), payload.as_slice());

    let fields = store
        .read_fields(&[(1, vec![1])], &snap, &cancel)
        .unwrap();
    assert_eq!(fields[&1].field_data(1).unwrap().len(), 49_000);

    // Ciphertext on disk must differ from the plaintext.
    let raw = std::fs::read(dir.path().join("blob_1")).unwrap();
    assert_ne!(&raw[..1000], &payload[..1000]);
}
