// End-to-end coverage of spec scenario 5: a background flush that fails
// repeatedly must not corrupt in-memory state, and a later successful
// flush must bring disk back in sync with what the cache already reports.

mod support;

use raida_node::denomination::{Denomination, Sn};
use raida_node::store::{CoinStore, Record};

fn den5() -> Denomination {
    Denomination::new(5).unwrap()
}

#[test]
fn bitmap_and_cache_survive_repeated_flush_failures() {
    let config = support::scratch_config();
    let store = CoinStore::open_range(config.root.clone(), &config.admin_key, config.max_cached_pages, 0..2).unwrap();
    let sn = Sn(0);
    let new_an = [0x42u8; 16];

    store
        .write_record(
            den5(),
            sn,
            Record {
                an: new_an,
                mfs: 3,
            },
        )
        .unwrap();
    assert!(store.bitmap.is_owned(den5(), sn));

    // Block the atomic write's rename target: occupy the temp-file path
    // with a directory, so `File::create` on it fails with EISDIR
    // regardless of the process's privilege level.
    let page_path = store.disk.page_path(den5(), sn.page_no());
    let tmp_path = page_path.with_extension("bin.tmp");
    std::fs::create_dir(&tmp_path).unwrap();

    for _ in 0..3 {
        let bytes = vec![0u8; raida_node::store::disk::PAGE_BYTES];
        assert!(store.disk.flush(den5(), sn.page_no(), &bytes).is_err());
    }

    // In-memory state is untouched by the failed flushes.
    assert!(store.bitmap.is_owned(den5(), sn));
    assert_eq!(store.read_record(den5(), sn).unwrap().an, new_an);

    // Clear the obstruction and retry: flush now succeeds and disk catches
    // up with what the cache already held.
    std::fs::remove_dir(&tmp_path).unwrap();
    let page = store.cache.get(den5(), sn.page_no()).unwrap();
    let bytes = page.lock().bytes.clone();
    store.disk.flush(den5(), sn.page_no(), &bytes).unwrap();

    let loaded = store.disk.load(den5(), sn.page_no()).unwrap();
    assert_eq!(loaded, bytes);
    assert_eq!(&loaded[0..16], &new_an[..]);
}
