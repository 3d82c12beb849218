// Hash-indexed LRU page cache (spec §4.B). One global `cache_mutex`
// guards the hash map and LRU order; each page additionally owns its own
// mutex for record mutation (spec §3, §5).
//
// Lock order: `cache_mutex` strictly precedes any page mutex. Disk I/O
// for a miss happens with `cache_mutex` released (spec §5's general rule
// that blocking I/O never happens under `cache_mutex`); the brief
// overlap spec §4.B describes between "load" and "install" is collapsed
// here into: pick victim under the lock, release, load+flush outside the
// lock, re-acquire to install — see DESIGN.md for the rationale.

use crate::denomination::Denomination;
use crate::error::Result;
use crate::store::disk::DiskStore;
use crate::store::page::Page;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

type Key = (Denomination, u32);

struct CacheInner {
    map: HashMap<Key, Arc<Page>>,
    /// Front = most recently used, back = eviction candidate.
    order: VecDeque<Key>,
}

impl CacheInner {
    fn touch(&mut self, key: Key) {
        if let Some(pos) = self.order.iter().position(|k| *k == key) {
            self.order.remove(pos);
        }
        self.order.push_front(key);
    }
}

pub struct PageCache {
    disk: Arc<DiskStore>,
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl PageCache {
    pub fn new(disk: Arc<DiskStore>, capacity: usize) -> Self {
        Self {
            disk,
            capacity,
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Fetch the page for `(den, page_no)`, loading from disk and
    /// evicting the LRU tail if necessary.
    pub fn get(&self, den: Denomination, page_no: u32) -> Result<Arc<Page>> {
        let key = (den, page_no);

        {
            let mut guard = self.inner.lock();
            if let Some(page) = guard.map.get(&key).cloned() {
                guard.touch(key);
                return Ok(page);
            }
        }

        // Miss: pick a victim (if at capacity) and release cache_mutex
        // before doing any disk I/O.
        let victim = {
            let mut guard = self.inner.lock();
            // Someone may have raced us to load this same page.
            if let Some(page) = guard.map.get(&key).cloned() {
                guard.touch(key);
                return Ok(page);
            }
            if guard.map.len() >= self.capacity {
                guard.order.pop_back().map(|victim_key| {
                    let victim_page = guard.map.remove(&victim_key).expect("order/map inconsistent");
                    (victim_key, victim_page)
                })
            } else {
                None
            }
        };

        if let Some((victim_key, victim_page)) = &victim {
            if victim_page.is_dirty() {
                let bytes = victim_page.lock().bytes.clone();
                self.disk.flush(victim_key.0, victim_key.1, &bytes)?;
            }
            debug!(den = %victim_key.0, page_no = victim_key.1, "evicted page from cache");
        }
        drop(victim);

        let bytes = self.disk.load(den, page_no)?;
        let loaded = Arc::new(Page::new(den, page_no, bytes));

        let mut guard = self.inner.lock();
        // Another thread may have installed this page while we were
        // loading; prefer the already-installed one to avoid divergence.
        let page = guard.map.entry(key).or_insert_with(|| loaded).clone();
        guard.touch(key);
        Ok(page)
    }

    /// Snapshot handles to every currently dirty page, for the background
    /// flusher (spec §4.E). Only briefly holds `cache_mutex`.
    pub fn snapshot_dirty(&self) -> Vec<Arc<Page>> {
        let guard = self.inner.lock();
        guard
            .map
            .values()
            .filter(|p| p.is_dirty())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::disk::DiskStore;

    fn setup(capacity: usize) -> (tempfile::TempDir, PageCache) {
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskStore::new(dir.path(), b"seed".to_vec()));
        disk.ensure_initialized_range(Denomination::new(0).unwrap(), 0..8)
            .unwrap();
        (dir, PageCache::new(disk, capacity))
    }

    #[test]
    fn get_returns_same_arc_on_hit() {
        let (_dir, cache) = setup(4);
        let den = Denomination::new(0).unwrap();
        let p1 = cache.get(den, 0).unwrap();
        let p2 = cache.get(den, 0).unwrap();
        assert!(Arc::ptr_eq(&p1, &p2));
    }

    #[test]
    fn capacity_is_respected() {
        let (_dir, cache) = setup(2);
        let den = Denomination::new(0).unwrap();
        for page_no in 0..5 {
            cache.get(den, page_no).unwrap();
            assert!(cache.len() <= 2);
        }
    }

    #[test]
    fn dirty_victim_is_flushed_before_eviction() {
        let (dir, cache) = setup(1);
        let den = Denomination::new(0).unwrap();
        let page0 = cache.get(den, 0).unwrap();
        page0.lock().set(
            0,
            crate::store::page::Record {
                an: [5u8; 16],
                mfs: 3,
            },
        );
        drop(page0);
        // Force eviction of page 0 by loading page 1.
        cache.get(den, 1).unwrap();
        let disk = DiskStore::new(dir.path(), b"seed".to_vec());
        let bytes = disk.load(den, 0).unwrap();
        assert_eq!(bytes[16], 3);
    }
}
