// Background flusher (spec §4.E): periodically snapshot dirty pages under
// `cache_mutex`, then flush each outside the lock. Idempotent by
// construction, so a page re-dirtied between snapshot and flush is
// harmless.

use crate::store::cache::PageCache;
use crate::store::disk::DiskStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct Flusher {
    cache: Arc<PageCache>,
    disk: Arc<DiskStore>,
    interval: Duration,
    finish: Arc<AtomicBool>,
}

impl Flusher {
    pub fn new(cache: Arc<PageCache>, disk: Arc<DiskStore>, interval: Duration) -> Self {
        Self {
            cache,
            disk,
            interval,
            finish: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn finish_flag(&self) -> Arc<AtomicBool> {
        self.finish.clone()
    }

    /// Flush every currently dirty page once. Exposed separately from
    /// `run` so shutdown can call it one last time without waiting out a
    /// full sleep interval.
    pub fn flush_once(&self) {
        let dirty = self.cache.snapshot_dirty();
        if dirty.is_empty() {
            return;
        }
        debug!(count = dirty.len(), "flushing dirty pages");
        for page in dirty {
            let bytes = page.lock().bytes.clone();
            if let Err(e) = self.disk.flush(page.den, page.page_no, &bytes) {
                warn!(den = %page.den, page_no = page.page_no, error = %e, "background flush failed");
            } else {
                page.lock().dirty = false;
            }
        }
    }

    /// Run until `finish_flag()` is set, sleeping `interval` between
    /// passes. Drains remaining dirty pages before returning (spec §4.E).
    pub async fn run(self: Arc<Self>) {
        while !self.finish.load(Ordering::Relaxed) {
            tokio::time::sleep(self.interval).await;
            self.flush_once();
        }
        self.flush_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denomination::Denomination;
    use crate::store::page::Record;

    #[tokio::test]
    async fn flush_once_clears_dirty_pages() {
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(DiskStore::new(dir.path(), b"seed".to_vec()));
        let den = Denomination::new(0).unwrap();
        disk.ensure_initialized_range(den, 0..2).unwrap();
        let cache = Arc::new(PageCache::new(disk.clone(), 8));
        let page = cache.get(den, 0).unwrap();
        page.lock().set(
            0,
            Record {
                an: [3u8; 16],
                mfs: 1,
            },
        );
        assert!(page.is_dirty());

        let flusher = Flusher::new(cache, disk.clone(), Duration::from_secs(60));
        flusher.flush_once();
        assert!(!page.is_dirty());

        let bytes = disk.load(den, 0).unwrap();
        assert_eq!(bytes[16], 1);
    }
}
