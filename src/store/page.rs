// Page and record types (spec §3, §4.D). A page owns its record bytes,
// dirty flag, reservation, and its own mutex; LRU links are the cache's
// problem, not the page's (spec §9).

use crate::denomination::{An, Denomination};
use crate::store::disk::{PAGE_BYTES, RECORD_LEN};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// One 17-byte coin record: 16-byte AN, 1-byte MFS. `MFS == 0` means free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub an: An,
    pub mfs: u8,
}

impl Record {
    pub fn is_owned(&self) -> bool {
        self.mfs != 0
    }

    fn read(bytes: &[u8], slot: u32) -> Self {
        let off = slot as usize * RECORD_LEN;
        let mut an = [0u8; 16];
        an.copy_from_slice(&bytes[off..off + 16]);
        Record {
            an,
            mfs: bytes[off + 16],
        }
    }

    fn write(self, bytes: &mut [u8], slot: u32) {
        let off = slot as usize * RECORD_LEN;
        bytes[off..off + 16].copy_from_slice(&self.an);
        bytes[off + 16] = self.mfs;
    }
}

/// Advisory, session-scoped page reservation (spec §4.D). A page is
/// reserved while `reserved_at` is set and not yet past `ttl`; expiry
/// clears itself on the next check rather than needing an external sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct Reservation {
    session_id: Option<u32>,
    reserved_at: Option<Instant>,
}

impl Reservation {
    pub fn reserve(&mut self, session_id: u32) {
        self.session_id = Some(session_id);
        self.reserved_at = Some(Instant::now());
    }

    pub fn clear(&mut self) {
        self.session_id = None;
        self.reserved_at = None;
    }

    /// True iff live (not expired); auto-clears on expiry.
    pub fn is_reserved(&mut self, ttl: Duration) -> bool {
        match self.reserved_at {
            Some(at) if at.elapsed() < ttl => true,
            Some(_) => {
                self.clear();
                false
            }
            None => false,
        }
    }

    /// True iff reserved by exactly this session (auto-clears on expiry
    /// the same way `is_reserved` does).
    pub fn is_reserved_by(&mut self, session_id: u32, ttl: Duration) -> bool {
        self.is_reserved(ttl) && self.session_id == Some(session_id)
    }
}

pub struct PageInner {
    pub bytes: Vec<u8>,
    pub dirty: bool,
    pub reservation: Reservation,
}

impl PageInner {
    pub fn get(&self, slot: u32) -> Record {
        Record::read(&self.bytes, slot)
    }

    pub fn set(&mut self, slot: u32, record: Record) {
        record.write(&mut self.bytes, slot);
        self.dirty = true;
    }
}

/// A cached page: owns its bytes and mutex; the cache holds a non-owning
/// `Arc` to this and manages LRU order externally under `cache_mutex`
/// (spec §3, §9).
pub struct Page {
    pub den: Denomination,
    pub page_no: u32,
    inner: Mutex<PageInner>,
}

impl Page {
    pub fn new(den: Denomination, page_no: u32, bytes: Vec<u8>) -> Self {
        debug_assert_eq!(bytes.len(), PAGE_BYTES);
        Self {
            den,
            page_no,
            inner: Mutex::new(PageInner {
                bytes,
                dirty: false,
                reservation: Reservation::default(),
            }),
        }
    }

    pub fn lock(&self) -> parking_lot::MutexGuard<'_, PageInner> {
        self.inner.lock()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn den() -> Denomination {
        Denomination::new(0).unwrap()
    }

    #[test]
    fn set_then_get_round_trips() {
        let page = Page::new(den(), 0, vec![0u8; PAGE_BYTES]);
        {
            let mut guard = page.lock();
            guard.set(
                3,
                Record {
                    an: [9u8; 16],
                    mfs: 5,
                },
            );
        }
        let guard = page.lock();
        let rec = guard.get(3);
        assert_eq!(rec.an, [9u8; 16]);
        assert_eq!(rec.mfs, 5);
        assert!(rec.is_owned());
    }

    #[test]
    fn set_marks_dirty() {
        let page = Page::new(den(), 0, vec![0u8; PAGE_BYTES]);
        assert!(!page.is_dirty());
        page.lock().set(
            0,
            Record {
                an: [1u8; 16],
                mfs: 1,
            },
        );
        assert!(page.is_dirty());
    }

    #[test]
    fn reservation_expires() {
        let mut r = Reservation::default();
        r.reserve(42);
        assert!(r.is_reserved_by(42, Duration::from_secs(10)));
        // with a zero-length TTL the reservation is immediately expired
        let mut r2 = Reservation::default();
        r2.reserve(7);
        std::thread::sleep(Duration::from_millis(5));
        assert!(!r2.is_reserved(Duration::from_millis(1)));
        assert!(!r2.is_reserved(Duration::from_millis(1))); // stays cleared
    }
}
