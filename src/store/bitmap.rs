// Per-denomination free-slot bitmap (spec §4.C). One bit per possible
// coin; bit 0 = free, bit 1 = owned. Each denomination's bits live behind
// their own mutex, distinct from `cache_mutex` and any page mutex.

use crate::denomination::{Denomination, Sn, COUNT, PAGES_PER_DENOMINATION, RECORDS_PER_PAGE};
use crate::error::Result;
use crate::store::cache::PageCache;
use parking_lot::Mutex;

struct DenBitmap {
    bits: Vec<u64>,
    len: u32,
}

impl DenBitmap {
    fn new(len: u32) -> Self {
        Self {
            bits: vec![0u64; (len as usize).div_ceil(64)],
            len,
        }
    }

    fn set(&mut self, sn: u32, owned: bool) {
        let word = (sn / 64) as usize;
        let bit = sn % 64;
        if owned {
            self.bits[word] |= 1 << bit;
        } else {
            self.bits[word] &= !(1 << bit);
        }
    }

    fn get(&self, sn: u32) -> bool {
        let word = (sn / 64) as usize;
        let bit = sn % 64;
        (self.bits[word] >> bit) & 1 == 1
    }

    fn available(&self, max_n: usize) -> Vec<u32> {
        let mut out = Vec::with_capacity(max_n.min(self.len as usize));
        for sn in 0..self.len {
            if out.len() >= max_n {
                break;
            }
            if !self.get(sn) {
                out.push(sn);
            }
        }
        out
    }
}

pub struct FreeSlotBitmap {
    per_den: Vec<Mutex<DenBitmap>>,
}

impl FreeSlotBitmap {
    pub fn new() -> Self {
        let total_sns = PAGES_PER_DENOMINATION * RECORDS_PER_PAGE;
        Self {
            per_den: (0..COUNT).map(|_| Mutex::new(DenBitmap::new(total_sns))).collect(),
        }
    }

    fn den_map(&self, den: Denomination) -> &Mutex<DenBitmap> {
        &self.per_den[den.index()]
    }

    pub fn set_owned(&self, den: Denomination, sn: Sn) {
        self.den_map(den).lock().set(sn.0, true);
    }

    pub fn set_free(&self, den: Denomination, sn: Sn) {
        self.den_map(den).lock().set(sn.0, false);
    }

    pub fn is_owned(&self, den: Denomination, sn: Sn) -> bool {
        self.den_map(den).lock().get(sn.0)
    }

    /// Up to `max_n` serial numbers whose bit is free, in ascending order.
    pub fn available_sns(&self, den: Denomination, max_n: usize) -> Vec<Sn> {
        self.den_map(den)
            .lock()
            .available(max_n)
            .into_iter()
            .map(Sn)
            .collect()
    }

    /// Sum of owned slots for a denomination (used by `audit`, spec §4.H).
    pub fn owned_count(&self, den: Denomination) -> u64 {
        self.den_map(den)
            .lock()
            .bits
            .iter()
            .map(|w| w.count_ones() as u64)
            .sum()
    }

    /// One-time startup scan through the cache, setting every bit from the
    /// on-disk MFS values (spec §4.C).
    pub fn scan_and_init(&self, cache: &PageCache) -> Result<()> {
        self.scan_and_init_range(cache, 0..PAGES_PER_DENOMINATION)
    }

    /// Same as [`scan_and_init`] but limited to `page_nos` for every
    /// denomination; pages outside the range keep their default "free"
    /// bit, which matches the seeded-unowned content `ensure_initialized`
    /// would have written there anyway. Used by tests and targeted repair
    /// tooling so they don't have to scan all `PAGES_PER_DENOMINATION`
    /// pages.
    pub fn scan_and_init_range(&self, cache: &PageCache, page_nos: std::ops::Range<u32>) -> Result<()> {
        for den in Denomination::all() {
            for page_no in page_nos.clone() {
                let page = cache.get(den, page_no)?;
                let guard = page.lock();
                let mut bitmap = self.den_map(den).lock();
                for slot in 0..RECORDS_PER_PAGE {
                    let sn = Sn::from_page_slot(page_no, slot);
                    bitmap.set(sn.0, guard.get(slot).is_owned());
                }
            }
        }
        Ok(())
    }
}

impl Default for FreeSlotBitmap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_bitmap_is_all_free() {
        let bm = FreeSlotBitmap::new();
        let den = Denomination::new(0).unwrap();
        assert!(!bm.is_owned(den, Sn(0)));
        assert_eq!(bm.available_sns(den, 3), vec![Sn(0), Sn(1), Sn(2)]);
    }

    #[test]
    fn set_owned_then_free_round_trips() {
        let bm = FreeSlotBitmap::new();
        let den = Denomination::new(-2).unwrap();
        bm.set_owned(den, Sn(42));
        assert!(bm.is_owned(den, Sn(42)));
        assert_eq!(bm.owned_count(den), 1);
        bm.set_free(den, Sn(42));
        assert!(!bm.is_owned(den, Sn(42)));
        assert_eq!(bm.owned_count(den), 0);
    }

    #[test]
    fn available_sns_excludes_owned() {
        let bm = FreeSlotBitmap::new();
        let den = Denomination::new(3).unwrap();
        bm.set_owned(den, Sn(0));
        bm.set_owned(den, Sn(1));
        let avail = bm.available_sns(den, 2);
        assert_eq!(avail, vec![Sn(2), Sn(3)]);
    }
}
