// Page store disk layout and file I/O (spec §4.A, §6). All operations here
// are synchronous and blocking; callers run them via `spawn_blocking` so
// the tokio runtime never stalls on disk I/O.

use crate::crypto::legacy_hash;
use crate::denomination::{Denomination, PAGES_PER_DENOMINATION, RECORDS_PER_PAGE};
use crate::error::{NodeError, Result};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, warn};

pub const RECORD_LEN: usize = 17;
pub const PAGE_BYTES: usize = RECORD_LEN * RECORDS_PER_PAGE as usize;

const FLUSH_RETRIES: u32 = 3;
const FLUSH_BACKOFF: Duration = Duration::from_millis(100);

/// Root-relative disk layout: `Data/<den>/<hi_byte(page_no)>/<page_no>.bin`.
pub struct DiskStore {
    root: PathBuf,
    seed: Vec<u8>,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>, seed: impl Into<Vec<u8>>) -> Self {
        Self {
            root: root.into(),
            seed: seed.into(),
        }
    }

    pub fn page_path(&self, den: Denomination, page_no: u32) -> PathBuf {
        let hi = (page_no >> 8) as u8;
        self.root
            .join(den.value().to_string())
            .join(hi.to_string())
            .join(format!("{page_no}.bin"))
    }

    /// Default deterministic content for a freshly created page: for each
    /// slot, AN = legacy-hash(seed ‖ den ‖ page_no ‖ slot), MFS = 0.
    fn default_page_bytes(&self, den: Denomination, page_no: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; PAGE_BYTES];
        for slot in 0..RECORDS_PER_PAGE {
            let an = legacy_hash(&[
                &self.seed,
                &den.value().to_le_bytes(),
                &page_no.to_le_bytes(),
                &slot.to_le_bytes(),
            ]);
            let off = slot as usize * RECORD_LEN;
            bytes[off..off + 16].copy_from_slice(&an);
            bytes[off + 16] = 0;
        }
        bytes
    }

    /// One-time startup scan: for every denomination and page number,
    /// create the file with deterministic content if missing. Existing
    /// files are left untouched.
    pub fn ensure_initialized(&self) -> Result<()> {
        for den in Denomination::all() {
            self.ensure_initialized_range(den, 0..PAGES_PER_DENOMINATION)?;
        }
        Ok(())
    }

    /// Same as [`ensure_initialized`] but limited to one denomination and
    /// page range; used by tests and by targeted repair tooling so they
    /// don't have to touch all 15 * `PAGES_PER_DENOMINATION` files.
    pub fn ensure_initialized_range(
        &self,
        den: Denomination,
        page_nos: std::ops::Range<u32>,
    ) -> Result<()> {
        for page_no in page_nos {
            let path = self.page_path(den, page_no);
            if path.exists() {
                continue;
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let bytes = self.default_page_bytes(den, page_no);
            write_atomic(&path, &bytes)?;
        }
        Ok(())
    }

    /// Read the whole page file in one read.
    pub fn load(&self, den: Denomination, page_no: u32) -> Result<Vec<u8>> {
        let path = self.page_path(den, page_no);
        let mut file = fs::File::open(&path)?;
        let mut bytes = Vec::with_capacity(PAGE_BYTES);
        file.read_to_end(&mut bytes)?;
        if bytes.len() != PAGE_BYTES {
            return Err(NodeError::Internal(format!(
                "corrupt page file {}: {} bytes, expected {}",
                path.display(),
                bytes.len(),
                PAGE_BYTES
            )));
        }
        Ok(bytes)
    }

    /// Write the whole page file in one write. Retries transient I/O
    /// failures up to three times with a ~100ms back-off; a persistent
    /// failure is a fatal-class diagnostic, and the page remains dirty
    /// so a later flush can retry it (spec §4.A).
    pub fn flush(&self, den: Denomination, page_no: u32, bytes: &[u8]) -> Result<()> {
        debug_assert_eq!(bytes.len(), PAGE_BYTES);
        let path = self.page_path(den, page_no);
        let mut last_err = None;
        for attempt in 1..=FLUSH_RETRIES {
            match write_atomic(&path, bytes) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(den = %den, page_no, attempt, error = %e, "page flush failed, retrying");
                    last_err = Some(e);
                    std::thread::sleep(FLUSH_BACKOFF);
                }
            }
        }
        let err = last_err.unwrap();
        error!(den = %den, page_no, error = %err, "page flush exhausted retries; page remains dirty");
        Err(err)
    }

    /// Read every page file for a denomination directly, bypassing the
    /// cache (used by `get_all_sns`, spec §4.H).
    pub fn load_all(&self, den: Denomination) -> Result<Vec<Vec<u8>>> {
        (0..PAGES_PER_DENOMINATION)
            .map(|page_no| self.load(den, page_no))
            .collect()
    }
}

/// Write is atomic at the file level: write to a temp file in the same
/// directory, then rename over the target. A reader never observes a
/// partially written page.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("bin.tmp");
    {
        let mut tmp = fs::File::create(&tmp_path)?;
        tmp.write_all(bytes)?;
        tmp.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_initialized_creates_deterministic_pages() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path(), b"seed".to_vec());
        let den = Denomination::new(0).unwrap();
        let bytes = store.default_page_bytes(den, 0);
        assert_eq!(bytes.len(), PAGE_BYTES);
        // all-free
        for slot in 0..RECORDS_PER_PAGE {
            assert_eq!(bytes[slot as usize * RECORD_LEN + 16], 0);
        }
    }

    #[test]
    fn load_after_flush_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path(), b"seed".to_vec());
        let den = Denomination::new(-3).unwrap();
        let mut bytes = vec![0u8; PAGE_BYTES];
        bytes[16] = 7;
        store.flush(den, 2, &bytes).unwrap();
        let loaded = store.load(den, 2).unwrap();
        assert_eq!(loaded, bytes);
    }

    #[test]
    fn existing_files_are_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::new(dir.path(), b"seed".to_vec());
        let den = Denomination::new(1).unwrap();
        let mut custom = vec![0xAB; PAGE_BYTES];
        custom[16] = 9;
        let path = store.page_path(den, 5);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        write_atomic(&path, &custom).unwrap();
        store.ensure_initialized().unwrap();
        let loaded = store.load(den, 5).unwrap();
        assert_eq!(loaded, custom);
    }
}
