//! Single-file page store: reads and writes page images at fixed offsets.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::info;

use crate::error::{Result, TenebraError};
use crate::page::{Page, DEFAULT_PAGE_SIZE, META_PAGE_FLAG, PAGE_HDR_LEN};
use crate::types::Pgid;

/// Pages 0 and 1 are laid out as meta pages when a file is created.
pub const RESERVED_META_PAGES: u64 = 2;

/// Minimal file-backed page access for the free-page manager and its
/// inspection tooling. Caching, mmap and write-ahead logging live in the
/// engine layers above.
pub struct PageStore {
    file: File,
    page_size: usize,
    file_len: u64,
}

impl PageStore {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_page_size(path, DEFAULT_PAGE_SIZE)
    }

    pub fn open_with_page_size(path: &Path, page_size: usize) -> Result<Self> {
        if page_size < PAGE_HDR_LEN {
            return Err(TenebraError::Invalid("page size smaller than header"));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let file_len = file.metadata()?.len();
        let mut store = Self {
            file,
            page_size,
            file_len,
        };

        if store.file_len == 0 {
            store.init_meta_pages()?;
            info!(path = %path.display(), page_size, "page store created");
        } else if store.file_len % page_size as u64 != 0 {
            return Err(TenebraError::Corruption("file length is not page aligned"));
        }

        Ok(store)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> u64 {
        self.file_len / self.page_size as u64
    }

    /// Reads a page and its overflow run as one image.
    pub fn read_page(&mut self, pgid: Pgid) -> Result<Page> {
        let offset = self.page_offset(pgid)?;
        if offset + self.page_size as u64 > self.file_len {
            return Err(TenebraError::Invalid("page beyond end of file"));
        }

        let mut buf = vec![0u8; self.page_size];
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut buf)?;

        let head = Page::from_bytes(buf)?;
        if head.id() != pgid {
            return Err(TenebraError::Corruption("page id does not match its slot"));
        }

        let overflow = u64::from(head.overflow());
        if overflow == 0 {
            return Ok(head);
        }
        let total = (overflow + 1) * self.page_size as u64;
        if offset + total > self.file_len {
            return Err(TenebraError::Corruption("overflow run beyond end of file"));
        }
        let mut buf = head.into_bytes();
        buf.resize(total as usize, 0);
        self.file.read_exact(&mut buf[self.page_size..])?;
        Page::from_bytes(buf)
    }

    /// Writes a page image at its slot. The image length must be a whole
    /// number of pages matching the header's overflow count.
    pub fn write_page(&mut self, page: &Page) -> Result<()> {
        let bytes = page.as_bytes();
        if bytes.len() % self.page_size != 0 {
            return Err(TenebraError::Invalid("page image is not page aligned"));
        }
        let units = (bytes.len() / self.page_size) as u64;
        if units != u64::from(page.overflow()) + 1 {
            return Err(TenebraError::Invalid("page image disagrees with overflow"));
        }

        let offset = self.page_offset(page.id())?;
        if offset > self.file_len {
            return Err(TenebraError::Invalid("write would leave a hole in the file"));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        self.file_len = self.file_len.max(offset + bytes.len() as u64);
        Ok(())
    }

    /// Appends `n` zeroed pages and returns the first new id. This is the
    /// engine's answer to an exhausted allocator.
    pub fn grow(&mut self, n: u64) -> Result<Pgid> {
        if n == 0 {
            return Err(TenebraError::Invalid("cannot grow by zero pages"));
        }
        let first = Pgid(self.page_count());
        let new_len = n
            .checked_mul(self.page_size as u64)
            .and_then(|bytes| self.file_len.checked_add(bytes))
            .ok_or(TenebraError::Invalid("file length overflow"))?;
        self.file.set_len(new_len)?;
        self.file_len = new_len;
        Ok(first)
    }

    /// Flushes written data to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn init_meta_pages(&mut self) -> Result<()> {
        for id in 0..RESERVED_META_PAGES {
            let mut page = Page::new(Pgid(id), self.page_size);
            page.set_flags(META_PAGE_FLAG);
            self.write_page(&page)?;
        }
        self.sync()
    }

    fn page_offset(&self, pgid: Pgid) -> Result<u64> {
        pgid.0
            .checked_mul(self.page_size as u64)
            .ok_or(TenebraError::Invalid("page offset overflow"))
    }
}
