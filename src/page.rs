//! On-disk page images and the shared page header layout.

use crate::error::{Result, TenebraError};
use crate::types::Pgid;

pub const PAGE_HDR_LEN: usize = 16;
pub const DEFAULT_PAGE_SIZE: usize = 4096;

pub const BRANCH_PAGE_FLAG: u16 = 0x01;
pub const LEAF_PAGE_FLAG: u16 = 0x02;
pub const META_PAGE_FLAG: u16 = 0x04;
pub const FREELIST_PAGE_FLAG: u16 = 0x10;

pub mod header {
    //! Byte offsets for fixed header fields. All fields little-endian.
    use core::ops::Range;

    pub const ID: Range<usize> = 0..8;
    pub const FLAGS: Range<usize> = 8..10;
    pub const COUNT: Range<usize> = 10..12;
    pub const OVERFLOW: Range<usize> = 12..16;
}

/// An owned page image: the 16-byte header followed by the body. A page
/// with overflow `k` spans `k + 1` consecutive page-size units and is
/// held here as one contiguous buffer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Page {
    data: Vec<u8>,
}

impl Page {
    /// Zeroed page of `len` total bytes with the id field written.
    pub fn new(id: Pgid, len: usize) -> Self {
        assert!(len >= PAGE_HDR_LEN, "page smaller than its header");
        let mut page = Self {
            data: vec![0; len],
        };
        page.set_id(id);
        page
    }

    /// Page sized to hold `serialized_len` bytes (header included),
    /// rounded up to whole `page_size` units with the overflow count set
    /// to the extra units used.
    pub fn sized_for(id: Pgid, serialized_len: usize, page_size: usize) -> Self {
        assert!(page_size >= PAGE_HDR_LEN, "page size smaller than header");
        let units = serialized_len.max(PAGE_HDR_LEN).div_ceil(page_size).max(1);
        let mut page = Self::new(id, units * page_size);
        page.set_overflow((units - 1) as u32);
        page
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.len() < PAGE_HDR_LEN {
            return Err(TenebraError::Corruption("page buffer truncated"));
        }
        Ok(Self { data })
    }

    pub fn id(&self) -> Pgid {
        Pgid(u64::from_le_bytes(self.data[header::ID].try_into().unwrap()))
    }

    pub fn set_id(&mut self, id: Pgid) {
        self.data[header::ID].copy_from_slice(&id.0.to_le_bytes());
    }

    pub fn flags(&self) -> u16 {
        u16::from_le_bytes(self.data[header::FLAGS].try_into().unwrap())
    }

    pub fn set_flags(&mut self, flags: u16) {
        self.data[header::FLAGS].copy_from_slice(&flags.to_le_bytes());
    }

    pub fn count(&self) -> u16 {
        u16::from_le_bytes(self.data[header::COUNT].try_into().unwrap())
    }

    pub fn set_count(&mut self, count: u16) {
        self.data[header::COUNT].copy_from_slice(&count.to_le_bytes());
    }

    pub fn overflow(&self) -> u32 {
        u32::from_le_bytes(self.data[header::OVERFLOW].try_into().unwrap())
    }

    pub fn set_overflow(&mut self, overflow: u32) {
        self.data[header::OVERFLOW].copy_from_slice(&overflow.to_le_bytes());
    }

    pub fn type_name(&self) -> &'static str {
        match self.flags() {
            f if f & BRANCH_PAGE_FLAG != 0 => "branch",
            f if f & LEAF_PAGE_FLAG != 0 => "leaf",
            f if f & META_PAGE_FLAG != 0 => "meta",
            f if f & FREELIST_PAGE_FLAG != 0 => "freelist",
            _ => "unknown",
        }
    }

    /// Everything after the header.
    pub fn body(&self) -> &[u8] {
        &self.data[PAGE_HDR_LEN..]
    }

    pub fn body_mut(&mut self) -> &mut [u8] {
        &mut self.data[PAGE_HDR_LEN..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fields_roundtrip() {
        let mut page = Page::new(Pgid(42), DEFAULT_PAGE_SIZE);
        page.set_flags(FREELIST_PAGE_FLAG);
        page.set_count(7);
        page.set_overflow(3);

        assert_eq!(page.id(), Pgid(42));
        assert_eq!(page.flags(), FREELIST_PAGE_FLAG);
        assert_eq!(page.count(), 7);
        assert_eq!(page.overflow(), 3);
        assert_eq!(page.type_name(), "freelist");
        assert_eq!(page.body().len(), DEFAULT_PAGE_SIZE - PAGE_HDR_LEN);
    }

    #[test]
    fn header_is_little_endian() {
        let mut page = Page::new(Pgid(0x0102_0304), 64);
        page.set_flags(FREELIST_PAGE_FLAG);
        let bytes = page.as_bytes();
        assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(bytes[8], 0x10);
    }

    #[test]
    fn sized_for_rounds_up_to_whole_pages() {
        let page = Page::sized_for(Pgid(9), 100, 64);
        assert_eq!(page.as_bytes().len(), 128);
        assert_eq!(page.overflow(), 1);

        let exact = Page::sized_for(Pgid(9), 128, 64);
        assert_eq!(exact.as_bytes().len(), 128);
        assert_eq!(exact.overflow(), 1);

        let small = Page::sized_for(Pgid(9), 10, 64);
        assert_eq!(small.as_bytes().len(), 64);
        assert_eq!(small.overflow(), 0);
    }

    #[test]
    fn from_bytes_rejects_truncated_buffer() {
        assert!(Page::from_bytes(vec![0; PAGE_HDR_LEN - 1]).is_err());
    }
}
