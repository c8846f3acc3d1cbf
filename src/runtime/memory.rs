//! WebAssembly linear memory implementation
//!
//! All access is bounds-checked against the current byte length before any
//! byte is touched, so a failing store never leaves a partial write behind.
//! Values are always laid out little-endian.
//!
//! Memory layout:
//! - Page size: 64KB (65,536 bytes)
//! - Address space: 32-bit base plus 32-bit static offset
//! - Out-of-bounds access: traps

use super::{RuntimeError, TrapKind};
use crate::ast::Limit;
use byteorder::{ByteOrder, LittleEndian};

/// WebAssembly page size in bytes (64KB)
pub const PAGE_SIZE: usize = 65536;

/// Maximum number of pages (2^16 = 64K pages = 4GB total)
pub const MAX_PAGES: u32 = 65536;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
    data: Vec<u8>,
    current_pages: u32,
    max_pages: Option<u32>,
}

impl Memory {
    /// Create a new memory instance with the given limits
    ///
    /// # Errors
    /// - Initial pages exceeds maximum
    /// - Initial pages exceeds system maximum
    pub fn new(initial_pages: u32, max_pages: Option<u32>) -> Result<Self, RuntimeError> {
        if initial_pages > MAX_PAGES {
            return Err(RuntimeError::MemoryError(format!(
                "Initial memory size {} pages exceeds maximum {} pages",
                initial_pages, MAX_PAGES
            )));
        }

        if let Some(max) = max_pages {
            if initial_pages > max {
                return Err(RuntimeError::MemoryError(format!(
                    "Initial size {} pages exceeds specified maximum {} pages",
                    initial_pages, max
                )));
            }
            if max > MAX_PAGES {
                return Err(RuntimeError::MemoryError(format!(
                    "Maximum size {} pages exceeds system maximum {} pages",
                    max, MAX_PAGES
                )));
            }
        }

        Ok(Memory {
            data: vec![0u8; initial_pages as usize * PAGE_SIZE],
            current_pages: initial_pages,
            max_pages,
        })
    }

    pub fn from_limit(limit: &Limit) -> Result<Self, RuntimeError> {
        Memory::new(limit.min, limit.max)
    }

    /// Current size in pages
    pub fn size(&self) -> u32 {
        self.current_pages
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn max_pages(&self) -> Option<u32> {
        self.max_pages
    }

    /// Grow memory by the specified number of pages
    ///
    /// Returns the previous size in pages, or -1 if growth fails
    pub fn grow(&mut self, delta_pages: u32) -> i32 {
        let current = self.current_pages;

        let new_pages = match current.checked_add(delta_pages) {
            Some(pages) => pages,
            None => return -1,
        };

        let effective_max = self.max_pages.unwrap_or(MAX_PAGES);
        if new_pages > effective_max {
            return -1;
        }

        let new_bytes = new_pages as usize * PAGE_SIZE;
        match self.data.try_reserve(new_bytes - self.data.len()) {
            Ok(()) => {
                self.data.resize(new_bytes, 0);
                self.current_pages = new_pages;
                current as i32
            }
            Err(_) => -1,
        }
    }

    /// The byte range `[addr, addr + size)` if it lies entirely in bounds.
    #[inline]
    fn check_bounds(&self, addr: u64, size: usize) -> Result<std::ops::Range<usize>, RuntimeError> {
        let end = addr
            .checked_add(size as u64)
            .ok_or(RuntimeError::Trap(TrapKind::OutOfBounds))?;
        if end > self.data.len() as u64 {
            return Err(RuntimeError::Trap(TrapKind::OutOfBounds));
        }
        Ok(addr as usize..end as usize)
    }

    pub fn read_u8(&self, addr: u64) -> Result<u8, RuntimeError> {
        let range = self.check_bounds(addr, 1)?;
        Ok(self.data[range.start])
    }

    pub fn read_u16(&self, addr: u64) -> Result<u16, RuntimeError> {
        let range = self.check_bounds(addr, 2)?;
        Ok(LittleEndian::read_u16(&self.data[range]))
    }

    pub fn read_u32(&self, addr: u64) -> Result<u32, RuntimeError> {
        let range = self.check_bounds(addr, 4)?;
        Ok(LittleEndian::read_u32(&self.data[range]))
    }

    pub fn read_u64(&self, addr: u64) -> Result<u64, RuntimeError> {
        let range = self.check_bounds(addr, 8)?;
        Ok(LittleEndian::read_u64(&self.data[range]))
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) -> Result<(), RuntimeError> {
        let range = self.check_bounds(addr, 1)?;
        self.data[range.start] = value;
        Ok(())
    }

    pub fn write_u16(&mut self, addr: u64, value: u16) -> Result<(), RuntimeError> {
        let range = self.check_bounds(addr, 2)?;
        LittleEndian::write_u16(&mut self.data[range], value);
        Ok(())
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) -> Result<(), RuntimeError> {
        let range = self.check_bounds(addr, 4)?;
        LittleEndian::write_u32(&mut self.data[range], value);
        Ok(())
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) -> Result<(), RuntimeError> {
        let range = self.check_bounds(addr, 8)?;
        LittleEndian::write_u64(&mut self.data[range], value);
        Ok(())
    }

    pub fn read_bytes(&self, addr: u64, len: usize) -> Result<Vec<u8>, RuntimeError> {
        let range = self.check_bounds(addr, len)?;
        Ok(self.data[range].to_vec())
    }

    pub fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> Result<(), RuntimeError> {
        let range = self.check_bounds(addr, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_creation() {
        let mem = Memory::new(1, Some(10)).unwrap();
        assert_eq!(mem.size(), 1);
        assert_eq!(mem.byte_len(), PAGE_SIZE);
        assert_eq!(mem.max_pages(), Some(10));

        let mem = Memory::new(0, None).unwrap();
        assert_eq!(mem.size(), 0);
        assert_eq!(mem.byte_len(), 0);
    }

    #[test]
    fn test_memory_creation_errors() {
        assert!(Memory::new(10, Some(5)).is_err());
        assert!(Memory::new(1, Some(MAX_PAGES + 1)).is_err());
        assert!(Memory::new(MAX_PAGES + 1, None).is_err());
    }

    #[test]
    fn test_memory_grow() {
        let mut mem = Memory::new(1, Some(3)).unwrap();
        assert_eq!(mem.grow(1), 1);
        assert_eq!(mem.size(), 2);
        assert_eq!(mem.grow(0), 2);
        assert_eq!(mem.grow(2), -1);
        assert_eq!(mem.size(), 2);
        assert_eq!(mem.grow(1), 2);
        assert_eq!(mem.byte_len(), 3 * PAGE_SIZE);
    }

    #[test]
    fn test_grow_zero_initialisation() {
        let mut mem = Memory::new(1, None).unwrap();
        mem.write_u8(PAGE_SIZE as u64 - 1, 0xff).unwrap();
        mem.grow(1);
        assert_eq!(mem.read_u8(PAGE_SIZE as u64).unwrap(), 0);
        assert_eq!(mem.read_u8(PAGE_SIZE as u64 - 1).unwrap(), 0xff);
    }

    #[test]
    fn test_bounds_checking() {
        let mut mem = Memory::new(1, None).unwrap();
        let last = PAGE_SIZE as u64 - 4;
        assert!(mem.write_u32(last, 7).is_ok());
        assert_eq!(mem.read_u32(last + 1), Err(RuntimeError::Trap(TrapKind::OutOfBounds)));
        assert!(mem.read_u8(u64::MAX).is_err());
    }

    #[test]
    fn test_no_partial_writes() {
        let mut mem = Memory::new(1, None).unwrap();
        let addr = PAGE_SIZE as u64 - 2;
        assert!(mem.write_u64(addr, u64::MAX).unwrap_err().is_trap());
        assert_eq!(mem.read_u16(addr).unwrap(), 0);
        assert!(mem.write_bytes(addr, &[1, 2, 3]).is_err());
        assert_eq!(mem.read_bytes(addr, 2).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut mem = Memory::new(1, None).unwrap();
        mem.write_u32(0, 0x1234_5678).unwrap();
        assert_eq!(mem.read_bytes(0, 4).unwrap(), vec![0x78, 0x56, 0x34, 0x12]);
        assert_eq!(mem.read_u16(2).unwrap(), 0x1234);

        mem.write_u64(8, 0x0102_0304_0506_0708).unwrap();
        assert_eq!(mem.read_u8(8).unwrap(), 0x08);
        assert_eq!(mem.read_u64(8).unwrap(), 0x0102_0304_0506_0708);
    }

    #[test]
    fn test_unaligned_access() {
        let mut mem = Memory::new(1, None).unwrap();
        mem.write_u32(3, 0xdead_beef).unwrap();
        assert_eq!(mem.read_u32(3).unwrap(), 0xdead_beef);
    }
}
