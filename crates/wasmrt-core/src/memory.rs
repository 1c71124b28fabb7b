//! Linear memory.
//!
//! [`MemoryInstance`] is the only sanctioned path to a module's linear memory.
//! Every accessor validates `[offset, offset + width)` against the current
//! buffer before touching it, so an out-of-range access fails without reading
//! or writing anything. Multi-byte values are little-endian.

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::{debug, warn};

use wasmrt_common::RuntimeError;

use crate::module::LimitsType;

/// Size of one linear memory page in bytes.
pub const PAGE_SIZE: usize = 65_536;

/// A page-granular, bounds-checked byte buffer.
///
/// The buffer sits behind a lock so a shared `Arc<MemoryInstance>` can be
/// written through `&self`. The lock only makes each access atomic; ordering
/// between concurrent writers is up to the calling convention.
#[derive(Debug)]
pub struct MemoryInstance {
    buffer: RwLock<Vec<u8>>,
    min: u32,
    max: Option<u32>,
    limit_pages: u32,
}

impl MemoryInstance {
    /// Allocate `limits.min` zeroed pages.
    ///
    /// `limit_pages` caps both the declared limits and later growth.
    pub fn new(limits: &LimitsType, limit_pages: u32) -> Result<Self, RuntimeError> {
        limits.check(limit_pages)?;
        let len = limits.min as usize * PAGE_SIZE;
        debug!(pages = limits.min, bytes = len, "Allocating linear memory");
        let mut buffer = Vec::new();
        if !try_resize(&mut buffer, len) {
            return Err(RuntimeError::MemoryLimitExceeded {
                requested_pages: u64::from(limits.min),
                limit_pages,
            });
        }
        Ok(Self {
            buffer: RwLock::new(buffer),
            min: limits.min,
            max: limits.max,
            limit_pages,
        })
    }

    /// Declared minimum in pages.
    pub fn min(&self) -> u32 {
        self.min
    }

    /// Declared maximum in pages, if any.
    pub fn max(&self) -> Option<u32> {
        self.max
    }

    /// Current size in bytes.
    pub fn size(&self) -> usize {
        self.buffer.read().len()
    }

    /// Current size in pages.
    #[allow(clippy::cast_possible_truncation)]
    pub fn pages(&self) -> u32 {
        (self.size() / PAGE_SIZE) as u32
    }

    /// Read-only view of the whole buffer.
    ///
    /// Writers block while the guard is held.
    pub fn bytes(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.buffer.read()
    }

    /// Returns `true` if `[offset, offset + length)` lies inside the buffer.
    ///
    /// The start must address an existing byte unless it is zero, so an empty
    /// range is only accepted at offset 0 or strictly inside the buffer. A sum
    /// that overflows `u64` is out of range.
    pub fn validate_addr_range(&self, offset: u32, length: u64) -> bool {
        in_range(self.buffer.read().len(), offset, length)
    }

    /// Grow by `delta` pages, returning the previous page count.
    ///
    /// Fails without changing the memory if the result would exceed the
    /// declared maximum or the store's page limit, or the host cannot
    /// allocate it.
    pub fn grow(&self, delta: u32) -> Option<u32> {
        let mut buffer = self.buffer.write();
        #[allow(clippy::cast_possible_truncation)]
        let previous = (buffer.len() / PAGE_SIZE) as u32;
        let new_pages = previous.checked_add(delta)?;
        let ceiling = self.max.map_or(self.limit_pages, |m| m.min(self.limit_pages));
        if new_pages > ceiling {
            debug!(previous, delta, ceiling, "Memory growth refused");
            return None;
        }
        if !try_resize(&mut buffer, new_pages as usize * PAGE_SIZE) {
            warn!(previous, delta, "Memory growth failed to allocate");
            return None;
        }
        Some(previous)
    }

    /// Copy `length` bytes starting at `offset`.
    pub fn read(&self, offset: u32, length: u32) -> Option<Vec<u8>> {
        let buffer = self.buffer.read();
        if !in_range(buffer.len(), offset, u64::from(length)) {
            return None;
        }
        let start = offset as usize;
        Some(buffer[start..start + length as usize].to_vec())
    }

    /// Write `bytes` at `offset`, all or nothing.
    pub fn write(&self, offset: u32, bytes: &[u8]) -> bool {
        let mut buffer = self.buffer.write();
        if !in_range(buffer.len(), offset, bytes.len() as u64) {
            return false;
        }
        let start = offset as usize;
        buffer[start..start + bytes.len()].copy_from_slice(bytes);
        true
    }

    pub fn read_byte(&self, offset: u32) -> Option<u8> {
        self.get::<1>(offset).map(|[b]| b)
    }

    pub fn read_u16(&self, offset: u32) -> Option<u16> {
        self.get(offset).map(u16::from_le_bytes)
    }

    pub fn read_u32(&self, offset: u32) -> Option<u32> {
        self.get(offset).map(u32::from_le_bytes)
    }

    pub fn read_u64(&self, offset: u32) -> Option<u64> {
        self.get(offset).map(u64::from_le_bytes)
    }

    pub fn read_f32(&self, offset: u32) -> Option<f32> {
        self.read_u32(offset).map(f32::from_bits)
    }

    pub fn read_f64(&self, offset: u32) -> Option<f64> {
        self.read_u64(offset).map(f64::from_bits)
    }

    pub fn put_byte(&self, offset: u32, value: u8) -> bool {
        self.put(offset, [value])
    }

    pub fn put_u16(&self, offset: u32, value: u16) -> bool {
        self.put(offset, value.to_le_bytes())
    }

    pub fn put_u32(&self, offset: u32, value: u32) -> bool {
        self.put(offset, value.to_le_bytes())
    }

    pub fn put_u64(&self, offset: u32, value: u64) -> bool {
        self.put(offset, value.to_le_bytes())
    }

    pub fn put_f32(&self, offset: u32, value: f32) -> bool {
        self.put_u32(offset, value.to_bits())
    }

    pub fn put_f64(&self, offset: u32, value: f64) -> bool {
        self.put_u64(offset, value.to_bits())
    }

    fn get<const N: usize>(&self, offset: u32) -> Option<[u8; N]> {
        let buffer = self.buffer.read();
        if !in_range(buffer.len(), offset, N as u64) {
            return None;
        }
        let start = offset as usize;
        let mut out = [0u8; N];
        out.copy_from_slice(&buffer[start..start + N]);
        Some(out)
    }

    fn put<const N: usize>(&self, offset: u32, bytes: [u8; N]) -> bool {
        let mut buffer = self.buffer.write();
        if !in_range(buffer.len(), offset, N as u64) {
            return false;
        }
        let start = offset as usize;
        buffer[start..start + N].copy_from_slice(&bytes);
        true
    }
}

/// Zero-extend `buffer` to `len` bytes. Leaves it untouched if the
/// allocation fails.
fn try_resize(buffer: &mut Vec<u8>, len: usize) -> bool {
    let additional = len.saturating_sub(buffer.len());
    if buffer.try_reserve_exact(additional).is_err() {
        return false;
    }
    buffer.resize(len, 0);
    true
}

fn in_range(len: usize, offset: u32, length: u64) -> bool {
    let len = len as u64;
    let offset = u64::from(offset);
    if offset != 0 && offset >= len {
        return false;
    }
    offset.checked_add(length).is_some_and(|end| end <= len)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGES: u32 = 100;
    const LEN: u64 = PAGES as u64 * PAGE_SIZE as u64;

    fn memory(min: u32) -> MemoryInstance {
        MemoryInstance::new(&LimitsType { min, max: None }, 65_536).unwrap()
    }

    #[test]
    fn test_initial_size() {
        let m = memory(2);
        assert_eq!(m.pages(), 2);
        assert_eq!(m.size(), 2 * PAGE_SIZE);
        assert!(m.bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_validate_addr_range() {
        let m = memory(PAGES);

        assert!(m.validate_addr_range(0, 0));
        assert!(m.validate_addr_range(0, LEN));
        assert!(!m.validate_addr_range(0, LEN + 1));
        assert!(!m.validate_addr_range(1, LEN));
        assert!(!m.validate_addr_range(LEN as u32, 0));
    }

    #[test]
    fn test_validate_addr_range_overflow() {
        let m = memory(1);
        assert!(!m.validate_addr_range(u32::MAX, u64::MAX));
        assert!(!m.validate_addr_range(1, u64::MAX));
        assert!(!m.validate_addr_range(0, u64::MAX));
    }

    #[test]
    fn test_validate_addr_range_empty_memory() {
        let m = memory(0);
        assert!(m.validate_addr_range(0, 0));
        assert!(!m.validate_addr_range(0, 1));
        assert!(!m.validate_addr_range(1, 0));
    }

    #[test]
    fn test_put_u32() {
        let m = memory(PAGES);
        let asymmetry_bits = 0xffff_fffe_u32;
        let last = (LEN - 4) as u32;

        assert!(m.put_u32(0, asymmetry_bits));
        assert_eq!(&m.bytes()[0..4], &asymmetry_bits.to_le_bytes());
        assert!(m.put_u32(0, u32::MAX));
        assert_eq!(m.read_u32(0), Some(u32::MAX));
        assert!(m.put_u32(last, asymmetry_bits));
        assert_eq!(m.read_u32(last), Some(asymmetry_bits));
        assert!(!m.put_u32(last + 1, asymmetry_bits));
    }

    #[test]
    fn test_failed_write_leaves_buffer_unchanged() {
        let m = memory(1);
        let tail = PAGE_SIZE as u32 - 3;
        assert!(m.write(tail, &[1, 2, 3]));

        for _ in 0..3 {
            assert!(!m.put_u32(tail, 0xdead_beef));
        }
        assert_eq!(m.read(tail, 3), Some(vec![1, 2, 3]));
        assert!(!m.write(tail, &[9, 9, 9, 9]));
        assert_eq!(m.read(tail, 3), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_repeated_writes_are_idempotent() {
        let m = memory(1);
        assert!(m.put_u64(8, 0x0102_0304_0506_0708));
        let once = m.bytes().clone();
        assert!(m.put_u64(8, 0x0102_0304_0506_0708));
        assert_eq!(*m.bytes(), once);
    }

    #[test]
    fn test_little_endian_encoding() {
        let m = memory(1);
        assert!(m.put_u16(0, 0x0102));
        assert_eq!(m.read(0, 2), Some(vec![0x02, 0x01]));
        assert!(m.put_u64(16, 1));
        assert_eq!(m.read_byte(16), Some(1));
        assert_eq!(m.read_byte(23), Some(0));
    }

    #[test]
    fn test_float_roundtrip() {
        let m = memory(1);
        assert!(m.put_f64(32, std::f64::consts::PI));
        assert_eq!(m.read_f64(32), Some(std::f64::consts::PI));
        assert!(m.put_f32(0, -1.5));
        assert_eq!(m.read_f32(0), Some(-1.5));
    }

    #[test]
    fn test_out_of_bounds_reads() {
        let m = memory(1);
        assert_eq!(m.read_u32(PAGE_SIZE as u32 - 2), None);
        assert_eq!(m.read_byte(PAGE_SIZE as u32), None);
        assert_eq!(m.read(0, PAGE_SIZE as u32 + 1), None);
    }

    #[test]
    fn test_grow_within_limit() {
        let m = MemoryInstance::new(&LimitsType { min: 1, max: Some(4) }, 65_536).unwrap();
        assert_eq!(m.grow(2), Some(1));
        assert_eq!(m.pages(), 3);
        assert!(m.put_byte(3 * PAGE_SIZE as u32 - 1, 7));
    }

    #[test]
    fn test_grow_exceeds_max() {
        let m = MemoryInstance::new(&LimitsType { min: 1, max: Some(2) }, 65_536).unwrap();
        assert_eq!(m.grow(5), None);
        assert_eq!(m.pages(), 1);
    }

    #[test]
    fn test_grow_exceeds_store_limit() {
        let m = MemoryInstance::new(&LimitsType { min: 1, max: None }, 2).unwrap();
        assert_eq!(m.grow(1), Some(1));
        assert_eq!(m.grow(1), None);
    }

    #[test]
    fn test_failed_allocation_leaves_buffer_unchanged() {
        let mut buffer = vec![1u8; 8];
        assert!(!try_resize(&mut buffer, usize::MAX));
        assert_eq!(buffer, vec![1u8; 8]);

        assert!(try_resize(&mut buffer, 16));
        assert_eq!(&buffer[8..], &[0u8; 8]);
    }

    #[test]
    fn test_new_rejects_inconsistent_limits() {
        assert!(MemoryInstance::new(&LimitsType { min: 5, max: Some(1) }, 65_536).is_err());
        assert!(MemoryInstance::new(&LimitsType { min: 10, max: None }, 4).is_err());
    }
}
