//! Aligned byte storage.
//!
//! [`AlignedBytes`] backs query buffers; [`VectorArena`] is the fixed-stride
//! row store both engines keep their vectors in. Rows start on 64-byte
//! boundaries so the distance kernels can reinterpret them as f32/f16 lanes.

use crate::config::VECTOR_ALIGNMENT;
use crate::error::{IndexError, Result};
use std::cell::UnsafeCell;

/// One alignment-sized block. Backing storage is built from these so the
/// base pointer lands on a 64-byte boundary.
#[derive(Clone, Copy)]
#[repr(C, align(64))]
struct AlignedBlock([u8; VECTOR_ALIGNMENT]);

const ZERO_BLOCK: AlignedBlock = AlignedBlock([0u8; VECTOR_ALIGNMENT]);

fn blocks_for(bytes: usize) -> usize {
    bytes.div_ceil(VECTOR_ALIGNMENT)
}

/// An owned byte buffer whose contents start on a 64-byte boundary.
#[derive(Clone, Default)]
pub struct AlignedBytes {
    blocks: Vec<AlignedBlock>,
    len: usize,
}

impl AlignedBytes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut buf = Self::new();
        buf.assign(bytes);
        buf
    }

    /// Replace the contents with a copy of `bytes`.
    pub fn assign(&mut self, bytes: &[u8]) {
        self.blocks.clear();
        self.blocks.resize(blocks_for(bytes.len()), ZERO_BLOCK);
        self.len = bytes.len();
        self.as_mut_slice().copy_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.blocks.as_ptr().cast::<u8>(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.blocks.as_mut_ptr().cast::<u8>(), self.len) }
    }
}

impl std::fmt::Debug for AlignedBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBytes").field("len", &self.len).finish()
    }
}

/// Fixed-stride row store shared across threads.
///
/// The stride is the row payload rounded up to the vector alignment, so
/// every row starts on a 64-byte boundary and can be viewed as f32/f16
/// lanes.
///
/// Writes go through [`VectorArena::write_row`], which is `unsafe`: the
/// caller must guarantee that no other thread writes the same row
/// concurrently. In the HNSW engine that holds because a row is written
/// either before its node is published (fresh insert) or under the owning
/// label's operation lock (update, replace-deleted); in the brute-force
/// engine every write happens under the store's write lock. A reader racing
/// an in-place update may observe a mix of old and new bytes for that one
/// row; the search treats such a row as an ordinary approximate candidate,
/// and the final vector becomes visible when the writer's lock release
/// synchronizes with the next reader.
pub struct VectorArena {
    data: UnsafeCell<Box<[AlignedBlock]>>,
    stride: usize,
    row_bytes: usize,
    rows: usize,
}

// Row-level exclusivity for writes is the caller contract documented above;
// reads of distinct rows never alias writes.
unsafe impl Sync for VectorArena {}
unsafe impl Send for VectorArena {}

impl VectorArena {
    /// Allocate a zeroed arena of `rows` rows of `row_bytes` payload each.
    ///
    /// Fails with `ResourceExhausted` when the reservation cannot be made.
    pub fn new(rows: usize, row_bytes: usize) -> Result<Self> {
        let stride = if row_bytes == 0 {
            0
        } else {
            blocks_for(row_bytes) * VECTOR_ALIGNMENT
        };
        let total_blocks = rows
            .checked_mul(stride / VECTOR_ALIGNMENT)
            .ok_or_else(|| IndexError::ResourceExhausted("vector arena size overflow".into()))?;
        let mut blocks: Vec<AlignedBlock> = Vec::new();
        blocks
            .try_reserve_exact(total_blocks)
            .map_err(|_| IndexError::ResourceExhausted("failed to allocate vector arena".into()))?;
        blocks.resize(total_blocks, ZERO_BLOCK);
        Ok(Self {
            data: UnsafeCell::new(blocks.into_boxed_slice()),
            stride,
            row_bytes,
            rows,
        })
    }

    /// Bytes between consecutive rows.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Payload bytes per row.
    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    fn base(&self) -> *mut u8 {
        unsafe { (*self.data.get()).as_mut_ptr().cast::<u8>() }
    }

    /// Borrow the payload of `row`.
    pub fn row(&self, row: u32) -> &[u8] {
        assert!((row as usize) < self.rows, "arena row out of bounds");
        unsafe {
            std::slice::from_raw_parts(self.base().add(row as usize * self.stride), self.row_bytes)
        }
    }

    /// Overwrite the payload of `row` with `bytes`.
    ///
    /// # Safety
    ///
    /// The caller must hold whatever lock makes it the only writer of this
    /// row (see the type-level contract).
    pub unsafe fn write_row(&self, row: u32, bytes: &[u8]) {
        assert!((row as usize) < self.rows, "arena row out of bounds");
        assert!(bytes.len() <= self.row_bytes, "row payload overflow");
        std::ptr::copy_nonoverlapping(
            bytes.as_ptr(),
            self.base().add(row as usize * self.stride),
            bytes.len(),
        );
    }

    /// Copy one row's payload from `src` into this arena.
    ///
    /// # Safety
    ///
    /// Same single-writer contract as [`VectorArena::write_row`].
    pub unsafe fn copy_row_within(&self, dst: u32, src: u32) {
        assert!((dst as usize) < self.rows && (src as usize) < self.rows);
        std::ptr::copy_nonoverlapping(
            self.base().add(src as usize * self.stride),
            self.base().add(dst as usize * self.stride),
            self.row_bytes,
        );
    }
}

impl std::fmt::Debug for VectorArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorArena")
            .field("rows", &self.rows)
            .field("row_bytes", &self.row_bytes)
            .field("stride", &self.stride)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_bytes_alignment_and_contents() {
        let data: Vec<u8> = (0..100).collect();
        let buf = AlignedBytes::from_slice(&data);
        assert_eq!(buf.len(), 100);
        assert_eq!(buf.as_slice(), &data[..]);
        assert_eq!(buf.as_slice().as_ptr() as usize % VECTOR_ALIGNMENT, 0);
    }

    #[test]
    fn test_aligned_bytes_reassign() {
        let mut buf = AlignedBytes::from_slice(&[1, 2, 3]);
        buf.assign(&[9; 130]);
        assert_eq!(buf.len(), 130);
        assert!(buf.as_slice().iter().all(|&b| b == 9));
    }

    #[test]
    fn test_arena_stride_rounds_up() {
        let arena = VectorArena::new(4, 100).unwrap();
        assert_eq!(arena.stride(), 128);
        assert_eq!(arena.row_bytes(), 100);
        for row in 0..4 {
            assert_eq!(arena.row(row).as_ptr() as usize % VECTOR_ALIGNMENT, 0);
            assert!(arena.row(row).iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_arena_rows_are_independent() {
        let arena = VectorArena::new(3, 16).unwrap();
        unsafe {
            arena.write_row(1, &[7u8; 16]);
        }
        assert!(arena.row(0).iter().all(|&b| b == 0));
        assert_eq!(arena.row(1), &[7u8; 16]);
        assert!(arena.row(2).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_arena_copy_row_within() {
        let arena = VectorArena::new(2, 8).unwrap();
        unsafe {
            arena.write_row(0, &[5u8; 8]);
            arena.copy_row_within(1, 0);
        }
        assert_eq!(arena.row(1), &[5u8; 8]);
    }

    #[test]
    fn test_arena_f32_view_is_castable() {
        let arena = VectorArena::new(2, 12).unwrap();
        let values = [1.0f32, 2.0, 3.0];
        unsafe {
            arena.write_row(1, bytemuck::cast_slice(&values));
        }
        let lanes: &[f32] = bytemuck::cast_slice(arena.row(1));
        assert_eq!(lanes, &values);
    }
}
