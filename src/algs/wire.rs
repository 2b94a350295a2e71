//! Fixed little-endian wire types for the Setup announcement stages.

use bytemuck::{Pod, Zeroable};
use static_assertions::{assert_eq_align, assert_eq_size};

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Decode a received byte vector into records, copying so alignment never matters.
pub fn decode_records<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, String> {
    let width = std::mem::size_of::<T>();
    if bytes.len() % width != 0 {
        return Err(format!(
            "payload of {} bytes is not a whole number of {width}-byte records",
            bytes.len()
        ));
    }
    let mut out = vec![T::zeroed(); bytes.len() / width];
    cast_slice_mut(&mut out).copy_from_slice(bytes);
    Ok(out)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

/// Stage-1 announcement: how many index records follow, the sender's block
/// size, and whether the sender's own arguments were valid.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
    pub ok_le: u32,
    pub block_le: u64,
}

impl WireCount {
    /// # Errors
    /// If `n` does not fit the 32-bit wire count.
    pub fn new(n: usize, block: usize, ok: bool) -> Result<Self, String> {
        let n = u32::try_from(n)
            .map_err(|_| format!("{n} index records exceed the 32-bit wire count"))?;
        Ok(Self {
            n_le: n.to_le(),
            ok_le: u32::from(ok).to_le(),
            block_le: (block as u64).to_le(),
        })
    }

    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }

    pub fn block(&self) -> u64 {
        u64::from_le(self.block_le)
    }

    pub fn ok(&self) -> bool {
        u32::from_le(self.ok_le) != 0
    }
}

/// A global index carried on the wire.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireIndex {
    pub idx_le: u64,
}

impl WireIndex {
    pub fn of(idx: u64) -> Self {
        Self {
            idx_le: idx.to_le(),
        }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.idx_le)
    }
}

assert_eq_size!(WireCount, [u64; 2]);
assert_eq_align!(WireCount, u64);
assert_eq_size!(WireIndex, u64);
assert_eq_align!(WireIndex, u64);
