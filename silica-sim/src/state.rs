//! Memory images: dense for small arrays, sparse above a footprint threshold.

use hashbrown::HashMap;
use silica_ir::{mask, Value, Width};

/// Footprint (in bytes of backing store) above which a memory is kept sparse.
const SPARSE_THRESHOLD_BYTES: u64 = 1 << 20;

/// State of one flattened memory. Cells read as zero until written.
#[derive(Debug, Clone)]
pub(crate) enum MemImage {
    Dense(Vec<Value>),
    Sparse(HashMap<u64, Value>),
}

impl MemImage {
    pub(crate) fn new(depth: u64, _width: Width) -> Self {
        let footprint = depth.saturating_mul(core::mem::size_of::<Value>() as u64);
        if footprint > SPARSE_THRESHOLD_BYTES {
            MemImage::Sparse(HashMap::new())
        } else {
            MemImage::Dense(vec![0; depth as usize])
        }
    }

    pub(crate) fn get(&self, addr: u64) -> Value {
        match self {
            MemImage::Dense(cells) => cells.get(addr as usize).copied().unwrap_or(0),
            MemImage::Sparse(cells) => cells.get(&addr).copied().unwrap_or(0),
        }
    }

    /// Store a cell; addresses past the declared depth are dropped by the
    /// caller, values are truncated to the cell width.
    pub(crate) fn set(&mut self, addr: u64, value: Value, width: Width) {
        let value = value & mask(width);
        match self {
            MemImage::Dense(cells) => {
                if let Some(cell) = cells.get_mut(addr as usize) {
                    *cell = value;
                }
            }
            MemImage::Sparse(cells) => {
                if value == 0 {
                    cells.remove(&addr);
                } else {
                    cells.insert(addr, value);
                }
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        match self {
            MemImage::Dense(cells) => cells.fill(0),
            MemImage::Sparse(cells) => cells.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_memories_are_dense() {
        let img = MemImage::new(4096, 32);
        assert!(matches!(img, MemImage::Dense(_)));
    }

    #[test]
    fn large_memories_are_sparse() {
        let img = MemImage::new(1 << 30, 8);
        assert!(matches!(img, MemImage::Sparse(_)));
    }

    #[test]
    fn unwritten_cells_read_zero() {
        let mut img = MemImage::new(16, 8);
        assert_eq!(img.get(3), 0);
        img.set(3, 0x1ff, 8);
        assert_eq!(img.get(3), 0xff);
    }

    #[test]
    fn sparse_wipes_zero_stores() {
        let mut img = MemImage::new(1 << 30, 8);
        img.set(77, 1, 8);
        img.set(77, 0, 8);
        match img {
            MemImage::Sparse(cells) => assert!(cells.is_empty()),
            MemImage::Dense(_) => unreachable!(),
        }
    }
}
