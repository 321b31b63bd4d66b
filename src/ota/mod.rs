pub mod engine;

pub use engine::{OtaEngine, ProgressFn};

use serde::Serialize;

/// Chunks needed to carry `len` bytes
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    if chunk_size == 0 {
        return 0;
    }
    len.div_ceil(chunk_size)
}

/// Transfer progress in chunk units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OtaProgress {
    pub current: usize,
    pub total: usize,
}

impl OtaProgress {
    pub fn is_complete(&self) -> bool {
        self.current >= self.total
    }
}
