/// Position of a chunk within a [`MemoryPool`][crate::MemoryPool].
///
/// Blocks and chunks are never removed from a pool while it exists, so coordinates stay valid
/// for the lifetime of the pool. They may only go stale in the sense that the chunk fills up.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ChunkCoordinates {
    /// The index of the block containing the chunk.
    block_index: usize,
    /// The index of the chunk within its block.
    chunk_index: usize,
}

impl ChunkCoordinates {
    #[must_use]
    pub(crate) fn from_parts(block_index: usize, chunk_index: usize) -> Self {
        Self {
            block_index,
            chunk_index,
        }
    }

    #[must_use]
    pub(crate) fn block_index(&self) -> usize {
        self.block_index
    }

    #[must_use]
    pub(crate) fn chunk_index(&self) -> usize {
        self.chunk_index
    }
}
