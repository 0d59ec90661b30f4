use crate::constants::BLOCK_SIZE;

/// Location of one block within its piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockSpan {
    /// Byte offset within the piece.
    pub offset: u32,
    /// Length of the block in bytes.
    pub length: u32,
}

impl BlockSpan {
    /// Creates a new block span.
    pub fn new(offset: u32, length: u32) -> Self {
        Self { offset, length }
    }
}

/// Download state of a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceState {
    /// Not yet split into blocks; eligible for `find_new`.
    Unchunked,
    /// Split into blocks, some still missing.
    Chunked {
        /// Blocks not yet stored.
        missing: u32,
    },
    /// All blocks stored; the piece has left the block index.
    Fetched,
}

/// Computes the number of blocks in a piece.
pub fn block_count(piece_length: u32) -> u32 {
    piece_length.div_ceil(BLOCK_SIZE)
}

/// Splits a piece into block spans: fixed-size blocks plus a final short
/// block when the length is not a multiple of [`BLOCK_SIZE`].
pub fn chunk_blocks(piece_length: u32) -> Vec<BlockSpan> {
    let mut blocks = Vec::with_capacity(block_count(piece_length) as usize);
    let mut offset = 0u32;
    while offset < piece_length {
        let length = BLOCK_SIZE.min(piece_length - offset);
        blocks.push(BlockSpan::new(offset, length));
        offset += length;
    }
    blocks
}
