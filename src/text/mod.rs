//! Text preparation for retrieval.
//!
//! Raw email bodies flow through two pure steps before they reach the
//! vector store:
//! 1. `normalize::clean()`: HTML → text, quoted-reply stripping, whitespace
//! 2. `chunk::chunk_text()`: overlapping fixed-size character windows
//!
//! Neither step performs I/O or model calls.

pub mod chunk;
pub mod normalize;

pub use chunk::{Chunk, chunk_text, split_into_chunks};
pub use normalize::clean;
