pub mod chunk;
pub mod chunker;
pub mod document;

pub use chunk::Chunk;
pub use chunker::{Chunker, ChunkerConfig};
pub use document::{DocumentKind, HintKind, NormalizedDocument, StructuralHint};
