use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub doc_id: String,
    pub chunk_id: String,
    /// Position of this chunk in the document's chunk sequence.
    pub ordinal: usize,
    pub text: String,
    /// Byte span in the normalized source text. Adjacent spans overlap
    /// by exactly the configured sentence-overlap window.
    pub span: (usize, usize),
    /// Heading trail from the document root down to the section that
    /// produced this chunk. Used to rebuild ancestor context later.
    pub parent_path: Vec<String>,
}

impl Chunk {
    pub fn new(
        doc_id: String,
        ordinal: usize,
        text: String,
        span: (usize, usize),
        parent_path: Vec<String>,
    ) -> Self {
        let chunk_id = Self::generate_chunk_id(&doc_id, ordinal, &text, span);

        Self {
            doc_id,
            chunk_id,
            ordinal,
            text,
            span,
            parent_path,
        }
    }

    fn generate_chunk_id(doc_id: &str, ordinal: usize, text: &str, span: (usize, usize)) -> String {
        let mut hasher = Sha256::new();
        hasher.update(doc_id.as_bytes());
        hasher.update(ordinal.to_string().as_bytes());
        hasher.update(text.as_bytes());
        hasher.update(span.0.to_string().as_bytes());
        hasher.update(span.1.to_string().as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16])
    }

    /// Short digest of the heading trail, bounded so it can be sent
    /// along with the chunk text without inflating prompts.
    pub fn ancestor_context(&self) -> String {
        self.parent_path.join(" > ")
    }
}
