use serde::{Deserialize, Serialize};

/// Input contract from the external document normalizer:
/// ordered text plus structural hints for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedDocument {
    pub document_id: String,
    pub source_ref: String,
    #[serde(default)]
    pub doc_type: DocumentKind,
    pub text: String,
    #[serde(default)]
    pub structural_hints: Vec<StructuralHint>,
}

impl NormalizedDocument {
    pub fn new(
        document_id: impl Into<String>,
        source_ref: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            source_ref: source_ref.into(),
            doc_type: DocumentKind::default(),
            text: text.into(),
            structural_hints: Vec::new(),
        }
    }

    pub fn with_hints(mut self, hints: Vec<StructuralHint>) -> Self {
        self.structural_hints = hints;
        self
    }
}

/// Open document-kind tag ("pdf", "txt", "xml", "form13", ...).
/// Kept as a string rather than an enum so new upstream parsers
/// don't require a code change here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentKind(pub String);

impl Default for DocumentKind {
    fn default() -> Self {
        Self("unknown".to_string())
    }
}

impl DocumentKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A structural hint supplied by the upstream layout parser.
/// Spans are byte offsets into the normalized text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralHint {
    pub kind: HintKind,
    pub span: (usize, usize),
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintKind {
    Heading { level: u8 },
    ParagraphBreak,
    TableRegion,
}

impl StructuralHint {
    /// A hint is usable only if its span lies inside the text and on
    /// char boundaries. Inconsistent hints are discarded by the chunker,
    /// never escalated into a document failure.
    pub fn is_valid_for(&self, text: &str) -> bool {
        let (start, end) = self.span;
        start < end
            && end <= text.len()
            && text.is_char_boundary(start)
            && text.is_char_boundary(end)
    }
}
