use serde::{Deserialize, Serialize};
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

use crate::chunk::Chunk;
use crate::document::{HintKind, NormalizedDocument, StructuralHint};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Character budget per chunk. A single sentence longer than this is
    /// emitted as its own oversized chunk rather than truncated.
    pub max_chars: usize,
    /// Number of trailing sentences carried verbatim into the next chunk.
    pub overlap_sentences: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            overlap_sentences: 2,
        }
    }
}

/// A section of the document with its heading trail.
struct Section<'a> {
    path: Vec<String>,
    start: usize,
    text: &'a str,
}

/// A packable unit: a sentence, or a coalesced table region.
/// Units are contiguous within their section.
#[derive(Clone, Copy)]
struct Unit<'a> {
    start: usize,
    text: &'a str,
}

pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Split a normalized document into an ordered sequence of chunks.
    /// Deterministic for identical input, so an interrupted run can be
    /// restarted and reproduce the same chunk ids.
    pub fn chunk_document(&self, doc: &NormalizedDocument) -> Vec<Chunk> {
        let hints = self.usable_hints(doc);

        let sections = self.split_sections(&doc.text, &hints);

        let mut chunks = Vec::new();
        let mut ordinal = 0;

        for section in &sections {
            let units = self.collect_units(section, &hints);
            self.pack_units(doc, section, &units, &mut ordinal, &mut chunks);
        }

        chunks
    }

    /// Filter out hints whose spans do not line up with the text. Each
    /// discarded hint is logged; the heuristics below cover the gap.
    fn usable_hints<'a>(&self, doc: &'a NormalizedDocument) -> Vec<&'a StructuralHint> {
        let mut usable = Vec::new();
        for hint in &doc.structural_hints {
            if hint.is_valid_for(&doc.text) {
                usable.push(hint);
            } else {
                warn!(
                    doc_id = %doc.document_id,
                    span = ?hint.span,
                    kind = ?hint.kind,
                    "discarding structural hint inconsistent with text"
                );
            }
        }
        usable
    }

    /// Build the section tier of the hierarchy: from heading hints when
    /// any survived validation, otherwise from markdown-style headings.
    fn split_sections<'a>(&self, text: &'a str, hints: &[&StructuralHint]) -> Vec<Section<'a>> {
        let mut headings: Vec<(usize, usize, u8, String)> = Vec::new();

        for hint in hints {
            if let HintKind::Heading { level } = hint.kind {
                let title = if hint.text.is_empty() {
                    text[hint.span.0..hint.span.1].trim().to_string()
                } else {
                    hint.text.clone()
                };
                headings.push((hint.span.0, hint.span.1, level, title));
            }
        }

        if headings.is_empty() {
            headings = self.detect_headings(text);
        }

        if headings.is_empty() {
            return vec![Section {
                path: Vec::new(),
                start: 0,
                text,
            }];
        }

        headings.sort_by_key(|h| h.0);

        let mut sections = Vec::new();
        // Preamble before the first heading keeps an empty path.
        if headings[0].0 > 0 {
            sections.push(Section {
                path: Vec::new(),
                start: 0,
                text: &text[..headings[0].0],
            });
        }

        let mut stack: Vec<(u8, String)> = Vec::new();
        for (i, (_, end, level, title)) in headings.iter().enumerate() {
            while stack.last().is_some_and(|(l, _)| l >= level) {
                stack.pop();
            }
            stack.push((*level, title.clone()));

            let body_start = *end;
            let body_end = headings.get(i + 1).map_or(text.len(), |h| h.0);
            if body_start < body_end {
                sections.push(Section {
                    path: stack.iter().map(|(_, t)| t.clone()).collect(),
                    start: body_start,
                    text: &text[body_start..body_end],
                });
            }
        }

        sections
    }

    /// Heuristic fallback: markdown headings, returned as
    /// (span_start, span_end, level, title). The heading line itself is
    /// excluded from section bodies; it lives on in the parent path.
    fn detect_headings(&self, text: &str) -> Vec<(usize, usize, u8, String)> {
        let mut headings = Vec::new();
        let mut offset = 0;

        for line in text.split_inclusive('\n') {
            let trimmed = line.trim_start();
            if trimmed.starts_with('#') {
                let level = trimmed.chars().take_while(|&c| c == '#').count() as u8;
                let title = trimmed.trim_start_matches('#').trim().to_string();
                if !title.is_empty() {
                    headings.push((offset, offset + line.len(), level, title));
                }
            }
            offset += line.len();
        }

        headings
    }

    /// Build the sentence tier for one section: paragraph ranges first
    /// (hinted breaks, else blank lines), unicode sentence bounds within
    /// each paragraph, then table regions coalesced into atomic units.
    fn collect_units<'a>(&self, section: &Section<'a>, hints: &[&StructuralHint]) -> Vec<Unit<'a>> {
        let sect_end = section.start + section.text.len();

        let mut break_starts: Vec<usize> = hints
            .iter()
            .filter(|h| h.kind == HintKind::ParagraphBreak)
            .map(|h| h.span.1)
            .filter(|&p| p > section.start && p < sect_end)
            .collect();

        if break_starts.is_empty() {
            for (idx, _) in section.text.match_indices("\n\n") {
                let p = section.start + idx + 2;
                if p < sect_end {
                    break_starts.push(p);
                }
            }
        }
        break_starts.sort_unstable();
        break_starts.dedup();

        let mut units: Vec<Unit<'a>> = Vec::new();
        let mut para_start = section.start;
        for boundary in break_starts.into_iter().chain(std::iter::once(sect_end)) {
            if boundary <= para_start {
                continue;
            }
            let para = &section.text[para_start - section.start..boundary - section.start];
            for (off, sentence) in para.split_sentence_bound_indices() {
                units.push(Unit {
                    start: para_start + off,
                    text: sentence,
                });
            }
            para_start = boundary;
        }

        self.coalesce_tables(units, section, hints)
    }

    /// Merge consecutive units that fall inside a hinted table region so
    /// tables are never split mid-row.
    fn coalesce_tables<'a>(
        &self,
        units: Vec<Unit<'a>>,
        section: &Section<'a>,
        hints: &[&StructuralHint],
    ) -> Vec<Unit<'a>> {
        let tables: Vec<(usize, usize)> = hints
            .iter()
            .filter(|h| h.kind == HintKind::TableRegion)
            .map(|h| h.span)
            .collect();
        if tables.is_empty() {
            return units;
        }

        let in_table = |u: &Unit<'_>| {
            let end = u.start + u.text.len();
            tables.iter().any(|&(t0, t1)| u.start < t1 && end > t0)
        };

        let mut merged: Vec<Unit<'a>> = Vec::new();
        for unit in units {
            if let Some(last) = merged.last_mut() {
                if in_table(last) && in_table(&unit) {
                    // Contiguous within the section, so re-slice the span.
                    let start = last.start;
                    let end = unit.start + unit.text.len();
                    last.text = &section.text[start - section.start..end - section.start];
                    continue;
                }
            }
            merged.push(unit);
        }
        merged
    }

    /// Pack contiguous units into chunks under the character budget,
    /// carrying the configured sentence overlap forward verbatim.
    fn pack_units(
        &self,
        doc: &NormalizedDocument,
        section: &Section<'_>,
        units: &[Unit<'_>],
        ordinal: &mut usize,
        chunks: &mut Vec<Chunk>,
    ) {
        if units.is_empty() {
            return;
        }

        let mut chunk_start = 0usize;
        let mut carried = 0usize;

        while chunk_start < units.len() {
            let mut end = chunk_start;
            let mut len = 0usize;

            while end < units.len() {
                // Carried overlap units plus at least one new unit are
                // always taken, even when that exceeds the budget: data
                // loss is worse than an oversized chunk.
                let required = end < chunk_start + carried + 1;
                let unit_len = units[end].text.len();
                if !required && len + unit_len > self.config.max_chars {
                    break;
                }
                len += unit_len;
                end += 1;
                if len >= self.config.max_chars && end >= chunk_start + carried + 1 {
                    break;
                }
            }

            let text: String = units[chunk_start..end].iter().map(|u| u.text).collect();
            if !text.trim().is_empty() {
                let span_start = units[chunk_start].start;
                let last = &units[end - 1];
                let span = (span_start, last.start + last.text.len());
                chunks.push(Chunk::new(
                    doc.document_id.clone(),
                    *ordinal,
                    text,
                    span,
                    section.path.clone(),
                ));
                *ordinal += 1;
            }

            if end >= units.len() {
                break;
            }
            let next = end
                .saturating_sub(self.config.overlap_sentences)
                .max(chunk_start + 1);
            carried = end - next;
            chunk_start = next;
        }
    }
}
