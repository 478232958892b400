//! Registry of everything spans can point into: file contents, compiled-in
//! macro text, and strings synthesized during elaboration.
//!
//! Every registered blob occupies a disjoint range of one global byte
//! space. Given any sub-span, the map recovers which blob owns it, the
//! text, and a line/column location. Blobs registered as *fixed* report
//! the location of the operation that produced them instead of an interior
//! position; that is how evaluated strings stay traceable to the `+` or
//! `glob()` that assembled them.

use std::collections::BTreeMap;

use crate::span::{FileLocation, LineColumn, LineColumnRange, Span};

/// Index of a registered source in a [`SourceMap`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SourceId(pub(crate) u32);

/// Offsets of line starts within one content blob, filled by the scanner
/// while it walks the content (or in one go for non-scanned content).
#[derive(Debug, Default)]
pub struct LineIndex {
    line_starts: Vec<u32>,
}

impl LineIndex {
    pub fn is_empty(&self) -> bool {
        self.line_starts.is_empty()
    }

    /// Record the byte offset of the first character of a new line.
    /// Offsets must be pushed in non-decreasing order.
    pub fn push_line_start(&mut self, offset: u32) {
        debug_assert!(self.line_starts.last().is_none_or(|last| *last <= offset));
        self.line_starts.push(offset);
    }

    /// Line/column of a byte offset. Requires at least line 0 pushed.
    pub fn position(&self, offset: u32) -> LineColumn {
        let line = self.line_starts.partition_point(|start| *start <= offset) - 1;
        LineColumn {
            line: line as u32,
            col: offset - self.line_starts[line],
        }
    }

    pub fn range(&self, start: u32, end: u32) -> LineColumnRange {
        LineColumnRange {
            start: self.position(start),
            end: self.position(end),
        }
    }

    /// Index the full content in one pass; for content that is not going
    /// through the scanner (e.g. C++ sources grepped for includes).
    pub fn initialize_from(&mut self, content: &str) {
        debug_assert!(self.is_empty());
        self.push_line_start(0);
        for (pos, byte) in content.bytes().enumerate() {
            if byte == b'\n' {
                self.push_line_start(pos as u32 + 1);
            }
        }
    }
}

enum SourceKind {
    /// Real content with a line index; locations are interior positions.
    Indexed { line_index: LineIndex },
    /// Synthesized content; every interior span reports this one location.
    Fixed { location: FileLocation },
}

struct SourceEntry {
    name: String,
    content: String,
    base: u32,
    kind: SourceKind,
}

/// See module docs. The range lookup keys by range *end*: `lower_bound` on
/// the query end finds the only candidate, which is then checked to
/// contain the query start.
pub struct SourceMap {
    entries: Vec<SourceEntry>,
    // range end -> (range start, entry index)
    by_end: BTreeMap<u32, (u32, u32)>,
    next_offset: u32,
}

const BUILTIN_CONTENT: &str = "True False";

impl SourceMap {
    pub fn new() -> Self {
        let mut map = Self {
            entries: Vec::new(),
            by_end: BTreeMap::new(),
            // Offset 0 stays unused so that Span::dummy() never resolves.
            next_offset: 1,
        };
        let loc = FileLocation {
            file: "(builtin)".to_string(),
            range: LineColumnRange::default(),
        };
        map.add_fixed("(builtin)", BUILTIN_CONTENT.to_string(), loc);
        map
    }

    /// Span of the canonical `True` literal, for synthesized booleans.
    pub fn true_span(&self) -> Span {
        let base = self.entries[0].base;
        Span::new(base, base + 4)
    }

    /// Span of the canonical `False` literal.
    pub fn false_span(&self) -> Span {
        let base = self.entries[0].base;
        Span::new(base + 5, base + 10)
    }

    fn register(&mut self, name: String, content: String, kind: SourceKind) -> SourceId {
        let base = self.next_offset;
        let len = content.len() as u32;
        self.next_offset = base + len + 1; // +1 keeps even empty blobs disjoint
        let idx = self.entries.len() as u32;
        self.by_end.insert(base + len, (base, idx));
        self.entries.push(SourceEntry {
            name,
            content,
            base,
            kind,
        });
        SourceId(idx)
    }

    /// Register file-like content. The line index starts empty; the scanner
    /// fills it while tokenizing.
    pub fn add_file(&mut self, name: impl Into<String>, content: String) -> SourceId {
        self.register(
            name.into(),
            content,
            SourceKind::Indexed {
                line_index: LineIndex::default(),
            },
        )
    }

    /// Register synthesized content whose location is wherever the
    /// producing operation was. Returns the span of the whole blob;
    /// callers slice it further if the blob packs several strings.
    pub fn add_synthetic(&mut self, content: String, produced_at: FileLocation) -> Span {
        let id = self.add_fixed("(evaluated)", content, produced_at);
        self.span_of(id)
    }

    fn add_fixed(&mut self, name: &str, content: String, location: FileLocation) -> SourceId {
        self.register(name.to_string(), content, SourceKind::Fixed { location })
    }

    /// Full span of a registered source.
    pub fn span_of(&self, id: SourceId) -> Span {
        let e = &self.entries[id.0 as usize];
        Span::new(e.base, e.base + e.content.len() as u32)
    }

    pub fn name_of(&self, id: SourceId) -> &str {
        &self.entries[id.0 as usize].name
    }

    pub fn content_of(&self, id: SourceId) -> &str {
        &self.entries[id.0 as usize].content
    }

    /// Content, base offset and mutable line index of a file source, for
    /// the scanner. Panics on fixed sources; only files get scanned.
    pub fn scan_parts(&mut self, id: SourceId) -> (&str, u32, &mut LineIndex) {
        let e = &mut self.entries[id.0 as usize];
        match &mut e.kind {
            SourceKind::Indexed { line_index } => (&e.content, e.base, line_index),
            SourceKind::Fixed { .. } => panic!("scan_parts() on fixed source"),
        }
    }

    fn entry_for(&self, span: Span) -> Option<&SourceEntry> {
        if span.is_dummy() {
            return None;
        }
        let (_, (start, idx)) = self.by_end.range(span.end..).next()?;
        if *start > span.start {
            return None;
        }
        let entry = &self.entries[*idx as usize];
        (span.end <= entry.base + entry.content.len() as u32).then_some(entry)
    }

    /// Text a span points at; empty for the dummy span or unknown ranges.
    pub fn text(&self, span: Span) -> &str {
        match self.entry_for(span) {
            Some(e) => {
                let from = (span.start - e.base) as usize;
                let to = (span.end - e.base) as usize;
                &e.content[from..to]
            }
            None => "",
        }
    }

    /// Where a span comes from: interior position for file content, the
    /// producing operation's location for synthesized content.
    pub fn location(&self, span: Span) -> Option<FileLocation> {
        let e = self.entry_for(span)?;
        match &e.kind {
            SourceKind::Indexed { line_index } => {
                if line_index.is_empty() {
                    return None; // never scanned, nothing to report
                }
                Some(FileLocation {
                    file: e.name.clone(),
                    range: line_index.range(span.start - e.base, span.end - e.base),
                })
            }
            SourceKind::Fixed { location } => Some(location.clone()),
        }
    }

    /// Diagnostic prefix `file:line:col:` for a span, with a fallback for
    /// spans the map does not know about.
    pub fn loc(&self, span: Span) -> String {
        match self.location(span) {
            Some(loc) => loc.to_string(),
            None => "(unknown):0:0:".to_string(),
        }
    }

    /// The full source line containing the start of `span`, for file
    /// sources. Used e.g. to honor `# keep` comments on dependency lines.
    pub fn surrounding_line(&self, span: Span) -> Option<&str> {
        let e = self.entry_for(span)?;
        let offset = (span.start - e.base) as usize;
        let begin = e.content[..offset].rfind('\n').map_or(0, |p| p + 1);
        let end = e.content[offset..]
            .find('\n')
            .map_or(e.content.len(), |p| offset + p);
        Some(&e.content[begin..end])
    }
}

impl Default for SourceMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_index_positions() {
        let mut index = LineIndex::default();
        index.initialize_from("hello\nworld\n\nlast");
        assert_eq!(index.position(0), LineColumn { line: 0, col: 0 });
        assert_eq!(index.position(5), LineColumn { line: 0, col: 5 });
        assert_eq!(index.position(6), LineColumn { line: 1, col: 0 });
        assert_eq!(index.position(12), LineColumn { line: 2, col: 0 });
        assert_eq!(index.position(14), LineColumn { line: 3, col: 1 });
    }

    #[test]
    fn text_of_subspan() {
        let mut map = SourceMap::new();
        let id = map.add_file("f", "abc def".to_string());
        let all = map.span_of(id);
        assert_eq!(map.text(all), "abc def");
        assert_eq!(map.text(all.slice(4, 7)), "def");
        assert_eq!(map.text(Span::dummy()), "");
    }

    #[test]
    fn lookup_needs_containing_range() {
        let mut map = SourceMap::new();
        let id_a = map.add_file("a", "aaaa".to_string());
        let id_b = map.add_file("b", "bbbb".to_string());
        let a = map.span_of(id_a);
        let b = map.span_of(id_b);
        // A range straddling two sources resolves to neither.
        let straddle = Span::new(a.start + 2, b.start + 2);
        assert_eq!(map.text(straddle), "");
        assert!(map.location(straddle).is_none());
    }

    #[test]
    fn synthetic_reports_fixed_location() {
        let mut map = SourceMap::new();
        let at = FileLocation {
            file: "pkg/BUILD".to_string(),
            range: LineColumnRange {
                start: LineColumn { line: 3, col: 7 },
                end: LineColumn { line: 3, col: 8 },
            },
        };
        let span = map.add_synthetic("assembled".to_string(), at.clone());
        assert_eq!(map.text(span), "assembled");
        // Any interior sub-span reports the producing operation.
        assert_eq!(map.location(span.slice(2, 5)), Some(at));
        assert_eq!(map.loc(span), "pkg/BUILD:4:8:");
    }

    #[test]
    fn builtin_true_false() {
        let map = SourceMap::new();
        assert_eq!(map.text(map.true_span()), "True");
        assert_eq!(map.text(map.false_span()), "False");
    }

    #[test]
    fn surrounding_line_of_span() {
        let mut map = SourceMap::new();
        let id = map.add_file("f", "first\n  \"dep\",  # keep\nlast".to_string());
        let all = map.span_of(id);
        let dep = all.slice(9, 12);
        assert_eq!(map.text(dep), "dep");
        assert_eq!(map.surrounding_line(dep), Some("  \"dep\",  # keep"));
    }
}
