//! Edit operations on targets, delivered to whoever writes the edit
//! script. The core only decides *what* to change; rendering (e.g. as
//! buildozer commands) is the caller's business.

use girder_parser::Span;

use crate::label::Target;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditKind {
    Remove,
    Add,
    Rename,
}

/// One mechanical edit of a target's `deps`. `Remove` has `before` set,
/// `Add` has `after`, `Rename` both. `span` points at the original
/// occurrence where there is one, so sinks can report locations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edit {
    pub kind: EditKind,
    pub target: Target,
    pub before: String,
    pub after: String,
    pub span: Span,
}

pub trait EditSink {
    fn emit(&mut self, edit: Edit);
}

/// Collecting sink for tests and for counting.
impl EditSink for Vec<Edit> {
    fn emit(&mut self, edit: Edit) {
        self.push(edit);
    }
}

/// Wrapper counting how many edits pass through, which ultimately
/// drives the process exit code.
pub struct CountingSink<'a> {
    inner: &'a mut dyn EditSink,
    count: usize,
}

impl<'a> CountingSink<'a> {
    pub fn new(inner: &'a mut dyn EditSink) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

impl EditSink for CountingSink<'_> {
    fn emit(&mut self, edit: Edit) {
        self.count += 1;
        self.inner.emit(edit);
    }
}
