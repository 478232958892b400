//! The opaque row sink commands push their results into. Rendering
//! (aligned text, s-expression, plist, JSON, CSV) lives outside the
//! core, next to the CLI.

pub trait TableSink {
    fn add_row(&mut self, cells: &[String]);

    /// A row whose last column repeats: plain formats print one full row
    /// per repeated value, structured formats a nested collection.
    fn add_row_with_repeated_last_column(&mut self, prefix: &[String], repeat: &[String]);

    fn finish(&mut self);
}
