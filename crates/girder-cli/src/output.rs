//! Table-sink implementations (aligned text, s-expression, plist, JSON,
//! CSV, graphviz) and the buildozer edit-script writer.

use std::io::Write;

use girder_analyzer::edit::EditSink;
use girder_analyzer::{Edit, EditKind, OutputFormat, TableSink};
use regex::Regex;

/// One logical row: fixed prefix cells plus the (possibly repeated)
/// values of the last column.
struct Row {
    prefix: Vec<String>,
    repeat: Vec<String>,
}

fn to_row(cells: &[String]) -> Row {
    let (last, prefix) = cells.split_last().expect("non-empty row");
    Row {
        prefix: prefix.to_vec(),
        repeat: vec![last.clone()],
    }
}

/// Space-aligned plain text, one full line per repeated value.
struct AlignedTextSink<'a> {
    out: &'a mut dyn Write,
    rows: Vec<Row>,
}

impl TableSink for AlignedTextSink<'_> {
    fn add_row(&mut self, cells: &[String]) {
        self.rows.push(to_row(cells));
    }

    fn add_row_with_repeated_last_column(&mut self, prefix: &[String], repeat: &[String]) {
        self.rows.push(Row {
            prefix: prefix.to_vec(),
            repeat: repeat.to_vec(),
        });
    }

    fn finish(&mut self) {
        let mut widths: Vec<usize> = Vec::new();
        for row in &self.rows {
            for (i, cell) in row.prefix.iter().enumerate() {
                if widths.len() <= i {
                    widths.resize(i + 1, 0);
                }
                widths[i] = widths[i].max(cell.len());
            }
        }
        for row in &self.rows {
            for value in &row.repeat {
                let mut line = String::new();
                for (i, cell) in row.prefix.iter().enumerate() {
                    line.push_str(&format!("{cell:<width$} ", width = widths[i]));
                }
                line.push_str(value);
                let _ = writeln!(self.out, "{line}");
            }
        }
    }
}

struct CsvSink<'a> {
    out: &'a mut dyn Write,
    headers: Vec<String>,
    header_written: bool,
}

fn csv_quote(cell: &str) -> String {
    if cell.contains(',') || cell.contains('"') || cell.contains('\n') {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_string()
    }
}

impl CsvSink<'_> {
    fn write_line(&mut self, cells: &[String]) {
        if !self.header_written {
            self.header_written = true;
            let headers = self.headers.clone();
            self.write_line(&headers);
        }
        let line: Vec<String> = cells.iter().map(|c| csv_quote(c)).collect();
        let _ = writeln!(self.out, "{}", line.join(","));
    }
}

impl TableSink for CsvSink<'_> {
    fn add_row(&mut self, cells: &[String]) {
        self.write_line(cells);
    }

    fn add_row_with_repeated_last_column(&mut self, prefix: &[String], repeat: &[String]) {
        for value in repeat {
            let mut cells = prefix.to_vec();
            cells.push(value.clone());
            self.write_line(&cells);
        }
    }

    fn finish(&mut self) {}
}

/// JSON array of objects keyed by the header names; a repeated last
/// column becomes an array value.
struct JsonSink<'a> {
    out: &'a mut dyn Write,
    headers: Vec<String>,
    rows: Vec<serde_json::Value>,
}

impl JsonSink<'_> {
    fn object(&self, prefix: &[String], last: serde_json::Value) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for (header, cell) in self.headers.iter().zip(prefix) {
            object.insert(header.clone(), serde_json::Value::String(cell.clone()));
        }
        if let Some(last_header) = self.headers.last() {
            object.insert(last_header.clone(), last);
        }
        serde_json::Value::Object(object)
    }
}

impl TableSink for JsonSink<'_> {
    fn add_row(&mut self, cells: &[String]) {
        let row = to_row(cells);
        let value = serde_json::Value::String(row.repeat[0].clone());
        let object = self.object(&row.prefix, value);
        self.rows.push(object);
    }

    fn add_row_with_repeated_last_column(&mut self, prefix: &[String], repeat: &[String]) {
        let value = serde_json::Value::Array(
            repeat
                .iter()
                .map(|v| serde_json::Value::String(v.clone()))
                .collect(),
        );
        let object = self.object(prefix, value);
        self.rows.push(object);
    }

    fn finish(&mut self) {
        if let Ok(json) = serde_json::to_string_pretty(&self.rows) {
            let _ = writeln!(self.out, "{json}");
        }
    }
}

fn lisp_quote(cell: &str) -> String {
    format!("\"{}\"", cell.replace('\\', "\\\\").replace('"', "\\\""))
}

/// `(("a" "b") ("c" ("d" "e")))`
struct SExprSink<'a> {
    out: &'a mut dyn Write,
    opened: bool,
}

impl SExprSink<'_> {
    fn open_once(&mut self) {
        if !self.opened {
            self.opened = true;
            let _ = writeln!(self.out, "(");
        }
    }
}

impl TableSink for SExprSink<'_> {
    fn add_row(&mut self, cells: &[String]) {
        self.open_once();
        let cells: Vec<String> = cells.iter().map(|c| lisp_quote(c)).collect();
        let _ = writeln!(self.out, " ({})", cells.join(" "));
    }

    fn add_row_with_repeated_last_column(&mut self, prefix: &[String], repeat: &[String]) {
        self.open_once();
        let prefix: Vec<String> = prefix.iter().map(|c| lisp_quote(c)).collect();
        let repeat: Vec<String> = repeat.iter().map(|c| lisp_quote(c)).collect();
        let _ = writeln!(self.out, " ({} ({}))", prefix.join(" "), repeat.join(" "));
    }

    fn finish(&mut self) {
        if self.opened {
            let _ = writeln!(self.out, ")");
        }
    }
}

/// `((:header "value" ...) ...)`
struct PListSink<'a> {
    out: &'a mut dyn Write,
    headers: Vec<String>,
    opened: bool,
}

impl PListSink<'_> {
    fn open_once(&mut self) {
        if !self.opened {
            self.opened = true;
            let _ = writeln!(self.out, "(");
        }
    }

    fn write_pairs(&mut self, prefix: &[String], last: String) {
        self.open_once();
        let mut pairs = Vec::new();
        for (header, cell) in self.headers.iter().zip(prefix) {
            pairs.push(format!(":{header} {}", lisp_quote(cell)));
        }
        if let Some(last_header) = self.headers.last() {
            pairs.push(format!(":{last_header} {last}"));
        }
        let _ = writeln!(self.out, " ({})", pairs.join(" "));
    }
}

impl TableSink for PListSink<'_> {
    fn add_row(&mut self, cells: &[String]) {
        let row = to_row(cells);
        self.write_pairs(&row.prefix, lisp_quote(&row.repeat[0]));
    }

    fn add_row_with_repeated_last_column(&mut self, prefix: &[String], repeat: &[String]) {
        let repeated: Vec<String> = repeat.iter().map(|c| lisp_quote(c)).collect();
        self.write_pairs(prefix, format!("({})", repeated.join(" ")));
    }

    fn finish(&mut self) {
        if self.opened {
            let _ = writeln!(self.out, ")");
        }
    }
}

/// Two-column tables as a digraph; everything else degrades to edges
/// from the first column.
struct GraphvizSink<'a> {
    out: &'a mut dyn Write,
    edges: Vec<(String, String)>,
}

impl TableSink for GraphvizSink<'_> {
    fn add_row(&mut self, cells: &[String]) {
        let row = to_row(cells);
        if let Some(first) = row.prefix.first() {
            self.edges.push((first.clone(), row.repeat[0].clone()));
        }
    }

    fn add_row_with_repeated_last_column(&mut self, prefix: &[String], repeat: &[String]) {
        if let Some(first) = prefix.first() {
            for value in repeat {
                self.edges.push((first.clone(), value.clone()));
            }
        }
    }

    fn finish(&mut self) {
        let _ = writeln!(self.out, "digraph {{");
        for (from, to) in &self.edges {
            let _ = writeln!(self.out, "  \"{from}\" -> \"{to}\";");
        }
        let _ = writeln!(self.out, "}}");
    }
}

/// Create the sink matching the chosen output format. The number of
/// headers determines the column count.
pub fn make_table_sink<'a>(
    out: &'a mut dyn Write,
    format: OutputFormat,
    headers: &[&str],
) -> Box<dyn TableSink + 'a> {
    let headers: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    match format {
        OutputFormat::Native => Box::new(AlignedTextSink {
            out,
            rows: Vec::new(),
        }),
        OutputFormat::Csv => Box::new(CsvSink {
            out,
            headers,
            header_written: false,
        }),
        OutputFormat::Json => Box::new(JsonSink {
            out,
            headers,
            rows: Vec::new(),
        }),
        OutputFormat::SExpr => Box::new(SExprSink { out, opened: false }),
        OutputFormat::PList => Box::new(PListSink {
            out,
            headers,
            opened: false,
        }),
        OutputFormat::Graphviz => Box::new(GraphvizSink {
            out,
            edges: Vec::new(),
        }),
    }
}

/// Writes edits as buildozer commands, one shell-quoted line each:
///   buildozer 'remove deps <label>' <target>
///   buildozer 'add deps <label>' <target>
///   buildozer 'replace deps <before> <after>' <target>
/// With a grep regex, only matching lines are emitted.
pub struct BuildozerWriter<'a> {
    out: &'a mut dyn Write,
    grep: Option<Regex>,
}

impl<'a> BuildozerWriter<'a> {
    pub fn new(out: &'a mut dyn Write, grep: Option<Regex>) -> Self {
        Self { out, grep }
    }
}

impl EditSink for BuildozerWriter<'_> {
    fn emit(&mut self, edit: Edit) {
        let line = match edit.kind {
            EditKind::Remove => format!("'remove deps {}' {}", edit.before, edit.target),
            EditKind::Add => format!("'add deps {}' {}", edit.after, edit.target),
            EditKind::Rename => format!(
                "'replace deps {} {}' {}",
                edit.before, edit.after, edit.target
            ),
        };
        if self.grep.as_ref().is_some_and(|re| !re.is_match(&line)) {
            return;
        }
        let _ = writeln!(self.out, "buildozer {line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use girder_analyzer::{Package, Target};
    use pretty_assertions::assert_eq;

    #[test]
    fn aligned_text_pads_columns() {
        let mut out = Vec::new();
        {
            let mut sink = make_table_sink(&mut out, OutputFormat::Native, &["a", "b"]);
            sink.add_row(&["x".to_string(), "one".to_string()]);
            sink.add_row(&["longer".to_string(), "two".to_string()]);
            sink.finish();
        }
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "x      one\nlonger two\n"
        );
    }

    #[test]
    fn repeated_column_expands_in_plain_formats() {
        let mut out = Vec::new();
        {
            let mut sink = make_table_sink(&mut out, OutputFormat::Csv, &["lib", "dep"]);
            sink.add_row_with_repeated_last_column(
                &["//a".to_string()],
                &["//b".to_string(), "//c".to_string()],
            );
            sink.finish();
        }
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "lib,dep\n//a,//b\n//a,//c\n"
        );
    }

    #[test]
    fn json_repeats_as_array() {
        let mut out = Vec::new();
        {
            let mut sink = make_table_sink(&mut out, OutputFormat::Json, &["lib", "dep"]);
            sink.add_row_with_repeated_last_column(
                &["//a".to_string()],
                &["//b".to_string(), "//c".to_string()],
            );
            sink.finish();
        }
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value[0]["lib"], "//a");
        assert_eq!(value[0]["dep"][1], "//c");
    }

    #[test]
    fn sexpr_rows() {
        let mut out = Vec::new();
        {
            let mut sink = make_table_sink(&mut out, OutputFormat::SExpr, &["a", "b"]);
            sink.add_row(&["x".to_string(), "y".to_string()]);
            sink.finish();
        }
        assert_eq!(String::from_utf8(out).unwrap(), "(\n (\"x\" \"y\")\n)\n");
    }

    #[test]
    fn buildozer_lines() {
        let target = Target::parse("//lib:thing", &Package::default()).unwrap();
        let mut out = Vec::new();
        {
            let mut writer = BuildozerWriter::new(&mut out, None);
            writer.emit(Edit {
                kind: EditKind::Remove,
                target: target.clone(),
                before: ":unused".to_string(),
                after: String::new(),
                span: girder_parser::Span::dummy(),
            });
            writer.emit(Edit {
                kind: EditKind::Add,
                target: target.clone(),
                before: String::new(),
                after: ":needed".to_string(),
                span: girder_parser::Span::dummy(),
            });
            writer.emit(Edit {
                kind: EditKind::Rename,
                target,
                before: "//lib:thing2".to_string(),
                after: ":thing2".to_string(),
                span: girder_parser::Span::dummy(),
            });
        }
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "buildozer 'remove deps :unused' //lib:thing\n\
             buildozer 'add deps :needed' //lib:thing\n\
             buildozer 'replace deps //lib:thing2 :thing2' //lib:thing\n"
        );
    }
}
