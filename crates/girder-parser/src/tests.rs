//! Parser tests. Every parse round-trips: print the result, parse the
//! print, print again, and require identical output.

use pretty_assertions::assert_eq;

use crate::{NodeArena, NodeId, Parser, Printer, Scanner, SourceMap};

struct Parsed {
    arena: NodeArena,
    sources: SourceMap,
    errors: Vec<crate::ParseError>,
    top: NodeId,
}

impl Parsed {
    fn statements(&self) -> String {
        Printer::new(&self.arena, &self.sources).print_statements(self.top)
    }
}

fn parse(input: &str) -> Parsed {
    let parsed = parse_no_roundtrip(input);
    // Round-trip: reprint of a reparse of the print must match the print.
    let first_print = parsed.statements();
    let second = parse_no_roundtrip(&first_print);
    assert_eq!(first_print, second.statements(), "round-trip");
    parsed
}

fn parse_no_roundtrip(input: &str) -> Parsed {
    let mut sources = SourceMap::new();
    let mut arena = NodeArena::new();
    let id = sources.add_file("<text>", input.to_string());
    let (content, base, line_index) = sources.scan_parts(id);
    let mut scanner = Scanner::new(content, base, line_index);
    let mut parser = Parser::new(&mut scanner, &mut arena);
    let top = parser.parse();
    let errors = parser.into_errors();
    Parsed {
        arena,
        sources,
        errors,
        top,
    }
}

fn statements_of(input: &str) -> String {
    let parsed = parse(input);
    assert!(parsed.errors.is_empty(), "unexpected: {:?}", parsed.errors);
    parsed.statements()
}

#[test]
fn parse_empty() {
    assert_eq!(statements_of(""), "");
    assert_eq!(statements_of("# just a comment with newline\n"), "");
    assert_eq!(statements_of("# just a comment without newline"), "");
}

#[test]
fn int_literal_conversion() {
    use crate::int_from_literal;
    assert_eq!(int_from_literal("0o123"), Some(0o123));
    assert_eq!(int_from_literal("0xabc"), Some(0xabc));
    assert_eq!(int_from_literal("42"), Some(42));
    assert_eq!(int_from_literal("True"), Some(1));
    assert_eq!(int_from_literal("False"), Some(0));
    assert_eq!(int_from_literal("3.5"), None);
}

#[test]
fn string_flavors() {
    let out = statements_of(
        r#"
foo = "regular_string"
backslash = "\\"
bar = r"raw_string"
baz = """triple quoted"""
quux = R"""raw triple quoted"""
"#,
    );
    assert_eq!(
        out,
        "foo = \"regular_string\"\n\
         backslash = \"\\\\\"\n\
         bar = r\"raw_string\"\n\
         baz = \"\"\"triple quoted\"\"\"\n\
         quux = r\"\"\"raw triple quoted\"\"\"\n"
    );
}

#[test]
fn simple_rule_call() {
    let out = statements_of(
        r#"
cc_library(
    name = "foo",
    srcs = ["a.cc", "b.cc"],
)
"#,
    );
    expect_test::expect![[r#"
        cc_library(
            name = "foo",
            srcs = [
                "a.cc",
                "b.cc"
            ]
        )
    "#]]
    .assert_eq(&out);
}

#[test]
fn expression_precedence() {
    // Stronger `*` binds below `+`; parenthesized re-print keeps shape.
    assert_eq!(statements_of("x = 1 + 2 * 3"), "x = 1 + 2 * 3\n");
    assert_eq!(statements_of("x = (1 + 2) * 3"), "x = 1 + 2 * 3\n");
    // (parens are not preserved; the tree shape is what round-trips)
    let p1 = parse("x = 1 + 2 * 3");
    let p2 = parse("x = 1 + (2 * 3)");
    assert_eq!(p1.statements(), p2.statements());
}

#[test]
fn comparison_and_membership() {
    assert_eq!(
        statements_of("x = \"a\" in deps and 3 <= 4"),
        "x = \"a\" in deps and 3 <= 4\n"
    );
    assert_eq!(statements_of("x = a not in b"), "x = a not in b\n");
}

#[test]
fn tuple_assignments() {
    // Toplevel unpack without parens is the same as a tuple assignment.
    let with_parens = statements_of("(a, b) = (1, 2)");
    let without = statements_of("a, b = (1, 2)");
    assert_eq!(with_parens, without);
    assert_eq!(
        with_parens,
        "(\n    a,\n    b\n) = (\n    1,\n    2\n)\n"
    );
}

#[test]
fn one_element_tuple_keeps_comma() {
    assert_eq!(statements_of("x = (\"a\",)"), "x = (\"a\",)\n");
}

#[test]
fn maps_and_nested_lists() {
    let out = statements_of("m = { \"k\" : 1, \"l\" : [2, 3] }");
    assert_eq!(
        out,
        "m = {\n    \"k\" : 1,\n    \"l\" : [\n        2,\n        3\n    ]\n}\n"
    );
}

#[test]
fn array_access_and_slices() {
    assert_eq!(statements_of("x = y[0]"), "x = y[0]\n");
    assert_eq!(statements_of("x = y[1:2]"), "x = y[1 : 2]\n");
    assert_eq!(statements_of("x = y[:2]"), "x = y[ : 2]\n");
    assert_eq!(statements_of("x = y[1:]"), "x = y[1 : ]\n");
    assert_eq!(statements_of("x = y[0][1]"), "x = y[0][1]\n");
}

#[test]
fn array_access_stops_at_newline() {
    // The `[` on the next line starts a new toplevel construct instead of
    // continuing the access chain.
    let out = statements_of("x = y[0]\n[\"toplevel\"]");
    assert_eq!(out, "x = y[0]\n[\"toplevel\"]\n");
}

#[test]
fn ternary() {
    assert_eq!(
        statements_of("x = \"a\" if cond else \"b\""),
        "x = \"a\" if cond else \"b\"\n"
    );
}

#[test]
fn method_call_on_string() {
    assert_eq!(
        statements_of("x = \"{}\".format(\"a\")"),
        "x = \"{}\".format(\"a\")\n"
    );
}

#[test]
fn list_comprehension() {
    assert_eq!(
        statements_of("x = [i for i in [1, 2]]"),
        "x = [i for (i,) in [\n    1,\n    2\n]]\n"
    );
    assert_eq!(
        statements_of("x = [i for (i, j) in pairs]"),
        "x = [i for (i, j) in pairs]\n"
    );
}

#[test]
fn nested_for_comprehension() {
    // Left-recursive: the outer for-binop holds the last loop.
    assert_eq!(
        statements_of("x = [i for i in [1] for j in [2]]"),
        "x = [i for (i,) in [1] for (j,) in [2]]\n"
    );
}

#[test]
fn toplevel_bare_list_and_docstring() {
    let out = statements_of("\"\"\"docstring is ignored\"\"\"\n[a(), b()]");
    assert_eq!(out, "[\n    a(),\n    b()\n]\n");
}

#[test]
fn def_blocks_are_skipped() {
    let out = statements_of("def helper(x):\n  return x\nvalue = 42\n");
    assert_eq!(out, "value = 42\n");
}

#[test]
fn unary_operators() {
    assert_eq!(statements_of("x = -5"), "x = -5\n");
    assert_eq!(statements_of("x = not y"), "x = not y\n");
}

#[test]
fn true_false_become_ints() {
    let parsed = parse("x = True\ny = False");
    assert!(parsed.errors.is_empty());
    // Printed representation keeps the literal text.
    assert_eq!(parsed.statements(), "x = True\ny = False\n");
}

#[test]
fn dotted_toplevel_call() {
    assert_eq!(
        statements_of("foo.bar(name = \"x\")"),
        "foo.bar(name = \"x\")\n"
    );
}

#[test]
fn error_recovers_at_next_statement() {
    let parsed = parse_no_roundtrip("garbage = = 2\nok = 3\n");
    assert_eq!(parsed.errors.len(), 1);
    assert!(parsed.errors[0].message.contains("got '='"));
    // The statement after the broken one still parses.
    assert!(parsed.statements().contains("ok = 3"));
}

#[test]
fn error_reports_location() {
    let parsed = parse_no_roundtrip("x = )\n");
    assert_eq!(parsed.errors.len(), 1);
    let loc = parsed.sources.loc(parsed.errors[0].span);
    assert_eq!(loc, "<text>:1:5:");
}

#[test]
fn unterminated_list_is_reported() {
    let parsed = parse_no_roundtrip("x = [1, 2\n");
    assert!(!parsed.errors.is_empty());
}

#[test]
fn node_spans_resolve_to_source() {
    let parsed = parse("lib = \"name\"");
    let crate::Node::List { items, .. } = parsed.arena.get(parsed.top) else {
        panic!("expected list");
    };
    let (_, rhs) = parsed.arena.assignment(items[0]).unwrap();
    let span = parsed.arena.string_span(rhs.unwrap()).unwrap();
    assert_eq!(parsed.sources.text(span), "name");
    let loc = parsed.sources.location(span).unwrap();
    assert_eq!(loc.range.start.line, 0);
    assert_eq!(loc.range.start.col, 7);
}
