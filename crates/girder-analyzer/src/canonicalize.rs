//! Emit rename edits for dependency strings that are not in canonical
//! form relative to their package. Purely syntactic over elaborated
//! files.


use crate::edit::{Edit, EditKind, EditSink};
use crate::label::Target;
use crate::pattern::TargetMatcher;
use crate::project::Project;
use crate::query;
use crate::session::Session;

/// Returns the number of rename edits emitted.
pub fn create_canonicalize_edits(
    session: &mut Session,
    project: &Project,
    pattern: &dyn TargetMatcher,
    sink: &mut dyn EditSink,
) -> usize {
    let mut edit_count = 0;
    let timer = std::time::Instant::now();
    let mut checked = 0usize;

    for (package, parsed) in project.parsed_files() {
        if !pattern.matches_package(package) {
            continue;
        }
        let Some(ast) = parsed.ast else { continue };
        let mut edits: Vec<Edit> = Vec::new();
        let mut invalid: Vec<query::SpannedStr> = Vec::new();
        query::find_rules(
            project.arena(),
            project.sources(),
            ast,
            &[],
            &mut |rule| {
                let Some(this_target) = package.qualified_target(&rule.name.text) else {
                    return;
                };
                if !pattern.matches_target(&this_target) {
                    return;
                }
                for dep in query::extract_string_list(project.arena(), project.sources(), rule.deps)
                {
                    checked += 1;
                    let Some(dep_target) = Target::parse(&dep.text, package) else {
                        invalid.push(dep);
                        continue;
                    };
                    let canonical = dep_target.to_string_relative_to(package);
                    if dep.text != canonical {
                        edits.push(Edit {
                            kind: EditKind::Rename,
                            target: this_target.clone(),
                            before: dep.text.clone(),
                            after: canonical,
                            span: dep.span,
                        });
                    }
                }
            },
        );
        for dep in invalid {
            let _ = writeln!(
                session.info(),
                "{} Invalid target name '{}'",
                project.loc(dep.span),
                dep.text
            );
        }
        for edit in edits {
            edit_count += 1;
            sink.emit(edit);
        }
    }

    let stats = session.stats_for("Canonicalization checked", "dependencies");
    stats.count += checked;
    stats.duration += timer.elapsed();
    edit_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Pattern;
    use crate::project::testutil::TestProject;
    use crate::session::Flags;

    fn canonicalize(tp: &TestProject, pattern: &str) -> Vec<(String, String)> {
        let pattern = Pattern::parse(pattern).unwrap();
        let mut out = Vec::new();
        let mut info = Vec::new();
        let mut session = Session::new(&mut out, &mut info, Flags::default());
        let mut edits: Vec<Edit> = Vec::new();
        create_canonicalize_edits(&mut session, tp.project(), &pattern, &mut edits);
        edits
            .into_iter()
            .map(|e| (e.before, e.after))
            .collect()
    }

    #[test]
    fn shortening_to_canonical_forms() {
        let mut tp = TestProject::new();
        tp.add(
            "//some/path",
            r#"
cc_library(
    name = "foo",
    deps = [
        "//some/path:bar",
        "baz",
        "//flubber:flubber",
        "@//other/package:qux",
        "@foo//:foo",
    ],
)
"#,
        );
        let edits = canonicalize(&tp, "//...");
        assert_eq!(
            edits,
            vec![
                ("//some/path:bar".to_string(), ":bar".to_string()),
                ("baz".to_string(), ":baz".to_string()),
                ("//flubber:flubber".to_string(), "//flubber".to_string()),
                (
                    "@//other/package:qux".to_string(),
                    "//other/package:qux".to_string()
                ),
                ("@foo//:foo".to_string(), "@foo".to_string()),
            ]
        );
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let mut tp = TestProject::new();
        tp.add(
            "//some/path",
            r#"
cc_library(
    name = "foo",
    deps = [
        ":bar",
        ":baz",
        "//flubber",
        "//other/package:qux",
        "@foo",
    ],
)
"#,
        );
        assert!(canonicalize(&tp, "//...").is_empty());
    }
}
