//! Reverse alias map: which `alias()` rules point at a target.

use crate::collections::OneToN;
use crate::label::Target;
use crate::project::Project;
use crate::query;

pub fn extract_aliased_by(project: &Project) -> OneToN<Target, Target> {
    let mut aliased_by: OneToN<Target, Target> = OneToN::new();
    for (_, build_file) in project.parsed_files() {
        let Some(ast) = build_file.ast else { continue };
        query::find_rules(
            project.arena(),
            project.sources(),
            ast,
            &["alias"],
            &mut |rule| {
                let Some(actual) = &rule.actual else { return };
                let Some(alias) = Target::parse(&rule.name.text, &build_file.package) else {
                    return;
                };
                let Some(actual) = Target::parse(&actual.text, &build_file.package) else {
                    return;
                };
                aliased_by.entry(actual).or_default().push(alias);
            },
        );
    }
    aliased_by
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::testutil::TestProject;

    #[test]
    fn aliases_are_collected_reversed() {
        let mut tp = TestProject::new();
        tp.add(
            "//lib",
            r#"
cc_library(name = "impl")
alias(name = "public_name", actual = ":impl")
alias(name = "old_name", actual = ":impl")
"#,
        );
        let aliased_by = extract_aliased_by(tp.project());
        let actual = Target::parse("//lib:impl", &Default::default()).unwrap();
        let aliases: Vec<String> = aliased_by[&actual].iter().map(|t| t.to_string()).collect();
        assert_eq!(aliases, vec!["//lib:public_name", "//lib:old_name"]);
    }
}
