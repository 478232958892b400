//! Compile `glob()` include/exclude patterns into match predicates.
//!
//! Patterns without wildcards become verbatim set lookups; the rest are
//! compiled to one alternation regex (`**/` spans directories, `*` stays
//! within one path element). A second, derived matcher decides which
//! directories are worth descending into at all, so a pattern like
//! `abc/*.xyz` never walks unrelated subtrees.

use crate::collections::HashSet;
use regex::Regex;
use std::collections::BTreeSet;

#[derive(Default)]
pub struct GlobMatchBuilder {
    include_patterns: BTreeSet<String>,
    exclude_patterns: BTreeSet<String>,
}

/// Delegates to direct set matches or a regex, depending on pattern.
pub struct PathMatcher {
    pattern_re: Option<Regex>,
    verbatim: HashSet<String>,
}

impl PathMatcher {
    pub fn matches(&self, s: &str) -> bool {
        self.verbatim.contains(s) || self.pattern_re.as_ref().is_some_and(|re| re.is_match(s))
    }
}

fn file_pattern_to_regex(pattern: &str) -> String {
    // Quote everything, then unquote the wildcards back.
    regex::escape(pattern)
        .replace("\\*\\*/", ".*/?")
        .replace("\\*", "[^/]*")
}

fn build_filename_matcher(patterns: &BTreeSet<String>) -> PathMatcher {
    let mut alternation = Vec::new();
    let mut verbatim = HashSet::default();
    for pattern in patterns {
        if pattern.contains('*') {
            alternation.push(file_pattern_to_regex(pattern));
        } else {
            verbatim.insert(pattern.clone()); // simple and fast
        }
    }
    PathMatcher {
        pattern_re: compile_alternation(&alternation),
        verbatim,
    }
}

fn compile_alternation(parts: &[String]) -> Option<Regex> {
    if parts.is_empty() {
        return None;
    }
    Regex::new(&format!("^(?:{})$", parts.join("|"))).ok()
}

fn build_directory_matcher(patterns: &BTreeSet<String>) -> PathMatcher {
    let mut alternation = BTreeSet::new();
    let mut verbatim = HashSet::default();
    for pattern in patterns {
        let Some(last_slash) = pattern.rfind('/') else {
            verbatim.insert(String::new());
            continue;
        };
        let dir_part = &pattern[..last_slash];
        if dir_part.contains('*') {
            // Directory walks see prefixes of the full path, so
            // `foo/bar/baz` must match as foo(/bar(/baz)?)?. Convert the
            // pattern, then make every path element optional.
            let mut dir_pattern = regex::escape(dir_part)
                .replace("\\*\\*", ".*/?")
                .replace("\\*", "[^/]*");
            let groups = dir_pattern.matches('/').count();
            dir_pattern = dir_pattern.replace('/', "(/");
            for _ in 0..groups {
                dir_pattern.push_str(")?");
            }
            alternation.insert(dir_pattern);
        } else {
            // All prefixes of the literal directory path match.
            let mut pos = 0;
            while let Some(next) = dir_part[pos..].find('/') {
                verbatim.insert(dir_part[..pos + next].to_string());
                pos += next + 1;
            }
            verbatim.insert(dir_part.to_string());
        }
    }
    let alternation: Vec<String> = alternation.into_iter().collect();
    PathMatcher {
        pattern_re: compile_alternation(&alternation),
        verbatim,
    }
}

impl GlobMatchBuilder {
    pub fn add_include_pattern(&mut self, pattern: &str) {
        self.include_patterns.insert(pattern.to_string());
    }

    pub fn add_exclude_pattern(&mut self, pattern: &str) {
        self.exclude_patterns.insert(pattern.to_string());
    }

    /// Predicate for files, relative to the glob root.
    pub fn build_file_match_predicate(&self) -> impl Fn(&str) -> bool {
        let include = build_filename_matcher(&self.include_patterns);
        let exclude = build_filename_matcher(&self.exclude_patterns);
        move |s: &str| include.matches(s) && !exclude.matches(s)
    }

    /// Predicate for directories worth descending into.
    pub fn build_directory_match_predicate(&self) -> impl Fn(&str) -> bool {
        let matcher = build_directory_matcher(&self.include_patterns);
        move |s: &str| matcher.matches(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_matcher(includes: &[&str], excludes: &[&str]) -> impl Fn(&str) -> bool {
        let mut builder = GlobMatchBuilder::default();
        for i in includes {
            builder.add_include_pattern(i);
        }
        for e in excludes {
            builder.add_exclude_pattern(e);
        }
        builder.build_file_match_predicate()
    }

    fn dir_matcher(includes: &[&str]) -> impl Fn(&str) -> bool {
        let mut builder = GlobMatchBuilder::default();
        for i in includes {
            builder.add_include_pattern(i);
        }
        builder.build_directory_match_predicate()
    }

    #[test]
    fn verbatim_matches() {
        let m = file_matcher(&["foo.txt"], &[]);
        assert!(m("foo.txt"));
        assert!(!m("bar.txt"));
        assert!(!m("sub/foo.txt"));
    }

    #[test]
    fn star_stays_within_path_element() {
        let m = file_matcher(&["*.txt"], &[]);
        assert!(m("foo.txt"));
        assert!(!m("sub/foo.txt"));

        let m = file_matcher(&["sub/*.txt"], &[]);
        assert!(m("sub/foo.txt"));
        assert!(!m("sub/deep/foo.txt"));
        assert!(!m("foo.txt"));
    }

    #[test]
    fn doublestar_spans_directories() {
        let m = file_matcher(&["**/*.xyz"], &[]);
        assert!(m("foo.xyz"));
        assert!(m("abc/foo.xyz"));
        assert!(m("a/b/c/foo.xyz"));
        assert!(!m("foo.txt"));
    }

    #[test]
    fn exclude_wins() {
        let m = file_matcher(&["*.cc"], &["*_test.cc"]);
        assert!(m("foo.cc"));
        assert!(!m("foo_test.cc"));
    }

    #[test]
    fn star_in_middle() {
        let m = file_matcher(&["ab*cd.h"], &[]);
        assert!(m("abcd.h"));
        assert!(m("ab-x-cd.h"));
        assert!(!m("ab/cd.h"));
    }

    #[test]
    fn directory_matcher_prunes_unrelated() {
        let d = dir_matcher(&["abc/*.xyz"]);
        assert!(d("abc"));
        assert!(!d("def"));

        // Toplevel-only pattern: no directory needs descending.
        let d = dir_matcher(&["*.txt"]);
        assert!(d("")); // the root itself
        assert!(!d("sub"));
    }

    #[test]
    fn directory_matcher_matches_prefixes() {
        let d = dir_matcher(&["a/b/c/*.h"]);
        assert!(d("a"));
        assert!(d("a/b"));
        assert!(d("a/b/c"));
        assert!(!d("a/x"));
        assert!(!d("b"));
    }

    #[test]
    fn directory_matcher_with_doublestar() {
        let d = dir_matcher(&["**/*.xyz"]);
        assert!(d("anything"));
        assert!(d("any/depth"));
    }
}
