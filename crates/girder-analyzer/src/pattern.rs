//! Bazel patterns (`//foo/...`, `//foo:all`, `//foo:*bar*`) and the
//! visibility rules that ride on the same mechanism (`__pkg__`,
//! `__subpackages__`, `//visibility:{public,private}`).

use regex::Regex;

use crate::label::{Package, Target};

/// An oracle to ask whether targets or packages fall inside some pattern.
pub trait TargetMatcher {
    /// If false, nothing is filtered; match is unconditionally true.
    fn has_filter(&self) -> bool;
    fn matches_target(&self, target: &Target) -> bool;
    fn matches_package(&self, package: &Package) -> bool;
}

#[derive(Clone, Debug, PartialEq)]
enum MatchKind {
    Exact,
    TargetRegex,
    AllTargetsInPackage,
    Recursive,
    AlwaysMatch,
}

#[derive(Clone, Debug)]
pub struct Pattern {
    match_target: Target,
    kind: MatchKind,
    regex: Option<Regex>,
}

impl Default for Pattern {
    /// The default pattern matches anything.
    fn default() -> Self {
        Self {
            match_target: Target::default(),
            kind: MatchKind::AlwaysMatch,
            regex: None,
        }
    }
}

impl Pattern {
    pub fn parse(pattern: &str) -> Option<Pattern> {
        Self::parse_with_context(pattern, &Package::default())
    }

    /// Like [`Pattern::parse`], but with visibility-specific handling:
    /// `public` means no filter at all, `private` means
    /// context-package-only, and relative patterns resolve against the
    /// package declaring the visibility.
    pub fn parse_visibility(pattern: &str, context: &Package) -> Option<Pattern> {
        match pattern {
            "//visibility:public" => Some(Pattern::default()),
            "//visibility:private" => Some(Pattern {
                match_target: Target {
                    package: context.clone(),
                    name: String::new(),
                },
                kind: MatchKind::AllTargetsInPackage,
                regex: None,
            }),
            _ => Self::parse_with_context(pattern, context),
        }
    }

    fn parse_with_context(pattern: &str, context: &Package) -> Option<Pattern> {
        if pattern.is_empty() || pattern.ends_with('/') || pattern.ends_with(':') {
            return None;
        }

        if pattern == "..." || pattern == "//..." {
            return Some(Pattern {
                match_target: Target {
                    package: Package::new(context.project.clone(), ""),
                    name: String::new(),
                },
                kind: MatchKind::Recursive,
                regex: None,
            });
        }
        if let Some(prefix) = pattern.strip_suffix("/...") {
            let mut package = Package::parse(prefix)?;
            if package.project.is_empty() {
                package.project = context.project.clone();
            }
            return Some(Pattern {
                match_target: Target {
                    package,
                    name: String::new(),
                },
                kind: MatchKind::Recursive,
                regex: None,
            });
        }

        // Bare visibility forms relative to the context package.
        if pattern == "__subpackages__" || pattern == "__pkg__" {
            return Some(Pattern {
                match_target: Target {
                    package: context.clone(),
                    name: String::new(),
                },
                kind: if pattern == "__subpackages__" {
                    MatchKind::Recursive
                } else {
                    MatchKind::AllTargetsInPackage
                },
                regex: None,
            });
        }

        if let Some(colon) = pattern.rfind(':') {
            let (package_part, target_part) = (&pattern[..colon], &pattern[colon + 1..]);
            let package = if package_part.is_empty() {
                context.clone()
            } else {
                let mut p = Package::parse(package_part)?;
                if p.project.is_empty() {
                    p.project = context.project.clone();
                }
                p
            };
            let kind = match target_part {
                "all" | "*" | "__pkg__" => Some(MatchKind::AllTargetsInPackage),
                "__subpackages__" => Some(MatchKind::Recursive),
                _ => None,
            };
            if let Some(kind) = kind {
                return Some(Pattern {
                    match_target: Target {
                        package,
                        name: String::new(),
                    },
                    kind,
                    regex: None,
                });
            }
            if target_part.contains('*') {
                let regex_text = format!("^(?:{})$", regex::escape(target_part).replace("\\*", ".*"));
                return Some(Pattern {
                    match_target: Target {
                        package,
                        name: target_part.to_string(),
                    },
                    kind: MatchKind::TargetRegex,
                    regex: Regex::new(&regex_text).ok(),
                });
            }
        }

        Some(Pattern {
            match_target: Target::parse(pattern, context)?,
            kind: MatchKind::Exact,
            regex: None,
        })
    }

    pub fn path(&self) -> &str {
        &self.match_target.package.path
    }

    pub fn project(&self) -> &str {
        &self.match_target.package.project
    }

    pub fn is_recursive(&self) -> bool {
        matches!(self.kind, MatchKind::Recursive | MatchKind::AlwaysMatch)
    }
}

impl TargetMatcher for Pattern {
    fn has_filter(&self) -> bool {
        self.kind != MatchKind::AlwaysMatch
    }

    fn matches_target(&self, target: &Target) -> bool {
        match self.kind {
            MatchKind::Exact => *target == self.match_target,
            MatchKind::TargetRegex => {
                target.package == self.match_target.package
                    && self
                        .regex
                        .as_ref()
                        .is_some_and(|re| re.is_match(&target.name))
            }
            MatchKind::AllTargetsInPackage => target.package == self.match_target.package,
            MatchKind::Recursive => self.matches_package(&target.package),
            MatchKind::AlwaysMatch => true,
        }
    }

    fn matches_package(&self, package: &Package) -> bool {
        match self.kind {
            MatchKind::AlwaysMatch => true,
            MatchKind::Recursive => {
                let own = &self.match_target.package;
                if package.project != own.project {
                    return false;
                }
                own.path.is_empty()
                    || package.path == own.path
                    || (package.path.len() > own.path.len()
                        && package.path.starts_with(&own.path)
                        && package.path.as_bytes()[own.path.len()] == b'/')
            }
            _ => *package == self.match_target.package,
        }
    }
}

/// A set of patterns, any of which may match. An empty bundle, once
/// finished, behaves like a single match-everything pattern.
#[derive(Clone, Debug, Default)]
pub struct PatternBundle {
    patterns: Vec<Pattern>,
    has_filter: bool,
}

impl PatternBundle {
    pub fn add_pattern(&mut self, pattern: Pattern) {
        self.patterns.push(pattern);
    }

    pub fn finish(&mut self) {
        self.has_filter = !self.patterns.is_empty();
        if !self.has_filter {
            self.patterns.push(Pattern::default());
        }
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn match_all() -> PatternBundle {
        let mut bundle = PatternBundle::default();
        bundle.finish();
        bundle
    }
}

impl TargetMatcher for PatternBundle {
    fn has_filter(&self) -> bool {
        self.has_filter
    }

    fn matches_target(&self, target: &Target) -> bool {
        self.patterns.iter().any(|p| p.matches_target(target))
    }

    fn matches_package(&self, package: &Package) -> bool {
        self.patterns.iter().any(|p| p.matches_package(package))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(s: &str) -> Pattern {
        Pattern::parse(s).unwrap_or_else(|| panic!("pattern {s}"))
    }

    fn visibility(s: &str, context: &Package) -> Pattern {
        Pattern::parse_visibility(s, context).unwrap_or_else(|| panic!("visibility {s}"))
    }

    fn package(s: &str) -> Package {
        Package::parse(s).unwrap()
    }

    fn target(s: &str) -> Target {
        Target::parse(s, &Package::default()).unwrap()
    }

    #[test]
    fn invalid_patterns() {
        assert!(Pattern::parse("foo/bar/").is_none());
        assert!(Pattern::parse("foo/bar:").is_none());
        assert!(Pattern::parse("").is_none());
    }

    #[test]
    fn recursive_patterns() {
        assert!(pattern("//...").is_recursive());
        assert!(pattern("...").is_recursive());
        assert!(pattern("foo/bar/...").is_recursive());
        assert!(pattern("//foo/bar/...").is_recursive());
        // Typo: regular non-recursive pattern matching.
        assert!(!pattern("foo/bar/..").is_recursive());
        assert!(!pattern("foo/bar:all").is_recursive());
        assert!(!pattern("foo/bar:__pkg__").is_recursive());
        assert!(pattern("foo/bar:__subpackages__").is_recursive());
    }

    #[test]
    fn pattern_paths() {
        assert_eq!(pattern("//...").path(), "");
        assert_eq!(pattern("...").path(), "");
        assert_eq!(pattern("//foo/bar/...").path(), "foo/bar");
        assert_eq!(pattern("foo/bar/...").path(), "foo/bar");
        assert_eq!(pattern("foo/bar:all").path(), "foo/bar");
        assert_eq!(pattern("foo/bar:__pkg__").path(), "foo/bar");
        assert_eq!(pattern("foo/bar:__subpackages__").path(), "foo/bar");
    }

    #[test]
    fn package_match() {
        assert!(pattern("...").matches_package(&package("//foo")));
        assert!(pattern("...").matches_package(&package("//foo/bar:baz")));
        assert!(!pattern("...").matches_package(&package("@quux//foo/bar:baz")));

        assert!(pattern("//...").matches_package(&package("//foo:bar")));

        assert!(pattern("//foo/...").matches_package(&package("//foo")));
        assert!(pattern("//foo/...").matches_package(&package("//foo/bar")));
        assert!(!pattern("//foo/...").matches_package(&package("//foobar")));

        assert!(pattern("//foo:__subpackages__").matches_package(&package("//foo/bar")));
        assert!(!pattern("//foo:__subpackages__").matches_package(&package("//baz")));

        assert!(!pattern("@x//foo/...").matches_package(&package("//foo")));
        assert!(!pattern("//foo/...").matches_package(&package("@x//foo")));

        assert!(pattern("//foo:all").matches_package(&package("//foo")));
        assert!(!pattern("//foo:all").matches_package(&package("//foo/bar")));
    }

    #[test]
    fn target_match() {
        assert!(pattern("//foo/...").matches_target(&target("//foo:bar")));
        assert!(!pattern("//foo/...").matches_target(&target("@foo//foo:bar")));
        assert!(pattern("//foo/...").matches_target(&target("//foo/bar:baz")));
        assert!(pattern("//foo/...").matches_target(&target("//foo")));
        assert!(!pattern("//foo/...").matches_target(&target("//fo")));

        assert!(pattern("//foo").matches_target(&target("//foo")));

        // All-in-package matches.
        assert!(pattern("//foo:all").matches_target(&target("//foo:bar")));
        assert!(pattern("//foo:*").matches_target(&target("//foo:baz")));
        assert!(pattern("//foo:__pkg__").matches_target(&target("//foo:baz")));

        // Exact match.
        assert!(pattern("//foo:bar").matches_target(&target("//foo:bar")));
        assert!(!pattern("//foo:bar").matches_target(&target("//foo:baz")));

        // Globbing.
        assert!(pattern("//foo:*bar").matches_target(&target("//foo:bar")));
        assert!(!pattern("//foo:*bar").matches_target(&target("//foo:baz")));
        assert!(pattern("//foo:*bar").matches_target(&target("//foo:foobar")));
        assert!(!pattern("//foo:*bar").matches_target(&target("//foo:barquux")));
        assert!(pattern("//foo:ba*").matches_target(&target("//foo:baz")));
        assert!(!pattern("//foo:ba*").matches_target(&target("//foo:quux")));
        assert!(pattern("//foo:b*r").matches_target(&target("//foo:bazaar")));
        assert!(!pattern("//foo:b*r").matches_target(&target("//foo:baz")));
        assert!(pattern("//foo:b*r*k").matches_target(&target("//foo:be_right_back")));
        assert!(!pattern("//foo:b*r*k").matches_target(&target("//foo:ill_be_back")));
    }

    #[test]
    fn visibility_match() {
        let p = package("//foo/bar");
        // Public essentially means: no visibility filter.
        assert!(!visibility("//visibility:public", &p).has_filter());
        assert!(visibility("//visibility:private", &p).has_filter());

        // Private means: only targets in exactly the context package.
        assert!(visibility("//visibility:private", &p).matches_target(&target("//foo/bar:baz")));
        assert!(!visibility("//visibility:private", &p)
            .matches_target(&target("//foo/bar/baz:quux")));

        let subpackages = visibility("__subpackages__", &p);
        assert!(subpackages.has_filter());
        assert!(subpackages.is_recursive());
        assert!(subpackages.matches_target(&target("//foo/bar:hello")));
        assert!(subpackages.matches_target(&target("//foo/bar/baz/and/deep/below:hello")));
    }

    #[test]
    fn empty_bundle_matches_everything() {
        let bundle = PatternBundle::match_all();
        assert!(!bundle.has_filter());
        assert!(bundle.matches_target(&target("//any:thing")));
        assert!(bundle.matches_package(&package("@ext//any")));
    }
}
