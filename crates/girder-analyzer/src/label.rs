//! Bazel label space: packages (`@project//path`) and targets
//! (`@project//path:name`), with the canonical compactions applied when
//! serializing.

use std::fmt;

use crate::workspace::Workspace;

/// Something like `//foo/bar` or `@baz//foo/bar`.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Package {
    /// Either empty (root workspace) or something like `@foo_bar`.
    pub project: String,
    /// Path relative to the project, no leading/trailing `/`.
    pub path: String,
}

impl Package {
    pub fn new(project: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            path: path.into(),
        }
    }

    /// Parse a package, ignoring any `:target` suffix. Version qualifiers
    /// (`~version`, trailing `+`) on the project are stripped.
    pub fn parse(s: &str) -> Option<Package> {
        let s = match s.find(':') {
            Some(colon) => &s[..colon],
            None => s,
        };
        if s.len() < 2 {
            return None;
        }
        let (mut project, mut path) = if s.starts_with('@') {
            match s.find('/') {
                Some(slash) => (&s[..slash], &s[slash..]),
                None => (s, ""),
            }
        } else {
            ("", s)
        };
        path = path.trim_start_matches('/').trim_end_matches('/');
        if path.contains("//") {
            return None; // something is off
        }
        // bzlmod puts the version after '~', bazel 8 appends '+'.
        if let Some(tilde) = project.find('~') {
            project = &project[..tilde];
        }
        project = project.trim_end_matches('+');
        if project == "@" {
            project = ""; // `@//x` is the root project
        }
        Some(Package::new(project, path))
    }

    /// Filename relative to this package's path; a leading `:` (another
    /// way to refer to a local file) is dropped.
    pub fn qualified_file(&self, relative_file: &str) -> String {
        let relative_file = relative_file.strip_prefix(':').unwrap_or(relative_file);
        if self.path.is_empty() {
            relative_file.to_string()
        } else {
            format!("{}/{}", self.path, relative_file)
        }
    }

    /// Filename including the extracted-project prefix if this package
    /// lives in an external project the workspace knows about.
    pub fn fully_qualified_file(&self, workspace: &Workspace, relative_file: &str) -> String {
        let qualified = self.qualified_file(relative_file);
        if self.project.is_empty() {
            return qualified;
        }
        match workspace.find_path_by_project(&self.project) {
            Some(prefix) => format!("{}/{}", prefix.display(), qualified),
            None => qualified,
        }
    }

    /// Fully qualified target for a name inside this package.
    pub fn qualified_target(&self, name: &str) -> Option<Target> {
        if name.is_empty() {
            return None;
        }
        Target::parse(&format!(":{name}"), self)
    }

    pub(crate) fn last_element(&self) -> &str {
        if let Some(pos) = self.path.rfind('/') {
            return &self.path[pos + 1..];
        }
        if !self.path.is_empty() {
            return &self.path;
        }
        if !self.project.is_empty() {
            return &self.project[1..];
        }
        ""
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}//{}", self.project, self.path)
    }
}

/// A fully qualified target: package plus name.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target {
    pub package: Package,
    pub name: String,
}

impl Target {
    /// Parse relative to a context package. Both `//foo/bar:baz` and
    /// `:baz` forms are supported; the latter is qualified with the
    /// context. A package without explicit project inherits the context's
    /// project.
    pub fn parse(s: &str, context: &Package) -> Option<Target> {
        let mut parts = s.splitn(3, ':');
        let first = parts.next()?;
        let second = parts.next();
        if parts.next().is_some() {
            return None; // more than one ':'
        }

        let (package_part, name): (&str, String) = match second {
            Some(name) => (first, name.to_string()),
            None => {
                if let Some(last_slash) = first.rfind('/') {
                    // `//absl/strings` means `//absl/strings:strings`.
                    (first, first[last_slash + 1..].to_string())
                } else if let Some(toplevel) = first.strip_prefix('@') {
                    // Just a project, e.g. `@jsonhpp`.
                    (first, toplevel.to_string())
                } else {
                    // Bare name without package or delimiter.
                    ("", s.to_string())
                }
            }
        };

        if package_part.is_empty() {
            return Some(Target {
                package: context.clone(),
                name,
            });
        }
        let mut package = Package::parse(package_part)?;
        if package.project.is_empty() {
            package.project = context.project.clone();
        }
        Some(Target { package, name })
    }

    /// Compact form if printed from a different package.
    pub fn to_string_relative_to(&self, other_package: &Package) -> String {
        if *other_package != self.package {
            return self.to_string();
        }
        format!(":{}", self.name)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // target == last path element -> compact representation.
        if self.package.last_element() == self.name {
            if self.package.path.is_empty() {
                return f.write_str(&self.package.project);
            }
            return write!(f, "{}", self.package);
        }
        write!(f, "{}:{}", self.package, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(s: &str) -> Package {
        Package::parse(s).unwrap_or_else(|| panic!("package {s}"))
    }

    fn target_in(s: &str, context: &Package) -> Target {
        Target::parse(s, context).unwrap_or_else(|| panic!("target {s}"))
    }

    #[test]
    fn parse_package() {
        assert_eq!(package("nodelimiter"), Package::new("", "nodelimiter"));
        assert_eq!(package("@foo"), Package::new("@foo", ""));
        assert_eq!(package("//foo/bar"), Package::new("", "foo/bar"));
        // Trailing slash removed.
        assert_eq!(package("//foo/bar/"), Package::new("", "foo/bar"));
        assert_eq!(package("//foo/bar:targetignored"), Package::new("", "foo/bar"));
        assert_eq!(package("@foo//bar/baz"), Package::new("@foo", "bar/baz"));
        // Not quite proper, but accepted.
        assert_eq!(package("@foo/bar/baz"), Package::new("@foo", "bar/baz"));
        // ... though double slashes in the middle go too far.
        assert!(Package::parse("@foo/bar//baz").is_none());
        assert!(Package::parse("@foo/bar/baz//abc").is_none());
        // Empty project is just the root project.
        assert_eq!(package("@//bar/baz"), Package::new("", "bar/baz"));
        // Version qualifiers are stripped.
        assert_eq!(package("@zlib~1.3//z"), Package::new("@zlib", "z"));
        assert_eq!(package("@zlib+//z"), Package::new("@zlib", "z"));
    }

    #[test]
    fn print_package() {
        assert_eq!(Package::new("", "foo/bar/baz").to_string(), "//foo/bar/baz");
        assert_eq!(
            Package::new("@absl", "foo/bar/baz").to_string(),
            "@absl//foo/bar/baz"
        );
        assert_eq!(Package::new("@foo", "").to_string(), "@foo//");
    }

    #[test]
    fn parse_target() {
        let context = Package::new("", "foo/bar");
        assert_eq!(target_in(":target", &context).package, context);
        assert_eq!(target_in(":target", &context).name, "target");
        // Not well-formed, but still parsed.
        assert_eq!(target_in("target", &context).package, context);

        assert_eq!(target_in("//baz", &context).package.path, "baz");
        assert_eq!(target_in("//baz", &context).name, "baz");
        assert_eq!(target_in("//baz/", &context).name, "");

        assert_eq!(
            target_in("@foo", &context).package,
            Package::new("@foo", "")
        );
        assert_eq!(target_in("@foo", &context).name, "foo");

        assert_eq!(
            target_in("//some/path/toplevel", &context).package,
            Package::new("", "some/path/toplevel")
        );
        assert_eq!(target_in("//some/path/toplevel", &context).name, "toplevel");

        for s in ["@absl//absl/strings:strings", "@absl//absl/strings"] {
            let t = target_in(s, &context);
            assert_eq!(t.package, Package::new("@absl", "absl/strings"));
            assert_eq!(t.name, "strings");
        }

        // Relative to a package in an external project, the project is
        // inherited.
        let project_context = Package::new("@absl", "foo/bar");
        for s in ["//absl/strings:strings", "//absl/strings"] {
            let t = target_in(s, &project_context);
            assert_eq!(t.package, Package::new("@absl", "absl/strings"));
            assert_eq!(t.name, "strings");
        }
    }

    #[test]
    fn qualified_file() {
        let p = Package::new("", "bar/baz");
        assert_eq!(p.qualified_file("quux.cc"), "bar/baz/quux.cc");
        assert_eq!(p.qualified_file(":quux.cc"), "bar/baz/quux.cc");
    }

    #[test]
    fn print_target() {
        let p1 = Package::new("", "foo/bar/baz");
        let p2 = Package::new("", "other/path");

        let tlib = target_in("some-lib", &p1);
        assert_eq!(tlib.to_string(), "//foo/bar/baz:some-lib");
        assert_eq!(tlib.to_string_relative_to(&p1), ":some-lib");
        assert_eq!(tlib.to_string_relative_to(&p2), "//foo/bar/baz:some-lib");

        let baz = target_in("baz", &p1);
        assert_eq!(baz.to_string(), "//foo/bar/baz");
        assert_eq!(baz.to_string_relative_to(&p1), ":baz");

        let pack = Package::new("@project", "");
        assert_eq!(target_in("foo", &pack).to_string(), "@project//:foo");
        assert_eq!(target_in("project", &pack).to_string(), "@project");
    }

    #[test]
    fn parse_reprint_roundtrip() {
        let c = Package::new("", "foo");
        assert_eq!(target_in("//foo/bar:baz", &c).to_string(), "//foo/bar:baz");
        assert_eq!(target_in("//foo", &c).to_string(), "//foo");
        assert_eq!(target_in("//foo:foo", &c).to_string(), "//foo");
        assert_eq!(target_in("@foo//:baz", &c).to_string(), "@foo//:baz");
        assert_eq!(target_in("@foo//foo", &c).to_string(), "@foo//foo");
        assert_eq!(target_in("@foo//:foo", &c).to_string(), "@foo");
        assert_eq!(target_in("//bar:bar", &c).to_string(), "//bar");
        assert_eq!(target_in("@foo//bar:bar", &c).to_string(), "@foo//bar");
    }

    #[test]
    fn spec_canonicalization_examples() {
        let here = Package::new("", "some/path");
        let cases = [
            ("//some/path:bar", ":bar"),
            ("baz", ":baz"),
            ("//flubber:flubber", "//flubber"),
            ("@//other/package:qux", "//other/package:qux"),
            ("@foo//:foo", "@foo"),
        ];
        for (input, expect) in cases {
            let t = target_in(input, &here);
            assert_eq!(t.to_string_relative_to(&here), expect, "for {input}");
        }
    }
}
