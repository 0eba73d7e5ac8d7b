//! Wildcard include/exclude predicate over path strings.

use glob::{MatchOptions, Pattern};

/// `*` also crosses `/`, like shell `case` patterns.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// A single `*`-wildcard pattern with an include or exclude flag.
///
/// User-facing syntax prefixes exclude patterns with `^`; see
/// [`FileMatcher::parse`]. The matcher itself only stores the resolved flag.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FileMatcher {
    pattern: String,
    compiled: Option<Pattern>,
    include: bool,
}

/// Compile with `*` as the only wildcard; runs of `*` collapse to one.
fn compile(pattern: &str) -> Option<Pattern> {
    let mut glob = String::with_capacity(pattern.len());
    for (i, literal) in pattern.split('*').enumerate() {
        if i > 0 && !glob.ends_with('*') {
            glob.push('*');
        }
        glob.push_str(&Pattern::escape(literal));
    }
    match Pattern::new(&glob) {
        Ok(compiled) => Some(compiled),
        Err(e) => {
            tracing::debug!("pattern '{}' compared literally: {}", pattern, e);
            None
        }
    }
}

impl FileMatcher {
    pub fn new(pattern: impl Into<String>, include: bool) -> Self {
        let pattern = pattern.into();
        Self {
            compiled: compile(&pattern),
            pattern,
            include,
        }
    }

    pub fn include(pattern: impl Into<String>) -> Self {
        Self::new(pattern, true)
    }

    pub fn exclude(pattern: impl Into<String>) -> Self {
        Self::new(pattern, false)
    }

    /// Parse one filter, `^pattern` meaning exclude.
    pub fn parse_one(filter: &str) -> Self {
        match filter.strip_prefix('^') {
            Some(pattern) => Self::exclude(pattern),
            None => Self::include(filter),
        }
    }

    /// Parse a list of filters as given on the command line.
    pub fn parse<S: AsRef<str>>(filters: &[S]) -> Vec<Self> {
        filters.iter().map(|f| Self::parse_one(f.as_ref())).collect()
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_include(&self) -> bool {
        self.include
    }

    /// Does `value` match the pattern, ignoring the include flag.
    pub fn matches(&self, value: &str) -> bool {
        match &self.compiled {
            Some(compiled) => compiled.matches_with(value, MATCH_OPTIONS),
            None => value == self.pattern,
        }
    }

    /// Apply this matcher to `paths`.
    ///
    /// Absolute patterns see the path verbatim, relative patterns see it
    /// with `work_dir` (ending with `/`) stripped. A path outside `work_dir`
    /// never matches a relative pattern. Order is preserved.
    pub fn filter<S: AsRef<str>>(&self, paths: Vec<S>, work_dir: &str) -> Vec<S> {
        let absolute = self.pattern.starts_with('/');
        paths
            .into_iter()
            .filter(|path| {
                let path = path.as_ref();
                let hit = if absolute {
                    self.matches(path)
                } else {
                    path.strip_prefix(work_dir)
                        .is_some_and(|relative| self.matches(relative))
                };
                hit == self.include
            })
            .collect()
    }

    /// Apply several matchers one after another.
    pub fn filter_all<S: AsRef<str>>(matchers: &[Self], paths: Vec<S>, work_dir: &str) -> Vec<S> {
        matchers
            .iter()
            .fold(paths, |paths, matcher| matcher.filter(paths, work_dir))
    }
}

impl std::fmt::Display for FileMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.include {
            write!(f, "{}", self.pattern)
        } else {
            write!(f, "^{}", self.pattern)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_without_wildcard() {
        let m = FileMatcher::include("a.txt");
        assert!(m.matches("a.txt"));
        assert!(!m.matches("a.txt.bak"));
        assert!(!m.matches("xa.txt"));
    }

    #[test]
    fn test_wildcards() {
        assert!(FileMatcher::include("_test*.zip").matches("_test/ab.zip"));
        assert!(!FileMatcher::include("_test*.zip").matches("_test/ab.zip.txt"));
        assert!(FileMatcher::include("*.txt").matches("a.txt"));
        assert!(FileMatcher::include("*").matches(""));
        assert!(FileMatcher::include("a*").matches("abc"));
        assert!(!FileMatcher::include("b*").matches("abc"));
        assert!(FileMatcher::include("a*b*c").matches("aXbYc"));
        assert!(!FileMatcher::include("a*c*b").matches("abc"));
        assert!(FileMatcher::include("a*b").matches("abb"));
        // the prefix and suffix must not overlap
        assert!(!FileMatcher::include("ab*ba").matches("aba"));
    }

    #[test]
    fn test_only_star_is_special() {
        let m = FileMatcher::include("a?[1]*.txt");
        assert!(m.matches("a?[1].txt"));
        assert!(m.matches("a?[1]/b.txt"));
        assert!(!m.matches("ab1.txt"));

        assert!(FileMatcher::include("a**b").matches("a/x/b"));
        assert!(FileMatcher::include("**").matches(".hidden/x"));
    }

    #[test]
    fn test_parse_exclude_prefix() {
        let filters = FileMatcher::parse(&["*.txt", "^*.zip"]);
        assert_eq!(filters[0], FileMatcher::include("*.txt"));
        assert_eq!(filters[1], FileMatcher::exclude("*.zip"));
        assert_eq!(filters[1].to_string(), "^*.zip");
    }

    #[test]
    fn test_exclude_filter() {
        let m = FileMatcher::parse_one("^*.txt");
        let out = m.filter(vec!["a.txt", "ab.zip"], "");
        assert_eq!(out, vec!["ab.zip"]);
    }

    #[test]
    fn test_relative_pattern_strips_work_dir() {
        let paths = vec!["/work/out/a.txt", "/work/b.txt", "/other/c.txt"];
        let include = FileMatcher::include("out/*");
        assert_eq!(include.filter(paths.clone(), "/work/"), vec!["/work/out/a.txt"]);

        // paths outside the work dir only survive excludes
        let exclude = FileMatcher::exclude("b.txt");
        assert_eq!(
            exclude.filter(paths.clone(), "/work/"),
            vec!["/work/out/a.txt", "/other/c.txt"]
        );

        let absolute = FileMatcher::include("/other/*");
        assert_eq!(absolute.filter(paths, "/work/"), vec!["/other/c.txt"]);
    }

    #[test]
    fn test_filter_all_is_intersection() {
        let matchers = FileMatcher::parse(&["*.txt", "^b*"]);
        let out = FileMatcher::filter_all(&matchers, vec!["a.txt", "b.txt", "c.zip"], "");
        assert_eq!(out, vec!["a.txt"]);
    }
}
