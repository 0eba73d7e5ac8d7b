//! `.cincanignore` parsing and output filter merging.

use crate::files::FileMatcher;
use cincan_shared::constants::files::IGNORE_FILE;
use std::collections::HashSet;

/// Exclude rules from the text of an ignore file.
///
/// `name/` excludes the directory contents, a bare `name` excludes the path
/// and anything below it, and a pattern ending in `*` is used as written.
pub fn parse_ignore_file(text: &str) -> Vec<FileMatcher> {
    let mut rules = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.ends_with('*') {
            rules.push(FileMatcher::exclude(line));
        } else if let Some(dir) = line.strip_suffix('/') {
            rules.push(FileMatcher::exclude(format!("{}/*", dir.trim_end_matches('/'))));
        } else {
            rules.push(FileMatcher::exclude(line));
            rules.push(FileMatcher::exclude(format!("{}/*", line)));
        }
    }
    rules
}

/// Combine caller filters with the image's ignore rules.
///
/// - `no_defaults`: caller filters only
/// - any caller include: caller filters only
/// - caller excludes only: caller excludes plus ignore rules, deduplicated
/// - no caller filters: ignore rules alone
///
/// The ignore file itself is excluded in every case.
pub fn merge_filters(
    caller: &[FileMatcher],
    ignore_rules: &[FileMatcher],
    no_defaults: bool,
) -> Vec<FileMatcher> {
    let mut merged: Vec<FileMatcher> = if no_defaults || caller.iter().any(|f| f.is_include()) {
        caller.to_vec()
    } else {
        let mut seen = HashSet::new();
        caller
            .iter()
            .chain(ignore_rules.iter())
            .filter(|f| seen.insert(f.pattern().to_string()))
            .cloned()
            .collect()
    };
    if !merged
        .iter()
        .any(|f| !f.is_include() && f.pattern() == IGNORE_FILE)
    {
        merged.push(FileMatcher::exclude(IGNORE_FILE));
    }
    merged
}
