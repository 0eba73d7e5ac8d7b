//! Shell-like splitting of a single argument into path candidates.

use std::ops::Range;

/// A piece of an argument together with where it sits in the argument.
///
/// `range` covers the fragment text only, without surrounding quotes, so
/// replacing `arg[range]` rewrites the fragment in place.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    pub text: String,
    pub range: Range<usize>,
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || c == '=' || c == ','
}

/// Split `arg` at whitespace, `=` and `,`. Quoted runs are kept together.
///
/// A quoted run directly adjacent to unquoted text starts a new fragment,
/// so `--name="a b"` yields `--name` and `a b`.
pub fn split_fragments(arg: &str) -> Vec<Fragment> {
    let mut fragments = Vec::new();
    let mut start: Option<usize> = None;
    let mut chars = arg.char_indices();

    let flush = |start: &mut Option<usize>, end: usize, fragments: &mut Vec<Fragment>| {
        if let Some(s) = start.take()
            && s < end
        {
            fragments.push(Fragment {
                text: arg[s..end].to_string(),
                range: s..end,
            });
        }
    };

    while let Some((idx, c)) = chars.next() {
        if c == '"' || c == '\'' {
            flush(&mut start, idx, &mut fragments);
            let inner = idx + c.len_utf8();
            let mut end = arg.len();
            for (j, d) in chars.by_ref() {
                if d == c {
                    end = j;
                    break;
                }
            }
            if inner < end {
                fragments.push(Fragment {
                    text: arg[inner..end].to_string(),
                    range: inner..end,
                });
            }
        } else if is_separator(c) {
            flush(&mut start, idx, &mut fragments);
        } else if start.is_none() {
            start = Some(idx);
        }
    }
    flush(&mut start, arg.len(), &mut fragments);
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(arg: &str) -> Vec<String> {
        split_fragments(arg).into_iter().map(|f| f.text).collect()
    }

    #[test]
    fn test_plain_separators() {
        assert_eq!(texts("--input=a.txt"), vec!["--input", "a.txt"]);
        assert_eq!(texts("a.txt,b.txt"), vec!["a.txt", "b.txt"]);
        assert_eq!(texts("  x  y "), vec!["x", "y"]);
        assert!(texts("").is_empty());
        assert!(texts("=,").is_empty());
    }

    #[test]
    fn test_quotes_group() {
        assert_eq!(texts("--name=\"my file.txt\""), vec!["--name", "my file.txt"]);
        assert_eq!(texts("'a,b' c"), vec!["a,b", "c"]);
        // unterminated quote runs to the end
        assert_eq!(texts("\"abc"), vec!["abc"]);
    }

    #[test]
    fn test_ranges_point_into_arg() {
        let arg = "-o=\"out dir\",x";
        for fragment in split_fragments(arg) {
            assert_eq!(&arg[fragment.range.clone()], fragment.text);
        }
    }
}
