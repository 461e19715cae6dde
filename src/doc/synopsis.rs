//! One-line package summaries

/// Leading words that mark a comment as a file header rather than package docs.
const HEADER_PREFIXES: &[&str] = &["copyright", "all rights", "author"];

/// Returns the first sentence of `text` with whitespace collapsed.
///
/// A sentence ends at the first blank line, or at a period followed by
/// whitespace that is not preceded by exactly one uppercase letter (so
/// "E. Coli" does not end a sentence). Comments that start like a copyright
/// or licence header have no synopsis.
pub fn synopsis(text: &str) -> String {
    let first = first_sentence(text);
    let collapsed = first.split_whitespace().collect::<Vec<_>>().join(" ");

    let lower = collapsed.to_lowercase();
    if HEADER_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return String::new();
    }
    collapsed
}

fn first_sentence(text: &str) -> &str {
    let text = text.trim_start();
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut pp: Option<char> = None;
    let mut p: Option<char> = None;

    for (i, &(pos, c)) in chars.iter().enumerate() {
        if c == '\n' && p == Some('\n') {
            return &text[..pos];
        }
        let next = chars.get(i + 1).map(|&(_, n)| n);
        if c == '.' && next.is_none_or(char::is_whitespace) {
            let single_upper = p.is_some_and(char::is_uppercase)
                && !pp.is_some_and(char::is_uppercase);
            if !single_upper {
                return &text[..pos + 1];
            }
        }
        // Whitespace between lines collapses, so track the line break itself.
        if !(c == ' ' || c == '\t' || c == '\r') {
            pp = p;
            p = Some(c);
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Package fmt implements formatted I/O.", "Package fmt implements formatted I/O.")]
    #[case(
        "Package foo does things. It also does more.",
        "Package foo does things."
    )]
    #[case(
        "Package foo does\nmany   things\nacross lines.\n\nMore.",
        "Package foo does many things across lines."
    )]
    #[case("Package foo has no period", "Package foo has no period")]
    #[case("Package foo\n\nSecond paragraph.", "Package foo")]
    #[case("Package e tests E. Coli growth. Yes.", "Package e tests E. Coli growth.")]
    #[case("Package v1.2 is versioned.", "Package v1.2 is versioned.")]
    #[case("Copyright 2009 The Go Authors.", "")]
    #[case("All rights reserved.", "")]
    #[case("", "")]
    fn synopsis_returns_first_sentence(#[case] text: &str, #[case] expected: &str) {
        assert_eq!(synopsis(text), expected);
    }
}
