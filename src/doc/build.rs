//! Build constraint evaluation
//!
//! A file takes part in a platform's build when:
//! - its name suffix (`_goos`, `_goarch`, `_goos_goarch`, before `_test.go`) matches, and
//! - its `//go:build` expression, or failing that its `// +build` lines, hold.
//!
//! Satisfied tags: goos (with android→linux, ios→darwin, illumos→solaris),
//! goarch, `unix` on Unix-like systems, `gc`, and every `go1.N` release tag.
//! Everything else, `cgo` and `ignore` included, is unsatisfied.

use tracing::debug;

use crate::module::platform::{KNOWN_ARCH, KNOWN_OS, Platform};

/// Reports whether a Go source file is built on `platform`.
pub fn matches_platform(file_name: &str, content: &str, platform: &Platform) -> bool {
    matches_file_name(file_name, platform) && matches_header(content, platform)
}

/// Checks the `_goos_goarch` file name convention.
pub fn matches_file_name(file_name: &str, platform: &Platform) -> bool {
    let stem = file_name.strip_suffix(".go").unwrap_or(file_name);
    let stem = stem.strip_suffix("_test").unwrap_or(stem);

    // Everything up to the first underscore is the file's own name.
    let Some(idx) = stem.find('_') else {
        return true;
    };
    let parts: Vec<&str> = stem[idx + 1..].split('_').collect();
    let n = parts.len();

    if n >= 2 && KNOWN_OS.contains(&parts[n - 2]) && KNOWN_ARCH.contains(&parts[n - 1]) {
        return platform.matches_os(parts[n - 2]) && platform.goarch == parts[n - 1];
    }
    if KNOWN_OS.contains(&parts[n - 1]) {
        return platform.matches_os(parts[n - 1]);
    }
    if KNOWN_ARCH.contains(&parts[n - 1]) {
        return platform.goarch == parts[n - 1];
    }
    true
}

/// Evaluates the build constraint comments preceding the package clause.
pub fn matches_header(content: &str, platform: &Platform) -> bool {
    let mut plus_build: Vec<&str> = Vec::new();
    let mut in_block_comment = false;

    for line in content.lines() {
        let line = line.trim();
        if in_block_comment {
            in_block_comment = !line.contains("*/");
            continue;
        }
        if line.is_empty() {
            continue;
        }
        if line.starts_with("/*") {
            in_block_comment = !line[2..].contains("*/");
            continue;
        }
        let Some(comment) = line.strip_prefix("//") else {
            // Constraints must appear before the package clause.
            break;
        };

        if let Some(expr) = comment.strip_prefix("go:build") {
            return match parse_expr(expr) {
                Some(expr) => expr.eval(&|tag| tag_satisfied(tag, platform)),
                None => {
                    debug!("Ignoring file with malformed //go:build line: {}", line);
                    false
                }
            };
        }
        if let Some(rest) = comment.trim_start().strip_prefix("+build") {
            plus_build.push(rest);
        }
    }

    plus_build
        .iter()
        .all(|line| plus_build_satisfied(line, platform))
}

/// One `// +build` line: space-separated options are OR'd, comma-separated terms AND'd.
fn plus_build_satisfied(line: &str, platform: &Platform) -> bool {
    line.split_whitespace().any(|option| {
        option.split(',').all(|term| match term.strip_prefix('!') {
            Some(tag) => !tag_satisfied(tag, platform),
            None => tag_satisfied(term, platform),
        })
    })
}

fn tag_satisfied(tag: &str, platform: &Platform) -> bool {
    match tag {
        "gc" => true,
        "unix" => platform.is_unix(),
        "cgo" | "ignore" => false,
        _ if is_release_tag(tag) => true,
        _ => platform.matches_os(tag) || platform.goarch == tag,
    }
}

fn is_release_tag(tag: &str) -> bool {
    tag.strip_prefix("go1.")
        .is_some_and(|minor| !minor.is_empty() && minor.chars().all(|c| c.is_ascii_digit()))
}

/// A parsed `//go:build` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Tag(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn eval(&self, satisfied: &dyn Fn(&str) -> bool) -> bool {
        match self {
            Expr::Tag(tag) => satisfied(tag),
            Expr::Not(inner) => !inner.eval(satisfied),
            Expr::And(a, b) => a.eval(satisfied) && b.eval(satisfied),
            Expr::Or(a, b) => a.eval(satisfied) || b.eval(satisfied),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token<'a> {
    Tag(&'a str),
    Not,
    And,
    Or,
    Open,
    Close,
}

fn tokenize(input: &str) -> Option<Vec<Token<'_>>> {
    let mut tokens = Vec::new();
    let mut rest = input.trim_start();

    while let Some(c) = rest.chars().next() {
        let (token, len) = match c {
            '!' => (Token::Not, 1),
            '(' => (Token::Open, 1),
            ')' => (Token::Close, 1),
            '&' if rest.starts_with("&&") => (Token::And, 2),
            '|' if rest.starts_with("||") => (Token::Or, 2),
            c if c.is_alphanumeric() || c == '_' || c == '.' => {
                let len = rest
                    .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
                    .unwrap_or(rest.len());
                (Token::Tag(&rest[..len]), len)
            }
            _ => return None,
        };
        tokens.push(token);
        rest = rest[len..].trim_start();
    }

    Some(tokens)
}

/// Parses a `//go:build` expression; `None` when malformed.
pub fn parse_expr(input: &str) -> Option<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = ExprParser { tokens, pos: 0 };
    let expr = parser.or()?;
    (parser.pos == parser.tokens.len()).then_some(expr)
}

struct ExprParser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl ExprParser<'_> {
    fn peek(&self) -> Option<&Token<'_>> {
        self.tokens.get(self.pos)
    }

    fn or(&mut self) -> Option<Expr> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            left = Expr::Or(Box::new(left), Box::new(self.and()?));
        }
        Some(left)
    }

    fn and(&mut self) -> Option<Expr> {
        let mut left = self.not()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            left = Expr::And(Box::new(left), Box::new(self.not()?));
        }
        Some(left)
    }

    fn not(&mut self) -> Option<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Some(Expr::Not(Box::new(self.not()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Option<Expr> {
        match self.tokens.get(self.pos)?.clone() {
            Token::Open => {
                self.pos += 1;
                let expr = self.or()?;
                if self.peek() != Some(&Token::Close) {
                    return None;
                }
                self.pos += 1;
                Some(expr)
            }
            Token::Tag(tag) => {
                self.pos += 1;
                Some(Expr::Tag(tag.to_string()))
            }
            _ => None,
        }
    }
}
