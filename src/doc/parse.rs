//! Go source parsing with tree-sitter
//!
//! Extracts the exported API of one package directory: package doc comment,
//! consts, vars, funcs, types with their methods and constructors, imports,
//! and examples from `_test.go` files.
//!
//! Doc comments are the `comment` nodes directly above a declaration with no
//! blank line in between.

use indexmap::IndexMap;
use tree_sitter::{Node, Parser, Tree};
use tracing::warn;

use crate::doc::{Example, Func, SourceFile, Type, Value};
use crate::error::ParseError;

/// Package name used by files that only carry documentation.
const DOCUMENTATION_PACKAGE: &str = "documentation";

/// Documentation extracted from one package directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageDocs {
    pub name: String,
    pub doc: String,
    pub consts: Vec<Value>,
    pub vars: Vec<Value>,
    pub funcs: Vec<Func>,
    pub types: Vec<Type>,
    pub examples: Vec<Example>,
    pub imports: Vec<String>,
}

/// Reports whether a Go identifier is exported.
pub fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

fn new_parser() -> Result<Parser, ParseError> {
    let mut parser = Parser::new();
    let language = tree_sitter_go::LANGUAGE;
    parser.set_language(&language.into()).map_err(|e| {
        warn!("Failed to set Go language for tree-sitter: {}", e);
        ParseError::TreeSitter(e.to_string())
    })?;
    Ok(parser)
}

fn parse_tree(parser: &mut Parser, file: &SourceFile) -> Result<Tree, ParseError> {
    parser.parse(&file.content, None).ok_or_else(|| {
        warn!("Failed to parse Go file {}", file.name);
        ParseError::ParseFailed(file.name.clone())
    })
}

fn text<'a>(node: Node, content: &'a str) -> &'a str {
    &content[node.byte_range()]
}

fn field_text(node: Node, field: &str, content: &str) -> String {
    node.child_by_field_name(field)
        .map(|n| text(n, content).to_string())
        .unwrap_or_default()
}

/// Strips pointer and type-argument decoration: `*List[T]` -> `List`.
fn base_type_name(type_text: &str) -> &str {
    let name = type_text.trim().trim_start_matches('*');
    name.split('[').next().unwrap_or(name).trim()
}

/// Named children of `decl` of the given kind, looking through `*_list` wrappers.
fn specs<'t>(decl: Node<'t>, kind: &str) -> Vec<Node<'t>> {
    let mut out = Vec::new();
    let mut cursor = decl.walk();
    for child in decl.named_children(&mut cursor) {
        if child.kind() == kind {
            out.push(child);
        } else if child.kind().ends_with("_list") {
            out.extend(specs(child, kind));
        }
    }
    out
}

/// `//go:generate`, `//nolint:x`, `//line f.go:1` and similar are not prose.
fn is_directive(line: &str) -> bool {
    line.starts_with("line ")
        || line.split_once(':').is_some_and(|(prefix, _)| {
            !prefix.is_empty()
                && prefix
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        })
}

fn comment_text(comments: &[&str]) -> String {
    let mut lines: Vec<String> = Vec::new();
    for raw in comments {
        if let Some(line) = raw.strip_prefix("//") {
            if is_directive(line) {
                continue;
            }
            lines.push(line.strip_prefix(' ').unwrap_or(line).trim_end().to_string());
        } else if let Some(block) = raw.strip_prefix("/*").and_then(|b| b.strip_suffix("*/")) {
            lines.extend(block.lines().map(|l| l.trim().to_string()));
        }
    }
    lines.join("\n").trim().to_string()
}

/// The comment block immediately above `node`.
fn doc_comment(node: Node, content: &str) -> String {
    let mut comments: Vec<Node> = Vec::new();
    let mut next_row = node.start_position().row;
    let mut current = node.prev_named_sibling();

    while let Some(sibling) = current {
        if sibling.kind() != "comment" || sibling.end_position().row + 1 != next_row {
            break;
        }
        comments.push(sibling);
        next_row = sibling.start_position().row;
        current = sibling.prev_named_sibling();
    }

    // A comment trailing the previous declaration belongs to that line.
    if let (Some(earliest), Some(before)) = (comments.last(), current)
        && before.kind() != "comment"
        && before.end_position().row == earliest.start_position().row
    {
        comments.pop();
    }

    comments.reverse();
    let raw: Vec<&str> = comments.iter().map(|c| text(*c, content)).collect();
    comment_text(&raw)
}

fn package_clause<'t>(root: Node<'t>) -> Option<Node<'t>> {
    let mut cursor = root.walk();
    root.children(&mut cursor)
        .find(|n| n.kind() == "package_clause")
}

fn package_name(clause: Node, content: &str) -> Option<String> {
    let mut cursor = clause.walk();
    clause
        .named_children(&mut cursor)
        .find(|n| n.kind() == "package_identifier")
        .map(|n| text(n, content).to_string())
}

/// Declarations collected across a package's files before they are grouped.
#[derive(Default)]
struct Collector {
    consts: Vec<(Option<String>, Value)>,
    vars: Vec<(Option<String>, Value)>,
    funcs: Vec<(Option<String>, Func)>,
    types: IndexMap<String, Type>,
    methods: Vec<(String, Func)>,
    examples: Vec<Example>,
    imports: Vec<String>,
}

impl Collector {
    fn file(&mut self, root: Node, content: &str) {
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            match child.kind() {
                "import_declaration" => self.imports(child, content),
                "const_declaration" => {
                    if let Some(value) = value_decl(child, "const_spec", content) {
                        self.consts.push(value);
                    }
                }
                "var_declaration" => {
                    if let Some(value) = value_decl(child, "var_spec", content) {
                        self.vars.push(value);
                    }
                }
                "function_declaration" => {
                    let func = func_decl(child, content);
                    if is_exported(&func.name) {
                        self.funcs.push((result_type(child, content), func));
                    }
                }
                "method_declaration" => {
                    let func = func_decl(child, content);
                    let recv = func
                        .recv
                        .as_deref()
                        .map(base_type_name)
                        .unwrap_or_default()
                        .to_string();
                    if is_exported(&func.name) && is_exported(&recv) {
                        self.methods.push((recv, func));
                    }
                }
                "type_declaration" => self.types(child, content),
                _ => {}
            }
        }
    }

    fn imports(&mut self, decl: Node, content: &str) {
        for spec in specs(decl, "import_spec") {
            if let Some(path) = spec.child_by_field_name("path") {
                let path = text(path, content).trim_matches(|c| c == '"' || c == '`');
                self.imports.push(path.to_string());
            }
        }
    }

    fn types(&mut self, decl: Node, content: &str) {
        let mut cursor = decl.walk();
        let grouped = decl.children(&mut cursor).any(|c| c.kind() == "(");

        let mut cursor = decl.walk();
        for spec in decl.named_children(&mut cursor) {
            if spec.kind() != "type_spec" && spec.kind() != "type_alias" {
                continue;
            }
            let name = field_text(spec, "name", content);
            if !is_exported(&name) {
                continue;
            }
            let (doc, decl_text) = if grouped {
                (doc_comment(spec, content), format!("type {}", text(spec, content)))
            } else {
                (doc_comment(decl, content), text(decl, content).to_string())
            };
            self.types.insert(
                name.clone(),
                Type {
                    name,
                    doc,
                    decl: decl_text,
                    ..Default::default()
                },
            );
        }
    }

    fn test_file(&mut self, root: Node, content: &str) {
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            if child.kind() != "function_declaration" {
                continue;
            }
            let takes_params = child
                .child_by_field_name("parameters")
                .is_some_and(|p| p.named_child_count() > 0);
            if takes_params {
                continue;
            }
            let fn_name = field_text(child, "name", content);
            let Some((name, suffix)) = split_example_name(&fn_name) else {
                continue;
            };
            let body = child
                .child_by_field_name("body")
                .map(|b| text(b, content))
                .unwrap_or_default();
            let (code, output) = example_code(body);
            self.examples.push(Example {
                name,
                suffix,
                doc: doc_comment(child, content),
                code,
                output,
            });
        }
    }

    /// Groups typed values, constructors, methods and examples under their types.
    fn finish(self) -> PackageDocs {
        let Collector {
            consts,
            vars,
            funcs,
            mut types,
            methods,
            examples,
            mut imports,
        } = self;

        let mut docs = PackageDocs::default();

        for (type_name, value) in consts {
            match type_name.and_then(|t| types.get_mut(&t)) {
                Some(t) => t.consts.push(value),
                None => docs.consts.push(value),
            }
        }
        for (type_name, value) in vars {
            match type_name.and_then(|t| types.get_mut(&t)) {
                Some(t) => t.vars.push(value),
                None => docs.vars.push(value),
            }
        }
        for (result, func) in funcs {
            match result.and_then(|t| types.get_mut(&t)) {
                Some(t) => t.funcs.push(func),
                None => docs.funcs.push(func),
            }
        }
        for (recv, method) in methods {
            if let Some(t) = types.get_mut(&recv) {
                t.methods.push(method);
            }
        }

        docs.funcs.sort_by(|a, b| a.name.cmp(&b.name));
        for t in types.values_mut() {
            t.funcs.sort_by(|a, b| a.name.cmp(&b.name));
            t.methods.sort_by(|a, b| a.name.cmp(&b.name));
        }
        types.sort_keys();
        docs.types = types.into_values().collect();

        let mut examples = examples;
        examples.sort_by(|a, b| (&a.name, &a.suffix).cmp(&(&b.name, &b.suffix)));
        for example in examples {
            attach_example(&mut docs, example);
        }

        imports.sort();
        imports.dedup();
        docs.imports = imports;
        docs
    }
}

/// A const or var declaration with at least one exported name, plus the
/// type its first spec names.
fn value_decl(decl: Node, spec_kind: &str, content: &str) -> Option<(Option<String>, Value)> {
    let specs = specs(decl, spec_kind);
    let names: Vec<String> = specs
        .iter()
        .flat_map(|spec| {
            let mut cursor = spec.walk();
            spec.children_by_field_name("name", &mut cursor)
                .map(|n| text(n, content).to_string())
                .collect::<Vec<_>>()
        })
        .filter(|name| is_exported(name))
        .collect();

    if names.is_empty() {
        return None;
    }

    let type_name = specs
        .first()
        .and_then(|spec| spec.child_by_field_name("type"))
        .map(|t| base_type_name(text(t, content)).to_string());

    Some((
        type_name,
        Value {
            names,
            doc: doc_comment(decl, content),
            decl: text(decl, content).to_string(),
        },
    ))
}

fn func_decl(node: Node, content: &str) -> Func {
    let decl_end = node
        .child_by_field_name("body")
        .map_or(node.end_byte(), |body| body.start_byte());
    let recv = node.child_by_field_name("receiver").and_then(|params| {
        let mut cursor = params.walk();
        let param = params
            .named_children(&mut cursor)
            .find(|p| p.kind() == "parameter_declaration")?;
        param
            .child_by_field_name("type")
            .map(|t| text(t, content).to_string())
    });

    Func {
        name: field_text(node, "name", content),
        doc: doc_comment(node, content),
        decl: content[node.start_byte()..decl_end].trim_end().to_string(),
        recv,
        examples: Vec::new(),
    }
}

/// Base name of a function's first result type, used to spot constructors.
fn result_type(node: Node, content: &str) -> Option<String> {
    let result = node.child_by_field_name("result")?;
    let first = if result.kind() == "parameter_list" {
        let mut cursor = result.walk();
        let param = result
            .named_children(&mut cursor)
            .find(|p| p.kind() == "parameter_declaration")?;
        param.child_by_field_name("type")?
    } else {
        result
    };
    Some(base_type_name(text(first, content)).to_string())
}

fn starts_lower(s: &str) -> bool {
    s.chars().next().is_some_and(char::is_lowercase)
}

/// Splits an example function name into its target and suffix.
///
/// - `Example` -> ("", "")
/// - `Example_second` -> ("", "second")
/// - `ExampleF` -> ("F", "")
/// - `ExampleT_M_tricky` -> ("T_M", "tricky")
pub fn split_example_name(fn_name: &str) -> Option<(String, String)> {
    let rest = fn_name.strip_prefix("Example")?;
    if rest.is_empty() {
        return Some((String::new(), String::new()));
    }
    if let Some(suffix) = rest.strip_prefix('_') {
        return starts_lower(suffix).then(|| (String::new(), suffix.to_string()));
    }
    if !rest.chars().next().is_some_and(char::is_uppercase) {
        return None;
    }
    match rest.rsplit_once('_') {
        Some((target, suffix)) if starts_lower(suffix) => {
            Some((target.to_string(), suffix.to_string()))
        }
        _ => Some((rest.to_string(), String::new())),
    }
}

/// Splits an example body into dedented code and its expected output.
fn example_code(body: &str) -> (String, Option<String>) {
    let inner = body
        .trim()
        .strip_prefix('{')
        .and_then(|b| b.strip_suffix('}'))
        .unwrap_or(body);
    let lines: Vec<&str> = inner.lines().collect();

    let output_at = lines.iter().position(|line| {
        let line = line.trim();
        line.starts_with("// Output:") || line.starts_with("// Unordered output:")
    });

    match output_at {
        Some(idx) => {
            let mut output: Vec<&str> = Vec::new();
            if let Some((_, first)) = lines[idx].split_once(':') {
                let first = first.trim();
                if !first.is_empty() {
                    output.push(first);
                }
            }
            for line in &lines[idx + 1..] {
                if let Some(comment) = line.trim().strip_prefix("//") {
                    output.push(comment.strip_prefix(' ').unwrap_or(comment));
                }
            }
            (dedent(&lines[..idx]), Some(output.join("\n")))
        }
        None => (dedent(&lines), None),
    }
}

fn dedent(lines: &[&str]) -> String {
    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .map(|l| l.get(indent..).unwrap_or_else(|| l.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .trim_end()
        .to_string()
}

fn attach_example(docs: &mut PackageDocs, example: Example) {
    if example.name.is_empty() {
        docs.examples.push(example);
        return;
    }

    if let Some(func) = docs.funcs.iter_mut().find(|f| f.name == example.name) {
        func.examples.push(example);
        return;
    }

    for t in docs.types.iter_mut() {
        if t.name == example.name {
            t.examples.push(example);
            return;
        }
        if let Some(func) = t.funcs.iter_mut().find(|f| f.name == example.name) {
            func.examples.push(example);
            return;
        }
        if let Some(method) = example
            .name
            .split_once('_')
            .filter(|(type_name, _)| *type_name == t.name)
            .and_then(|(_, method)| t.methods.iter_mut().find(|m| m.name == method))
        {
            method.examples.push(example);
            return;
        }
    }
}

/// Parses one package directory.
///
/// `files` are the platform-filtered non-test sources; `test_files` only
/// contribute examples.
pub fn parse_package(
    dir: &str,
    files: &[SourceFile],
    test_files: &[SourceFile],
) -> Result<PackageDocs, ParseError> {
    if files.is_empty() {
        return Err(ParseError::NoFiles(dir.to_string()));
    }

    let mut parser = new_parser()?;
    let mut collector = Collector::default();
    let mut name: Option<String> = None;
    let mut doc = String::new();

    for file in files {
        let tree = parse_tree(&mut parser, file)?;
        let root = tree.root_node();
        let clause = package_clause(root)
            .ok_or_else(|| ParseError::ParseFailed(format!("{}: no package clause", file.name)))?;
        let file_package = package_name(clause, &file.content).unwrap_or_default();

        if file_package != DOCUMENTATION_PACKAGE {
            match &name {
                None => name = Some(file_package),
                Some(first) if *first != file_package => {
                    return Err(ParseError::MultiplePackages {
                        dir: dir.to_string(),
                        first: first.clone(),
                        second: file_package,
                    });
                }
                Some(_) => {}
            }
        }

        let file_doc = doc_comment(clause, &file.content);
        if !file_doc.is_empty() && (doc.is_empty() || file.name == "doc.go") {
            doc = file_doc;
        }

        collector.file(root, &file.content);
    }

    for file in test_files {
        let tree = parse_tree(&mut parser, file)?;
        collector.test_file(tree.root_node(), &file.content);
    }

    let mut docs = collector.finish();
    docs.name = name.unwrap_or_else(|| DOCUMENTATION_PACKAGE.to_string());
    docs.doc = doc;
    Ok(docs)
}
