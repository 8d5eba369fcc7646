//! Snippet slicer (§4.5): splits a file's AST into self-contained
//! declaration-level snippets.
//!
//! Pure function of `(path, content, extension)` — no database access, no
//! hashing. `pipeline::extract_snippets` calls this, then content-hashes
//! and persists the results.

use std::collections::HashSet;

use tree_sitter::{Parser, Query, QueryCursor};

use crate::chunking::languages::{TSLanguageConfig, TSLanguageParsing};

const MAX_NAME_BYTES: usize = 255;
const ELISION_PLACEHOLDER: &str = "{ ... }";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlicedSnippet {
    pub content: String,
    pub extension: String,
}

/// Slices one file's content into declaration-level snippets. Returns an
/// empty list for extensions without a registered language config — the
/// caller simply won't select this file as a candidate.
pub fn slice_file(extension: &str, content: &str) -> Vec<SlicedSnippet> {
    let parsing = TSLanguageParsing::init();
    let Some(config) = parsing
        .configs_iter()
        .find(|c| c.file_extensions.contains(&extension))
    else {
        return Vec::new();
    };

    let mut parser = Parser::new();
    if parser.set_language((config.grammar)()).is_err() {
        return Vec::new();
    }
    let Some(tree) = parser.parse(content.as_bytes(), None) else {
        return Vec::new();
    };

    let declarations = collect_declarations(config, &tree, content);
    let names: Vec<&str> = declarations.iter().map(|d| d.name.as_str()).collect();

    let mut out = Vec::new();
    for decl in &declarations {
        if is_anonymous_like(&decl.name) || decl.name.len() > MAX_NAME_BYTES {
            continue;
        }

        let elided_body = elide_nested_functions(config, &tree, content, decl);
        let mut body = String::new();

        for referenced in referenced_declarations(&decl.signature_text, &decl.name, &names) {
            if let Some(other) = declarations.iter().find(|d| d.name == referenced) {
                body.push_str(&other.text(content));
                body.push('\n');
            }
        }
        body.push_str(&elided_body);

        out.push(SlicedSnippet {
            content: body,
            extension: extension.to_owned(),
        });
    }

    out.extend(entry_point_snippets(config, &tree, content, extension));
    out
}

struct Declaration {
    name: String,
    start_byte: usize,
    end_byte: usize,
    /// The text up to the first `{`, used to detect references to other
    /// top-level declarations in parameters/return types/base clauses.
    signature_text: String,
}

impl Declaration {
    fn text(&self, source: &str) -> String {
        source[self.start_byte..self.end_byte].to_owned()
    }
}

fn collect_declarations(config: &TSLanguageConfig, tree: &tree_sitter::Tree, source: &str) -> Vec<Declaration> {
    let mut out = Vec::new();
    let mut seen: HashSet<(usize, usize)> = HashSet::new();

    for query_src in &config.declaration_query {
        let Ok(query) = Query::new((config.grammar)(), query_src) else {
            continue;
        };
        let name_idx = query.capture_names().iter().position(|n| n == "name");
        let decl_idx = query.capture_names().iter().position(|n| n == "declaration");
        let (Some(name_idx), Some(decl_idx)) = (name_idx, decl_idx) else {
            continue;
        };

        let mut cursor = QueryCursor::new();
        for m in cursor.matches(&query, tree.root_node(), source.as_bytes()) {
            let name_node = m.captures.iter().find(|c| c.index as usize == name_idx);
            let decl_node = m.captures.iter().find(|c| c.index as usize == decl_idx);
            let (Some(name_node), Some(decl_node)) = (name_node, decl_node) else {
                continue;
            };

            let range = (decl_node.node.start_byte(), decl_node.node.end_byte());
            if !seen.insert(range) {
                continue;
            }

            let signature_end = source[range.0..range.1]
                .find('{')
                .map(|i| range.0 + i)
                .unwrap_or(range.1);

            out.push(Declaration {
                name: source[name_node.node.start_byte()..name_node.node.end_byte()].to_owned(),
                start_byte: range.0,
                end_byte: range.1,
                signature_text: source[range.0..signature_end].to_owned(),
            });
        }
    }

    out
}

fn is_anonymous_like(name: &str) -> bool {
    matches!(name, "anonymous" | "default" | "")
}

/// Finds other top-level declaration names mentioned in `signature_text`,
/// as whole-word matches, excluding the declaration's own name.
fn referenced_declarations(signature_text: &str, own_name: &str, names: &[&str]) -> Vec<String> {
    let mut out = Vec::new();
    for &candidate in names {
        if candidate == own_name || candidate.is_empty() {
            continue;
        }
        if word_boundary_contains(signature_text, candidate) {
            out.push(candidate.to_owned());
        }
    }
    out
}

fn word_boundary_contains(haystack: &str, needle: &str) -> bool {
    let bytes = haystack.as_bytes();
    let needle_bytes = needle.as_bytes();
    if needle_bytes.is_empty() {
        return false;
    }
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';

    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let abs = start + pos;
        let before_ok = abs == 0 || !is_word(bytes[abs - 1]);
        let after = abs + needle_bytes.len();
        let after_ok = after >= bytes.len() || !is_word(bytes[after]);
        if before_ok && after_ok {
            return true;
        }
        start = abs + needle.len();
    }
    false
}

/// Replaces the body of every named function nested strictly inside
/// `decl` (and not `decl` itself) with `{ ... }`.
fn elide_nested_functions(
    config: &TSLanguageConfig,
    tree: &tree_sitter::Tree,
    source: &str,
    decl: &Declaration,
) -> String {
    let mut replacements: Vec<(usize, usize)> = Vec::new();

    for query_src in &config.function_query {
        let Ok(query) = Query::new((config.grammar)(), query_src) else {
            continue;
        };
        let body_idx = query.capture_names().iter().position(|n| n == "body");
        let func_idx = query.capture_names().iter().position(|n| n == "function");
        let Some(func_idx) = func_idx else { continue };
        let Some(body_idx) = body_idx else { continue };

        let mut cursor = QueryCursor::new();
        for m in cursor.matches(&query, tree.root_node(), source.as_bytes()) {
            let func_node = m.captures.iter().find(|c| c.index as usize == func_idx);
            let body_node = m.captures.iter().find(|c| c.index as usize == body_idx);
            let (Some(func_node), Some(body_node)) = (func_node, body_node) else {
                continue;
            };

            let fn_start = func_node.node.start_byte();
            let fn_end = func_node.node.end_byte();
            let is_self = fn_start == decl.start_byte && fn_end == decl.end_byte;
            let is_nested = fn_start >= decl.start_byte && fn_end <= decl.end_byte && !is_self;
            if is_nested {
                replacements.push((body_node.node.start_byte(), body_node.node.end_byte()));
            }
        }
    }

    replacements.sort_by_key(|(start, _)| *start);
    replacements.dedup();

    let mut out = String::new();
    let mut cursor_pos = decl.start_byte;
    for (start, end) in replacements {
        if start < cursor_pos || end > decl.end_byte {
            continue;
        }
        out.push_str(&source[cursor_pos..start]);
        out.push_str(ELISION_PLACEHOLDER);
        cursor_pos = end;
    }
    out.push_str(&source[cursor_pos..decl.end_byte]);
    out
}

/// Entry-point patterns: top-level call expressions invoking a handful of
/// well-known framework render/bootstrap functions. Emitted as their own
/// snippet regardless of whether they're already nested in another
/// declaration's text, since they're often the most useful search result
/// for "how is this app started" queries.
fn entry_point_snippets(
    config: &TSLanguageConfig,
    tree: &tree_sitter::Tree,
    source: &str,
    extension: &str,
) -> Vec<SlicedSnippet> {
    const ENTRY_POINT_CALLEES: &[&str] = &["ReactDOM.render", "createRoot", "render"];

    if !matches!(extension, "ts" | "tsx" | "js" | "jsx") {
        return Vec::new();
    }

    let Ok(query) = Query::new(
        (config.grammar)(),
        "(expression_statement (call_expression) @call) @stmt",
    ) else {
        return Vec::new();
    };
    let stmt_idx = match query.capture_names().iter().position(|n| n == "stmt") {
        Some(i) => i,
        None => return Vec::new(),
    };

    let root = tree.root_node();
    let mut out = Vec::new();
    let mut cursor = QueryCursor::new();

    for m in cursor.matches(&query, root, source.as_bytes()) {
        let Some(capture) = m.captures.iter().find(|c| c.index as usize == stmt_idx) else {
            continue;
        };
        if capture.node.parent().map(|p| p.id()) != Some(root.id()) {
            continue;
        }
        let text = &source[capture.node.start_byte()..capture.node.end_byte()];
        if ENTRY_POINT_CALLEES.iter().any(|callee| text.contains(callee)) {
            out.push(SlicedSnippet {
                content: text.to_owned(),
                extension: extension.to_owned(),
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_one_snippet_per_rust_function() {
        let source = r#"
fn hello() -> i32 {
    1
}

fn world() -> i32 {
    2
}
"#;
        let snippets = slice_file("rs", source);
        assert!(snippets.iter().any(|s| s.content.contains("fn hello")));
        assert!(snippets.iter().any(|s| s.content.contains("fn world")));
    }

    #[test]
    fn elides_nested_function_bodies() {
        let source = r#"
fn outer() {
    fn inner() {
        let x = 1;
        let y = 2;
    }
    inner();
}
"#;
        let snippets = slice_file("rs", source);
        let outer = snippets
            .iter()
            .find(|s| s.content.contains("fn outer"))
            .unwrap();
        assert!(outer.content.contains("fn inner"));
        assert!(!outer.content.contains("let x = 1"));
        assert!(outer.content.contains(ELISION_PLACEHOLDER));
    }

    #[test]
    fn prepends_referenced_top_level_struct() {
        let source = r#"
struct Config {
    name: String,
}

fn load(cfg: Config) -> Config {
    cfg
}
"#;
        let snippets = slice_file("rs", source);
        let load = snippets
            .iter()
            .find(|s| s.content.contains("fn load"))
            .unwrap();
        assert!(load.content.contains("struct Config"));
    }

    #[test]
    fn skips_declarations_with_anonymous_names() {
        assert!(is_anonymous_like("anonymous"));
        assert!(is_anonymous_like("default"));
        assert!(is_anonymous_like(""));
        assert!(!is_anonymous_like("hello"));
    }
}
