use std::collections::{BTreeMap, HashSet};

use tree_sitter::StreamingIterator;

use crate::error::{AtlasError, Result};
use crate::indexer::parser::ParsedFile;
use crate::store::{EdgeKind, Span, SpanKind, UsageEdge};

/// Output of extraction for one file: spans plus the usage edges whose
/// caller lies in this file. Callee span ids are resolved later, once all
/// files have been indexed.
#[derive(Debug, Default)]
pub struct ExtractionResult {
    pub spans: Vec<Span>,
    pub edges: Vec<UsageEdge>,
}

pub struct SpanExtractor;

impl SpanExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, parsed: &ParsedFile, file_path: &str) -> Result<ExtractionResult> {
        let spans = self.extract_spans(parsed, file_path)?;
        let edges = self.extract_edges(parsed, &spans)?;
        Ok(ExtractionResult { spans, edges })
    }

    fn extract_spans(&self, parsed: &ParsedFile, file_path: &str) -> Result<Vec<Span>> {
        let compiled;
        let query = match parsed.grammar.cached_spans_query() {
            Some(query) => query,
            None => {
                compiled =
                    tree_sitter::Query::new(&parsed.grammar.language(), parsed.grammar.spans_query())
                        .map_err(|e| AtlasError::Parse(format!("invalid spans query: {e}")))?;
                &compiled
            }
        };

        let mut cursor = tree_sitter::QueryCursor::new();
        let mut matches = cursor.matches(query, parsed.root_node(), parsed.source_bytes());

        // Keyed by byte range so the impl-body pattern can upgrade a
        // function capture to a method without duplicating the span.
        let mut collected: BTreeMap<(u32, u32), (SpanKind, Option<String>, u32, u32)> =
            BTreeMap::new();

        while let Some(m) = matches.next() {
            let mut name: Option<String> = None;
            let mut kind: Option<SpanKind> = None;
            let mut node: Option<tree_sitter::Node> = None;

            for capture in m.captures {
                let capture_name = query.capture_names()[capture.index as usize];
                match capture_name {
                    "name" => name = Some(parsed.node_text(&capture.node).to_string()),
                    "method_name" => {
                        name = Some(parsed.node_text(&capture.node).to_string());
                        kind = Some(SpanKind::Method);
                    }
                    "function" => {
                        node = Some(capture.node);
                        kind.get_or_insert(SpanKind::Function);
                    }
                    "method" => {
                        node = Some(capture.node);
                        kind = Some(SpanKind::Method);
                    }
                    "class" => {
                        node = Some(capture.node);
                        kind.get_or_insert(SpanKind::Class);
                    }
                    _ => {}
                }
            }

            let (Some(node), Some(kind)) = (node, kind) else {
                continue;
            };
            let range = (node.start_byte() as u32, node.end_byte() as u32);
            let start_line = node.start_position().row as u32 + 1;
            let end_line = node.end_position().row as u32 + 1;

            collected
                .entry(range)
                .and_modify(|entry| {
                    if kind == SpanKind::Method {
                        entry.0 = SpanKind::Method;
                    }
                    if entry.1.is_none() {
                        entry.1 = name.clone();
                    }
                })
                .or_insert((kind, name, start_line, end_line));
        }

        // Span ranges within one file must not overlap for the same kind;
        // nested definitions keep only the outermost span.
        let mut spans = Vec::new();
        let mut outer_end: BTreeMap<&str, u32> = BTreeMap::new();
        for (&(start_byte, end_byte), (kind, name, start_line, end_line)) in &collected {
            let kind_key = kind.as_str();
            if outer_end.get(kind_key).is_some_and(|&end| start_byte < end) {
                continue;
            }
            outer_end.insert(kind_key, end_byte);

            let source = parsed
                .source
                .get(start_byte as usize..end_byte as usize)
                .unwrap_or("");
            spans.push(Span::new(
                file_path,
                *kind,
                name.clone(),
                *start_line,
                *end_line,
                start_byte,
                end_byte,
                source,
            ));
        }

        Ok(spans)
    }

    fn extract_edges(&self, parsed: &ParsedFile, spans: &[Span]) -> Result<Vec<UsageEdge>> {
        let compiled;
        let query = match parsed.grammar.cached_usages_query() {
            Some(query) => query,
            None => {
                compiled =
                    tree_sitter::Query::new(&parsed.grammar.language(), parsed.grammar.usages_query())
                        .map_err(|e| AtlasError::Parse(format!("invalid usages query: {e}")))?;
                &compiled
            }
        };

        let mut cursor = tree_sitter::QueryCursor::new();
        let mut matches = cursor.matches(query, parsed.root_node(), parsed.source_bytes());

        let mut edges = Vec::new();
        let mut seen = HashSet::new();

        while let Some(m) = matches.next() {
            for capture in m.captures {
                let capture_name = query.capture_names()[capture.index as usize];
                let kind = match capture_name {
                    "call_name" => EdgeKind::StaticCall,
                    "ref_name" => EdgeKind::Reference,
                    _ => continue,
                };

                let symbol = parsed.node_text(&capture.node).to_string();
                let offset = capture.node.start_byte() as u32;
                let line = capture.node.start_position().row as u32 + 1;

                let Some(caller) = enclosing_span(spans, offset) else {
                    continue;
                };
                // A definition mentioning its own name is not a usage.
                if caller.symbol.as_deref() == Some(symbol.as_str()) {
                    continue;
                }

                if seen.insert((caller.id.clone(), symbol.clone(), kind, line)) {
                    edges.push(UsageEdge {
                        caller_span_id: caller.id.clone(),
                        callee_symbol: symbol,
                        callee_span_id: None,
                        kind,
                        line,
                    });
                }
            }
        }

        Ok(edges)
    }
}

impl Default for SpanExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Smallest span whose byte range contains `offset`.
fn enclosing_span(spans: &[Span], offset: u32) -> Option<&Span> {
    spans
        .iter()
        .filter(|s| s.start_byte <= offset && offset < s.end_byte)
        .min_by_key(|s| s.end_byte - s.start_byte)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::parser::SourceParser;
    use crate::languages::LanguageRegistry;

    fn extract(language: &str, source: &str) -> ExtractionResult {
        let registry = LanguageRegistry::new();
        let grammar = registry.get_by_name(language).unwrap();
        let parsed = SourceParser::new(LanguageRegistry::new())
            .parse_source(source, grammar)
            .unwrap();
        SpanExtractor::new().extract(&parsed, "test_file").unwrap()
    }

    #[test]
    fn test_extract_rust_functions_and_types() {
        let result = extract(
            "rust",
            r#"
pub struct Session;

fn login(session: Session) {
    verify(session)
}

fn verify(_session: Session) {}
"#,
        );

        let symbols: Vec<_> = result
            .spans
            .iter()
            .map(|s| s.symbol.clone().unwrap())
            .collect();
        assert!(symbols.contains(&"Session".to_string()));
        assert!(symbols.contains(&"login".to_string()));
        assert!(symbols.contains(&"verify".to_string()));

        let call = result
            .edges
            .iter()
            .find(|e| e.kind == EdgeKind::StaticCall && e.callee_symbol == "verify")
            .expect("login -> verify call edge");
        let login = result
            .spans
            .iter()
            .find(|s| s.symbol.as_deref() == Some("login"))
            .unwrap();
        assert_eq!(call.caller_span_id, login.id);
    }

    #[test]
    fn test_extract_rust_methods() {
        let result = extract(
            "rust",
            r#"
struct Counter;

impl Counter {
    fn bump(&mut self) {}
}
"#,
        );

        let method = result
            .spans
            .iter()
            .find(|s| s.symbol.as_deref() == Some("bump"))
            .unwrap();
        assert_eq!(method.kind, SpanKind::Method);
    }

    #[test]
    fn test_extract_reference_edges() {
        let result = extract(
            "rust",
            r#"
struct Token;

fn issue() -> Token {
    Token
}
"#,
        );

        assert!(result
            .edges
            .iter()
            .any(|e| e.kind == EdgeKind::Reference && e.callee_symbol == "Token"));
        // The struct definition itself must not reference its own name.
        let token_span = result
            .spans
            .iter()
            .find(|s| s.symbol.as_deref() == Some("Token"))
            .unwrap();
        assert!(!result
            .edges
            .iter()
            .any(|e| e.caller_span_id == token_span.id && e.callee_symbol == "Token"));
    }

    #[test]
    fn test_extract_python() {
        let result = extract(
            "python",
            r#"
class Session:
    def refresh(self):
        fetch()

def fetch():
    pass
"#,
        );

        let kinds: Vec<_> = result.spans.iter().map(|s| s.kind).collect();
        assert!(kinds.contains(&SpanKind::Class));
        assert!(kinds.contains(&SpanKind::Method));
        assert!(kinds.contains(&SpanKind::Function));
        assert!(result
            .edges
            .iter()
            .any(|e| e.kind == EdgeKind::StaticCall && e.callee_symbol == "fetch"));
    }

    #[test]
    fn test_extract_typescript() {
        let result = extract(
            "typescript",
            r#"
class Widget {
    render(): void {
        draw();
    }
}

function draw(): void {}
"#,
        );

        assert!(result.spans.iter().any(|s| s.kind == SpanKind::Class));
        assert!(result
            .edges
            .iter()
            .any(|e| e.kind == EdgeKind::StaticCall && e.callee_symbol == "draw"));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let source = r#"
fn alpha() { beta() }
fn beta() {}
"#;
        let first = extract("rust", source);
        let second = extract("rust", source);

        let ids = |result: &ExtractionResult| {
            result.spans.iter().map(|s| s.id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.edges.len(), second.edges.len());
    }

    #[test]
    fn test_nested_functions_keep_outer_span() {
        let result = extract(
            "rust",
            r#"
fn outer() {
    fn inner() {}
    inner()
}
"#,
        );

        let functions: Vec<_> = result
            .spans
            .iter()
            .filter(|s| s.kind == SpanKind::Function)
            .collect();
        assert_eq!(functions.len(), 1);
        assert_eq!(functions[0].symbol.as_deref(), Some("outer"));
    }
}
