//! Single-hop traversal over the persisted symbol usage graph.
//!
//! Multi-hop lineage is the caller's responsibility to chain; keeping each
//! call to one hop means cyclic call graphs can never recurse unboundedly.

use crate::error::Result;
use crate::store::{Span, SqliteStore};

pub struct SymbolGraph<'a> {
    store: &'a SqliteStore,
}

impl<'a> SymbolGraph<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self { store }
    }

    /// Direct callers and referencers of `symbol` (exact name match),
    /// most recently indexed first, ties by file path then start line.
    pub fn upstream(&self, symbol: &str, limit: usize) -> Result<Vec<Span>> {
        self.store.upstream_spans(symbol, limit)
    }

    /// Direct callees and referenced spans of any span named `symbol`.
    pub fn downstream(&self, symbol: &str, limit: usize) -> Result<Vec<Span>> {
        self.store.downstream_spans(symbol, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EdgeKind, FileRecord, FileStatus, Span, SpanKind, UsageEdge};

    fn span(path: &str, symbol: &str, line: u32) -> Span {
        Span::new(
            path,
            SpanKind::Function,
            Some(symbol.to_string()),
            line,
            line + 2,
            line * 50,
            line * 50 + 40,
            format!("fn {symbol}() {{}}"),
        )
    }

    fn file(path: &str) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            content_hash: "h".to_string(),
            last_seen_commit: None,
            status: FileStatus::Ok,
            error: None,
        }
    }

    fn edge(caller: &Span, callee: &str, line: u32) -> UsageEdge {
        UsageEdge {
            caller_span_id: caller.id.clone(),
            callee_symbol: callee.to_string(),
            callee_span_id: None,
            kind: EdgeKind::StaticCall,
            line,
        }
    }

    #[test]
    fn test_cycle_terminates_per_hop() {
        // A calls B, B calls A: each hop returns, no recursion.
        let store = SqliteStore::in_memory().unwrap();
        let a = span("src/a.rs", "alpha", 1);
        let b = span("src/b.rs", "beta", 1);
        store
            .replace_file_spans(&file("src/a.rs"), &[a.clone()], &[edge(&a, "beta", 2)])
            .unwrap();
        store
            .replace_file_spans(&file("src/b.rs"), &[b.clone()], &[edge(&b, "alpha", 2)])
            .unwrap();
        store.resolve_edges().unwrap();

        let graph = SymbolGraph::new(&store);
        assert_eq!(graph.upstream("alpha", 10).unwrap()[0].id, b.id);
        assert_eq!(graph.upstream("beta", 10).unwrap()[0].id, a.id);
        assert_eq!(graph.downstream("alpha", 10).unwrap()[0].id, b.id);
        assert_eq!(graph.downstream("beta", 10).unwrap()[0].id, a.id);
    }

    #[test]
    fn test_limit_and_tie_order() {
        let store = SqliteStore::in_memory().unwrap();
        let target = span("src/t.rs", "target", 1);
        store.replace_file_spans(&file("src/t.rs"), &[target], &[]).unwrap();

        // Three callers sharing one indexed_at second: path order decides.
        for path in ["src/c.rs", "src/a.rs", "src/b.rs"] {
            let mut caller = span(path, "caller", 1);
            caller.indexed_at = 1700000000;
            store
                .replace_file_spans(&file(path), &[caller.clone()], &[edge(&caller, "target", 2)])
                .unwrap();
        }
        store.resolve_edges().unwrap();

        let graph = SymbolGraph::new(&store);
        let callers = graph.upstream("target", 2).unwrap();
        assert_eq!(callers.len(), 2);
        assert_eq!(callers[0].file_path, "src/a.rs");
        assert_eq!(callers[1].file_path, "src/b.rs");
    }

    #[test]
    fn test_unknown_symbol_is_empty() {
        let store = SqliteStore::in_memory().unwrap();
        let graph = SymbolGraph::new(&store);
        assert!(graph.upstream("nothing", 10).unwrap().is_empty());
        assert!(graph.downstream("nothing", 10).unwrap().is_empty());
    }
}
