use once_cell::sync::OnceCell;
use tree_sitter::Query;

use super::LanguageGrammar;

pub struct RustGrammar;

// Static query caches for Rust
static RUST_SPANS_QUERY: OnceCell<Query> = OnceCell::new();
static RUST_USAGES_QUERY: OnceCell<Query> = OnceCell::new();

impl LanguageGrammar for RustGrammar {
    fn name(&self) -> &'static str {
        "rust"
    }

    fn file_extensions(&self) -> &[&'static str] {
        &["rs"]
    }

    fn language(&self) -> tree_sitter::Language {
        tree_sitter_rust::LANGUAGE.into()
    }

    fn spans_query(&self) -> &str {
        r#"
        (function_item
            name: (identifier) @name
        ) @function

        (impl_item
            body: (declaration_list
                (function_item
                    name: (identifier) @method_name
                ) @method
            )
        )

        (struct_item
            name: (type_identifier) @name
        ) @class

        (enum_item
            name: (type_identifier) @name
        ) @class

        (trait_item
            name: (type_identifier) @name
        ) @class
        "#
    }

    fn usages_query(&self) -> &str {
        r#"
        ; Plain function calls
        (call_expression
            function: (identifier) @call_name
        ) @call

        ; Method calls
        (call_expression
            function: (field_expression
                field: (field_identifier) @call_name
            )
        ) @call

        ; Path-qualified calls
        (call_expression
            function: (scoped_identifier
                name: (identifier) @call_name
            )
        ) @call

        ; Macro invocations
        (macro_invocation
            macro: (identifier) @call_name
        ) @call

        ; Type usages
        (type_identifier) @ref_name
        "#
    }

    fn cached_spans_query(&self) -> Option<&'static Query> {
        RUST_SPANS_QUERY
            .get_or_try_init(|| Query::new(&self.language(), self.spans_query()))
            .ok()
    }

    fn cached_usages_query(&self) -> Option<&'static Query> {
        RUST_USAGES_QUERY
            .get_or_try_init(|| Query::new(&self.language(), self.usages_query()))
            .ok()
    }
}
