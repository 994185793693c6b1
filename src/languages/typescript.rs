use once_cell::sync::OnceCell;
use tree_sitter::Query;

use super::LanguageGrammar;

pub struct TypeScriptGrammar;

// Static query caches for TypeScript
static TS_SPANS_QUERY: OnceCell<Query> = OnceCell::new();
static TS_USAGES_QUERY: OnceCell<Query> = OnceCell::new();

impl LanguageGrammar for TypeScriptGrammar {
    fn name(&self) -> &'static str {
        "typescript"
    }

    fn file_extensions(&self) -> &[&'static str] {
        &["ts", "tsx", "js", "jsx"]
    }

    fn language(&self) -> tree_sitter::Language {
        tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
    }

    fn spans_query(&self) -> &str {
        r#"
        (function_declaration
            name: (identifier) @name
        ) @function

        (method_definition
            name: (property_identifier) @method_name
        ) @method

        (class_declaration
            name: (type_identifier) @name
        ) @class

        (interface_declaration
            name: (type_identifier) @name
        ) @class

        (enum_declaration
            name: (identifier) @name
        ) @class
        "#
    }

    fn usages_query(&self) -> &str {
        r#"
        ; Function calls
        (call_expression
            function: (identifier) @call_name
        ) @call

        ; Method calls
        (call_expression
            function: (member_expression
                property: (property_identifier) @call_name
            )
        ) @call

        ; Constructor calls
        (new_expression
            constructor: (identifier) @call_name
        ) @call

        ; Type annotations
        (type_identifier) @ref_name
        "#
    }

    fn cached_spans_query(&self) -> Option<&'static Query> {
        TS_SPANS_QUERY
            .get_or_try_init(|| Query::new(&self.language(), self.spans_query()))
            .ok()
    }

    fn cached_usages_query(&self) -> Option<&'static Query> {
        TS_USAGES_QUERY
            .get_or_try_init(|| Query::new(&self.language(), self.usages_query()))
            .ok()
    }
}
