use once_cell::sync::OnceCell;
use tree_sitter::Query;

use super::LanguageGrammar;

pub struct PythonGrammar;

// Static query caches for Python
static PYTHON_SPANS_QUERY: OnceCell<Query> = OnceCell::new();
static PYTHON_USAGES_QUERY: OnceCell<Query> = OnceCell::new();

impl LanguageGrammar for PythonGrammar {
    fn name(&self) -> &'static str {
        "python"
    }

    fn file_extensions(&self) -> &[&'static str] {
        &["py", "pyi"]
    }

    fn language(&self) -> tree_sitter::Language {
        tree_sitter_python::LANGUAGE.into()
    }

    fn spans_query(&self) -> &str {
        r#"
        (function_definition
            name: (identifier) @name
        ) @function

        (class_definition
            body: (block
                (function_definition
                    name: (identifier) @method_name
                ) @method
            )
        )

        (class_definition
            name: (identifier) @name
        ) @class
        "#
    }

    fn usages_query(&self) -> &str {
        r#"
        ; Function calls
        (call
            function: (identifier) @call_name
        ) @call

        ; Method and attribute calls
        (call
            function: (attribute
                attribute: (identifier) @call_name
            )
        ) @call

        ; Type annotations
        (type
            (identifier) @ref_name
        )
        "#
    }

    fn cached_spans_query(&self) -> Option<&'static Query> {
        PYTHON_SPANS_QUERY
            .get_or_try_init(|| Query::new(&self.language(), self.spans_query()))
            .ok()
    }

    fn cached_usages_query(&self) -> Option<&'static Query> {
        PYTHON_USAGES_QUERY
            .get_or_try_init(|| Query::new(&self.language(), self.usages_query()))
            .ok()
    }
}
