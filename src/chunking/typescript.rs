use crate::chunking::languages::TSLanguageConfig;

pub fn typescript_language_config() -> TSLanguageConfig {
    TSLanguageConfig {
        language_ids: &["Typescript", "TSX", "typescript", "tsx"],
        file_extensions: &["ts", "tsx", "jsx", "mjs"],
        grammar: tree_sitter_typescript::language_tsx,
        namespaces: vec![
            "constant",
            "variable",
            "property",
            "parameter",
            // functions
            "function",
            "method",
            "generator",
            // types
            "alias",
            "enum",
            "enumerator",
            "class",
            "interface",
            // misc.
            "label",
        ]
        .into_iter()
        .map(|s| s.to_owned())
        .collect(),
        function_query: vec!["[
        (function
            name: (identifier)? @identifier
            body: (statement_block) @body)
        (function_declaration
            name: (identifier)? @identifier
            body: (statement_block) @body)
        (generator_function
            name: (identifier)? @identifier
            body: (statement_block) @body)
        (generator_function_declaration
            name: (identifier)? @identifier
            body: (statement_block) @body)
        (method_definition
            name: (property_identifier)? @identifier
            body: (statement_block) @body)
        (arrow_function
            body: (statement_block) @body)
        ] @function"
            .to_owned()],
        declaration_query: vec![
            "(function_declaration
                name: (identifier) @name) @declaration"
                .to_owned(),
            "(class_declaration
                name: (type_identifier) @name) @declaration"
                .to_owned(),
            "(interface_declaration
                name: (type_identifier) @name) @declaration"
                .to_owned(),
            "(method_definition
                name: (property_identifier) @name) @declaration"
                .to_owned(),
            "(variable_declarator
                name: (identifier) @name
                value: (arrow_function)) @declaration"
                .to_owned(),
        ],
    }
}
