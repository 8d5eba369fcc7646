/// We want to parse the rust language here and provide the language config
/// for it
use crate::chunking::languages::TSLanguageConfig;

pub fn rust_language_config() -> TSLanguageConfig {
    TSLanguageConfig {
        language_ids: &["Rust", "rust"],
        file_extensions: &["rs"],
        grammar: tree_sitter_rust::language,
        namespaces: vec![
            "const",
            "var",
            "func",
            "module",
            "struct",
            "interface",
            "type",
            "member",
            "label",
        ]
        .into_iter()
        .map(|s| s.to_owned())
        .collect(),
        function_query: vec!["(function_item
            name: (identifier) @identifier
            body: (block) @body) @function"
            .to_owned()],
        declaration_query: vec![
            "(function_item
                name: (identifier) @name) @declaration"
                .to_owned(),
            "(struct_item
                name: (type_identifier) @name) @declaration"
                .to_owned(),
            "(enum_item
                name: (type_identifier) @name) @declaration"
                .to_owned(),
            "(trait_item
                name: (type_identifier) @name) @declaration"
                .to_owned(),
            "(impl_item
                type: (type_identifier) @name) @declaration"
                .to_owned(),
        ],
    }
}
