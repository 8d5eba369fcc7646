use super::{
    javascript::javascript_language_config, python::python_language_config,
    rust::rust_language_config, typescript::typescript_language_config,
};

/// Per-language tree-sitter wiring used by the declaration slicer.
#[derive(Debug, Clone)]
pub struct TSLanguageConfig {
    /// A list of language names that can be processed by these scope queries
    /// e.g.: ["Typescript", "TSX"], ["Rust"]
    pub language_ids: &'static [&'static str],

    /// Extensions that can help classify the file: rs, js, tx, py, etc
    pub file_extensions: &'static [&'static str],

    /// tree-sitter grammar for this language
    pub grammar: fn() -> tree_sitter::Language,

    /// Namespaces defined by this language,
    /// E.g.: type namespace, variable namespace, function namespace
    pub namespaces: Vec<String>,

    /// The queries to get the function body for the language, used to find
    /// and elide nested function bodies inside a sliced declaration.
    pub function_query: Vec<String>,

    /// Queries identifying top-level declarations worth slicing into their
    /// own snippet: functions, methods, classes, type/interface
    /// declarations. Each match must capture `@name` (the declaration's
    /// identifier) and `@declaration` (the full node).
    pub declaration_query: Vec<String>,
}

impl TSLanguageConfig {
    pub fn get_language(&self) -> Option<String> {
        self.language_ids.first().map(|s| s.to_string())
    }
}

#[derive(Clone)]
pub struct TSLanguageParsing {
    configs: Vec<TSLanguageConfig>,
}

impl TSLanguageParsing {
    pub fn init() -> Self {
        Self {
            configs: vec![
                javascript_language_config(),
                typescript_language_config(),
                rust_language_config(),
                python_language_config(),
            ],
        }
    }

    pub fn for_lang(&self, language: &str) -> Option<&TSLanguageConfig> {
        self.configs
            .iter()
            .find(|config| config.language_ids.contains(&language))
    }

    pub fn configs_iter(&self) -> impl Iterator<Item = &TSLanguageConfig> {
        self.configs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::TSLanguageParsing;

    #[test]
    fn init_registers_all_four_languages() {
        let parsing = TSLanguageParsing::init();
        for lang in ["rust", "python", "javascript", "typescript"] {
            assert!(parsing.for_lang(lang).is_some(), "missing config for {lang}");
        }
    }

    #[test]
    fn for_lang_resolves_by_any_registered_id() {
        let parsing = TSLanguageParsing::init();
        let ts = parsing.for_lang("typescript").unwrap();
        assert!(ts.file_extensions.contains(&"tsx"));
    }
}
