//! JavaScript 语法信息

use super::SyntaxInfo;
use super::javascript::JavaScriptLanguage;

pub(crate) const RESERVED_WORDS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for", "function",
    "if", "implements", "import", "in", "instanceof", "interface", "let", "new", "null",
    "package", "private", "protected", "public", "return", "static", "super", "switch", "this",
    "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield", "async", "of",
    "get", "set", "undefined", "NaN", "Infinity",
];

const CONTROL_FLOW_KEYWORDS: &[&str] = &[
    "if", "else", "switch", "case", "default", "do", "while", "for", "break", "continue",
    "return", "throw", "try", "catch", "finally", "await", "yield",
];

const COMMENT_DELIMITERS: &[&str] = &["//", "/* */"];

const STRING_DELIMITERS: &[&str] = &["\" \"", "' '", "` `"];

impl SyntaxInfo for JavaScriptLanguage {
    fn reserved_words(&self) -> &[&'static str] {
        RESERVED_WORDS
    }

    fn comment_delimiters(&self) -> &[&'static str] {
        COMMENT_DELIMITERS
    }

    fn string_delimiters(&self) -> &[&'static str] {
        STRING_DELIMITERS
    }

    fn is_control_flow_keyword(&self, keyword: &str) -> bool {
        CONTROL_FLOW_KEYWORDS.contains(&keyword)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BinderConfig;

    #[test]
    fn test_keywords() {
        let language = JavaScriptLanguage::new(BinderConfig::default());
        assert!(language.is_reserved_word("class"));
        assert!(!language.is_reserved_word("speed"));
        assert!(language.is_control_flow_keyword("return"));
        assert!(!language.is_control_flow_keyword("class"));
        assert!(language.comment_delimiters().contains(&"//"));
        assert_eq!(language.string_delimiters().len(), 3);
    }

    #[test]
    fn test_control_flow_keywords_are_reserved() {
        for keyword in CONTROL_FLOW_KEYWORDS {
            assert!(RESERVED_WORDS.contains(keyword), "{}", keyword);
        }
    }
}
