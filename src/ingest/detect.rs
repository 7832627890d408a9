//! Language detection by file extension.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Source language handled by one extractor family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    CSharp,
    JavaScript,
    TypeScript,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::CSharp,
        Language::JavaScript,
        Language::TypeScript,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::CSharp => "csharp",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Concrete tree-sitter grammar. TSX needs its own grammar even though it is
/// handled by the TypeScript extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grammar {
    Python,
    CSharp,
    JavaScript,
    TypeScript,
    Tsx,
}

impl Grammar {
    pub fn for_path(path: &Path) -> Option<Grammar> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "py" => Some(Grammar::Python),
            "cs" => Some(Grammar::CSharp),
            "js" | "jsx" | "mjs" | "cjs" => Some(Grammar::JavaScript),
            "ts" | "mts" | "cts" => Some(Grammar::TypeScript),
            "tsx" => Some(Grammar::Tsx),
            _ => None,
        }
    }

    pub fn language(&self) -> Language {
        match self {
            Grammar::Python => Language::Python,
            Grammar::CSharp => Language::CSharp,
            Grammar::JavaScript => Language::JavaScript,
            Grammar::TypeScript | Grammar::Tsx => Language::TypeScript,
        }
    }
}

/// Detect the language of a source file from its extension.
///
/// Returns `None` for files no extractor handles.
pub fn detect_language(path: &Path) -> Option<Language> {
    Grammar::for_path(path).map(|g| g.language())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language(Path::new("a/b.py")), Some(Language::Python));
        assert_eq!(detect_language(Path::new("Program.cs")), Some(Language::CSharp));
        for ext in ["js", "jsx", "mjs", "cjs"] {
            let name = format!("index.{}", ext);
            assert_eq!(
                detect_language(Path::new(&name)),
                Some(Language::JavaScript)
            );
        }
        assert_eq!(detect_language(Path::new("App.tsx")), Some(Language::TypeScript));
        assert_eq!(detect_language(Path::new("README.md")), None);
        assert_eq!(detect_language(Path::new("Makefile")), None);
    }

    #[test]
    fn test_tsx_uses_tsx_grammar() {
        assert_eq!(Grammar::for_path(Path::new("App.tsx")), Some(Grammar::Tsx));
        assert_eq!(
            Grammar::for_path(Path::new("app.ts")),
            Some(Grammar::TypeScript)
        );
    }
}
