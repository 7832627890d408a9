//! Thread-local parser pool for reusing tree-sitter Parser instances.
//!
//! Extraction runs on a rayon pool, so each worker thread keeps one parser per
//! grammar, created lazily on first use. No locks: RefCell gives the owning
//! thread mutable access.
//!
//! Every parse runs under a timeout. A parse that hits the timeout (or is
//! otherwise abandoned by tree-sitter) is an [`ExtractError::Timeout`]; the
//! parser is reset so the next file starts clean.

use std::cell::RefCell;
use std::thread::LocalKey;
use std::time::Duration;

use super::detect::Grammar;
use super::ExtractError;

type ParserSlot = RefCell<Option<tree_sitter::Parser>>;

thread_local! {
    static PYTHON_PARSER: ParserSlot = const { RefCell::new(None) };
    static CSHARP_PARSER: ParserSlot = const { RefCell::new(None) };
    static JAVASCRIPT_PARSER: ParserSlot = const { RefCell::new(None) };
    static TYPESCRIPT_PARSER: ParserSlot = const { RefCell::new(None) };
    static TSX_PARSER: ParserSlot = const { RefCell::new(None) };
}

fn grammar_language(grammar: Grammar) -> tree_sitter::Language {
    match grammar {
        Grammar::Python => tree_sitter_python::language(),
        Grammar::CSharp => tree_sitter_c_sharp::language(),
        Grammar::JavaScript => tree_sitter_javascript::language(),
        Grammar::TypeScript => tree_sitter_typescript::language_typescript(),
        Grammar::Tsx => tree_sitter_typescript::language_tsx(),
    }
}

fn slot(grammar: Grammar) -> &'static LocalKey<ParserSlot> {
    match grammar {
        Grammar::Python => &PYTHON_PARSER,
        Grammar::CSharp => &CSHARP_PARSER,
        Grammar::JavaScript => &JAVASCRIPT_PARSER,
        Grammar::TypeScript => &TYPESCRIPT_PARSER,
        Grammar::Tsx => &TSX_PARSER,
    }
}

/// Run `f` with this thread's parser for `grammar`.
pub fn with_parser<F, R>(grammar: Grammar, f: F) -> Result<R, ExtractError>
where
    F: FnOnce(&mut tree_sitter::Parser) -> R,
{
    slot(grammar).with(|cell| {
        let mut parser_ref = cell.borrow_mut();
        if parser_ref.is_none() {
            let mut parser = tree_sitter::Parser::new();
            parser
                .set_language(&grammar_language(grammar))
                .map_err(|e| ExtractError::Language(format!("{:?}: {}", grammar, e)))?;
            *parser_ref = Some(parser);
        }
        match parser_ref.as_mut() {
            Some(parser) => Ok(f(parser)),
            None => Err(ExtractError::Language(format!("{:?}: parser unavailable", grammar))),
        }
    })
}

/// Parse `source` with the pooled parser for `grammar`.
///
/// A zero timeout disables the limit.
pub fn parse(
    grammar: Grammar,
    source: &[u8],
    timeout: Duration,
) -> Result<tree_sitter::Tree, ExtractError> {
    with_parser(grammar, |parser| {
        parser.set_timeout_micros(timeout_micros(timeout));
        let tree = parser.parse(source, None);
        if tree.is_none() {
            parser.reset();
        }
        tree
    })?
    .ok_or(ExtractError::Timeout(timeout))
}

/// Timeout in microseconds, saturating at `u64::MAX`.
fn timeout_micros(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_is_reused_per_thread() {
        let first = parse(Grammar::Python, b"def f():\n    pass\n", Duration::ZERO).unwrap();
        let second = parse(Grammar::Python, b"class A:\n    pass\n", Duration::ZERO).unwrap();
        assert_eq!(first.root_node().kind(), "module");
        assert_eq!(second.root_node().kind(), "module");
    }

    #[test]
    fn test_oversized_timeout_saturates() {
        assert_eq!(timeout_micros(Duration::from_millis(10)), 10_000);
        assert_eq!(timeout_micros(Duration::MAX), u64::MAX);
        let tree = parse(Grammar::Python, b"def f():\n    pass\n", Duration::MAX).unwrap();
        assert_eq!(tree.root_node().kind(), "module");
    }

    #[test]
    fn test_every_grammar_loads() {
        let samples: [(Grammar, &[u8]); 5] = [
            (Grammar::Python, b"x = 1\n"),
            (Grammar::CSharp, b"class A {}\n"),
            (Grammar::JavaScript, b"const a = 1;\n"),
            (Grammar::TypeScript, b"let a: number = 1;\n"),
            (Grammar::Tsx, b"const el = <div />;\n"),
        ];
        for (grammar, src) in samples {
            let tree = parse(grammar, src, Duration::from_secs(5)).unwrap();
            assert!(!tree.root_node().has_error(), "{:?} failed", grammar);
        }
    }
}
