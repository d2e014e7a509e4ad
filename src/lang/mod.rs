//! Frontend for the flow dialect: lexer, AST, recursive-descent parser.
//!
//! The dialect is the statically-typed, `await`-based language flows are
//! written in. Only the subset the flow analyzer consumes is modeled;
//! everything else is skipped with a diagnostic where that matters.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::{Expression, FunctionDecl, Item, Module, Pattern, Statement};
pub use token::{SourceFile, Span};

use crate::diagnostics::Diagnostics;

/// Lex and parse one source file, accumulating problems in `diagnostics`.
pub fn parse_source(file: &SourceFile, diagnostics: &mut Diagnostics) -> Module {
    let tokens = lexer::Lexer::new(file).tokenize(diagnostics);
    parser::Parser::new(file, tokens, diagnostics).parse_module()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_source_is_deterministic() {
        let source = r#"
/** @flow */
export async function main() {
  const x = await stepA();
  if (x.ok) { await stepB(); }
}
"#;
        let file = SourceFile::new("main.ts", source);
        let mut d1 = Diagnostics::new();
        let mut d2 = Diagnostics::new();
        let first = parse_source(&file, &mut d1);
        let second = parse_source(&file, &mut d2);
        assert_eq!(first, second);
        assert_eq!(d1.records(), d2.records());
    }
}
