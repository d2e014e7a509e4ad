//! Recursive-descent parser for the flow dialect.
//!
//! The parser never aborts a file: a malformed statement is reported as an
//! error diagnostic and the parser resynchronizes at the next statement
//! boundary, so sibling declarations still analyze.

use crate::diagnostics::Diagnostics;

use super::ast::{
    BinaryOp, Block, CatchClause, Expression, FunctionDecl, ImportDecl, ImportedName, Item,
    Module, Param, Pattern, Statement, UnaryOp,
};
use super::token::{Keyword, SourceFile, Span, Token, TokenKind};

/// Errors are reported through the diagnostics sink as they happen; the
/// `Err` side only signals "give up on this construct".
type Parse<T> = Result<T, ()>;

pub struct Parser<'a> {
    file: &'a SourceFile,
    tokens: Vec<Token>,
    pos: usize,
    diagnostics: &'a mut Diagnostics,
}

impl<'a> Parser<'a> {
    pub fn new(file: &'a SourceFile, tokens: Vec<Token>, diagnostics: &'a mut Diagnostics) -> Self {
        Self {
            file,
            tokens,
            pos: 0,
            diagnostics,
        }
    }

    pub fn parse_module(mut self) -> Module {
        let mut module = Module::default();
        let mut pending_doc: Option<String> = None;

        while !self.at_eof() {
            match self.peek_kind().clone() {
                TokenKind::DocComment(body) => {
                    self.advance();
                    pending_doc = Some(body);
                }
                TokenKind::Keyword(Keyword::Import) => {
                    pending_doc = None;
                    if let Ok(import) = self.import_decl() {
                        module.items.push(Item::Import(import));
                    } else {
                        self.recover_to_item();
                    }
                }
                TokenKind::Keyword(Keyword::Export) => match self.peek_ahead(1) {
                    TokenKind::Keyword(Keyword::Function) | TokenKind::Keyword(Keyword::Async) => {
                        let doc = pending_doc.take();
                        if let Ok(func) = self.function_decl(doc) {
                            module.items.push(Item::Function(func));
                        } else {
                            self.recover_to_item();
                        }
                    }
                    TokenKind::Keyword(Keyword::Interface)
                    | TokenKind::Keyword(Keyword::Type) => {
                        // `export interface` / `export type`
                        pending_doc = None;
                        self.advance();
                        self.skip_type_declaration();
                    }
                    _ => {
                        // non-procedure exports (`export const ...`) carry
                        // no flow meaning
                        pending_doc = None;
                        self.skip_statement_like();
                    }
                },
                TokenKind::Keyword(Keyword::Async) | TokenKind::Keyword(Keyword::Function) => {
                    let doc = pending_doc.take();
                    if let Ok(func) = self.function_decl(doc) {
                        module.items.push(Item::Function(func));
                    } else {
                        self.recover_to_item();
                    }
                }
                TokenKind::Keyword(Keyword::Interface) | TokenKind::Keyword(Keyword::Type) => {
                    pending_doc = None;
                    self.skip_type_declaration();
                }
                _ => {
                    // Top-level statements carry no flow meaning; skip them.
                    pending_doc = None;
                    self.skip_statement_like();
                }
            }
        }
        module
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    fn import_decl(&mut self) -> Parse<ImportDecl> {
        let start = self.current_span();
        self.expect_keyword(Keyword::Import)?;

        let mut names = Vec::new();
        if self.eat(&TokenKind::LBrace) {
            loop {
                if self.eat(&TokenKind::RBrace) {
                    break;
                }
                let imported = self.expect_ident("imported name")?;
                let local = if self.eat_ident_text("as") {
                    self.expect_ident("import alias")?
                } else {
                    imported.clone()
                };
                names.push(ImportedName { imported, local });
                if !self.eat(&TokenKind::Comma) {
                    self.expect(&TokenKind::RBrace)?;
                    break;
                }
            }
        } else {
            // default / namespace imports: note the binding, keep going
            let name = self.expect_ident("import binding")?;
            names.push(ImportedName {
                imported: "default".into(),
                local: name,
            });
        }

        self.expect_keyword(Keyword::From)?;
        let specifier = match self.peek_kind().clone() {
            TokenKind::Str(value) => {
                self.advance();
                value
            }
            other => {
                self.error_here(format!("expected module specifier, found {}", other));
                return Err(());
            }
        };
        self.eat(&TokenKind::Semi);
        Ok(ImportDecl {
            names,
            specifier,
            span: start.to(self.previous_span()),
        })
    }

    fn function_decl(&mut self, doc: Option<String>) -> Parse<FunctionDecl> {
        let start = self.current_span();
        let exported = self.eat_keyword(Keyword::Export);
        let is_async = self.eat_keyword(Keyword::Async);
        self.expect_keyword(Keyword::Function)?;
        let name = self.expect_ident("function name")?;

        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        loop {
            if self.eat(&TokenKind::RParen) {
                break;
            }
            let param_start = self.current_span();
            let param_name = self.expect_ident("parameter name")?;
            self.eat(&TokenKind::Question);
            let type_text = if self.eat(&TokenKind::Colon) {
                Some(self.annotation_text(&[TokenKind::Comma, TokenKind::RParen])?)
            } else {
                None
            };
            params.push(Param {
                name: param_name,
                type_text,
                span: param_start.to(self.previous_span()),
            });
            if !self.eat(&TokenKind::Comma) {
                self.expect(&TokenKind::RParen)?;
                break;
            }
        }

        let return_type = if self.eat(&TokenKind::Colon) {
            Some(self.annotation_text(&[TokenKind::LBrace])?)
        } else {
            None
        };

        let body = self.block()?;
        Ok(FunctionDecl {
            name,
            exported,
            is_async,
            doc,
            params,
            return_type,
            body,
            span: start.to(self.previous_span()),
        })
    }

    /// Capture an annotation verbatim until one of `stops` at nesting
    /// depth zero. `<...>`, `(...)`, `[...]`, `{...}` all nest.
    fn annotation_text(&mut self, stops: &[TokenKind]) -> Parse<String> {
        let start = self.current_span().start;
        let mut depth = 0usize;
        loop {
            let kind = self.peek_kind();
            if depth == 0 && stops.contains(kind) {
                break;
            }
            match kind {
                TokenKind::Lt | TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => {
                    depth += 1
                }
                TokenKind::Gt | TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                TokenKind::Eof => {
                    self.error_here("unterminated type annotation");
                    return Err(());
                }
                _ => {}
            }
            self.advance();
        }
        let end = self.current_span().start;
        Ok(self.file.text[start..end].trim().to_string())
    }

    fn skip_type_declaration(&mut self) {
        // `interface X { ... }` / `type X = ...;` carry no flow structure
        self.advance();
        let mut depth = 0usize;
        while !self.at_eof() {
            match self.peek_kind() {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    self.advance();
                    if depth <= 1 {
                        self.eat(&TokenKind::Semi);
                        return;
                    }
                    depth -= 1;
                    continue;
                }
                TokenKind::Semi if depth == 0 => {
                    self.advance();
                    return;
                }
                _ => {}
            }
            self.advance();
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn block(&mut self) -> Parse<Block> {
        let start = self.current_span();
        self.expect(&TokenKind::LBrace)?;
        let mut statements = Vec::new();
        loop {
            if self.eat(&TokenKind::RBrace) {
                break;
            }
            if self.at_eof() {
                self.error_here("unterminated block");
                return Err(());
            }
            match self.statement() {
                Ok(statement) => statements.push(statement),
                Err(()) => self.recover_in_block(),
            }
        }
        Ok(Block {
            statements,
            span: start.to(self.previous_span()),
        })
    }

    fn statement(&mut self) -> Parse<Statement> {
        let start = self.current_span();
        match self.peek_kind().clone() {
            TokenKind::Keyword(Keyword::Const)
            | TokenKind::Keyword(Keyword::Let)
            | TokenKind::Keyword(Keyword::Var) => {
                self.advance();
                let pattern = self.pattern()?;
                let init = if self.eat(&TokenKind::Assign) {
                    Some(self.expression()?)
                } else {
                    None
                };
                self.eat(&TokenKind::Semi);
                Ok(Statement::VarDecl {
                    pattern,
                    init,
                    span: start.to(self.previous_span()),
                })
            }
            TokenKind::Keyword(Keyword::If) => self.if_statement(),
            TokenKind::Keyword(Keyword::While) => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let condition = self.expression()?;
                self.expect(&TokenKind::RParen)?;
                let body = self.block()?;
                Ok(Statement::While {
                    condition,
                    body,
                    span: start.to(self.previous_span()),
                })
            }
            TokenKind::Keyword(Keyword::For) => self.for_of_statement(),
            TokenKind::Keyword(Keyword::Try) => self.try_statement(),
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                self.eat(&TokenKind::Semi);
                Ok(Statement::Break {
                    span: start.to(self.previous_span()),
                })
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                self.eat(&TokenKind::Semi);
                Ok(Statement::Continue {
                    span: start.to(self.previous_span()),
                })
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let value = if self.check(&TokenKind::Semi)
                    || self.check(&TokenKind::RBrace)
                    || self.at_eof()
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.eat(&TokenKind::Semi);
                Ok(Statement::Return {
                    value,
                    span: start.to(self.previous_span()),
                })
            }
            TokenKind::LBrace => Ok(Statement::Block(self.block()?)),
            TokenKind::DocComment(_) => {
                self.advance();
                self.statement()
            }
            _ => {
                let expr = self.expression()?;
                self.eat(&TokenKind::Semi);
                Ok(Statement::Expression {
                    expr,
                    span: start.to(self.previous_span()),
                })
            }
        }
    }

    fn if_statement(&mut self) -> Parse<Statement> {
        let start = self.current_span();
        self.expect_keyword(Keyword::If)?;
        self.expect(&TokenKind::LParen)?;
        let condition = self.expression()?;
        self.expect(&TokenKind::RParen)?;
        let then_block = self.block()?;
        let else_block = if self.eat_keyword(Keyword::Else) {
            if self.check(&TokenKind::Keyword(Keyword::If)) {
                // `else if` becomes an else block holding one `if`
                let nested = self.if_statement()?;
                let span = nested.span();
                Some(Block {
                    statements: vec![nested],
                    span,
                })
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        Ok(Statement::If {
            condition,
            then_block,
            else_block,
            span: start.to(self.previous_span()),
        })
    }

    fn for_of_statement(&mut self) -> Parse<Statement> {
        let start = self.current_span();
        self.expect_keyword(Keyword::For)?;
        self.expect(&TokenKind::LParen)?;
        if !(self.eat_keyword(Keyword::Const)
            || self.eat_keyword(Keyword::Let)
            || self.eat_keyword(Keyword::Var))
        {
            self.error_here("expected 'const', 'let' or 'var' in for…of head");
            return Err(());
        }
        let binding = self.expect_ident("loop binding")?;
        self.expect_keyword(Keyword::Of)?;
        let iterable = self.expression()?;
        self.expect(&TokenKind::RParen)?;
        let body = self.block()?;
        Ok(Statement::ForOf {
            binding,
            iterable,
            body,
            span: start.to(self.previous_span()),
        })
    }

    fn try_statement(&mut self) -> Parse<Statement> {
        let start = self.current_span();
        self.expect_keyword(Keyword::Try)?;
        let block = self.block()?;
        let catch = if self.check(&TokenKind::Keyword(Keyword::Catch)) {
            let catch_start = self.current_span();
            self.advance();
            let param = if self.eat(&TokenKind::LParen) {
                let name = self.expect_ident("catch binding")?;
                self.expect(&TokenKind::RParen)?;
                Some(name)
            } else {
                None
            };
            let catch_block = self.block()?;
            Some(CatchClause {
                param,
                block: catch_block,
                span: catch_start.to(self.previous_span()),
            })
        } else {
            None
        };
        let finally = if self.eat_keyword(Keyword::Finally) {
            Some(self.block()?)
        } else {
            None
        };
        if catch.is_none() && finally.is_none() {
            self.error_here("'try' requires a 'catch' or 'finally' clause");
            return Err(());
        }
        Ok(Statement::Try {
            block,
            catch,
            finally,
            span: start.to(self.previous_span()),
        })
    }

    fn pattern(&mut self) -> Parse<Pattern> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Pattern::Ident(name))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut names = Vec::new();
                loop {
                    if self.eat(&TokenKind::RBracket) {
                        break;
                    }
                    if self.eat(&TokenKind::Comma) {
                        names.push(None); // hole
                        continue;
                    }
                    let name = self.expect_ident("destructuring binding")?;
                    names.push(Some(name));
                    if !self.eat(&TokenKind::Comma) {
                        self.expect(&TokenKind::RBracket)?;
                        break;
                    }
                }
                Ok(Pattern::Array(names))
            }
            TokenKind::LBrace => {
                self.advance();
                let mut names = Vec::new();
                loop {
                    if self.eat(&TokenKind::RBrace) {
                        break;
                    }
                    let name = self.expect_ident("destructuring binding")?;
                    names.push(name);
                    if !self.eat(&TokenKind::Comma) {
                        self.expect(&TokenKind::RBrace)?;
                        break;
                    }
                }
                Ok(Pattern::Object(names))
            }
            other => {
                self.error_here(format!("expected binding pattern, found {}", other));
                Err(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions (precedence climbing)
    // ------------------------------------------------------------------

    pub fn expression(&mut self) -> Parse<Expression> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Parse<Expression> {
        let mut left = self.and_expr()?;
        while self.eat(&TokenKind::OrOr) {
            let right = self.and_expr()?;
            let span = left.span().to(right.span());
            left = Expression::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Parse<Expression> {
        let mut left = self.equality_expr()?;
        while self.eat(&TokenKind::AndAnd) {
            let right = self.equality_expr()?;
            let span = left.span().to(right.span());
            left = Expression::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn equality_expr(&mut self) -> Parse<Expression> {
        let mut left = self.comparison_expr()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::EqEqEq => BinaryOp::StrictEq,
                TokenKind::NotEq => BinaryOp::NotEq,
                TokenKind::NotEqEq => BinaryOp::StrictNotEq,
                _ => break,
            };
            self.advance();
            let right = self.comparison_expr()?;
            let span = left.span().to(right.span());
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn comparison_expr(&mut self) -> Parse<Expression> {
        let mut left = self.additive_expr()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Ge => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.additive_expr()?;
            let span = left.span().to(right.span());
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn additive_expr(&mut self) -> Parse<Expression> {
        let mut left = self.multiplicative_expr()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.multiplicative_expr()?;
            let span = left.span().to(right.span());
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn multiplicative_expr(&mut self) -> Parse<Expression> {
        let mut left = self.unary_expr()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            let right = self.unary_expr()?;
            let span = left.span().to(right.span());
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn unary_expr(&mut self) -> Parse<Expression> {
        let start = self.current_span();
        if self.eat(&TokenKind::Bang) {
            let operand = self.unary_expr()?;
            let span = start.to(operand.span());
            return Ok(Expression::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
                span,
            });
        }
        if self.eat(&TokenKind::Minus) {
            let operand = self.unary_expr()?;
            let span = start.to(operand.span());
            return Ok(Expression::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
                span,
            });
        }
        if self.eat_keyword(Keyword::Await) {
            let operand = self.unary_expr()?;
            let span = start.to(operand.span());
            return Ok(Expression::Await {
                operand: Box::new(operand),
                span,
            });
        }
        self.postfix_expr()
    }

    fn postfix_expr(&mut self) -> Parse<Expression> {
        let mut expr = self.primary_expr()?;
        loop {
            if self.eat(&TokenKind::Dot) {
                let property = self.expect_member_name()?;
                let span = expr.span().to(self.previous_span());
                expr = Expression::Member {
                    object: Box::new(expr),
                    property,
                    span,
                };
            } else if self.check(&TokenKind::LParen) {
                self.advance();
                let mut args = Vec::new();
                loop {
                    if self.eat(&TokenKind::RParen) {
                        break;
                    }
                    args.push(self.expression()?);
                    if !self.eat(&TokenKind::Comma) {
                        self.expect(&TokenKind::RParen)?;
                        break;
                    }
                }
                let span = expr.span().to(self.previous_span());
                expr = Expression::Call {
                    callee: Box::new(expr),
                    args,
                    span,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn primary_expr(&mut self) -> Parse<Expression> {
        let span = self.current_span();
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expression::Ident { name, span })
            }
            TokenKind::Number(raw) => {
                self.advance();
                Ok(Expression::Number { raw, span })
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Expression::Str { value, span })
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expression::Bool { value: true, span })
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expression::Bool { value: false, span })
            }
            TokenKind::Keyword(Keyword::Null) | TokenKind::Keyword(Keyword::Undefined) => {
                self.advance();
                Ok(Expression::Null { span })
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(&TokenKind::RParen)?;
                Ok(Expression::Paren {
                    inner: Box::new(inner),
                    span: span.to(self.previous_span()),
                })
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elements = Vec::new();
                loop {
                    if self.eat(&TokenKind::RBracket) {
                        break;
                    }
                    elements.push(self.expression()?);
                    if !self.eat(&TokenKind::Comma) {
                        self.expect(&TokenKind::RBracket)?;
                        break;
                    }
                }
                Ok(Expression::Array {
                    elements,
                    span: span.to(self.previous_span()),
                })
            }
            TokenKind::LBrace => {
                self.advance();
                let mut properties = Vec::new();
                loop {
                    if self.eat(&TokenKind::RBrace) {
                        break;
                    }
                    let key = match self.peek_kind().clone() {
                        TokenKind::Ident(name) => {
                            self.advance();
                            name
                        }
                        TokenKind::Str(value) => {
                            self.advance();
                            value
                        }
                        other => {
                            self.error_here(format!(
                                "expected object key, found {}",
                                other
                            ));
                            return Err(());
                        }
                    };
                    let value = if self.eat(&TokenKind::Colon) {
                        self.expression()?
                    } else {
                        // shorthand `{ a }`
                        Expression::Ident {
                            name: key.clone(),
                            span: self.previous_span(),
                        }
                    };
                    properties.push((key, value));
                    if !self.eat(&TokenKind::Comma) {
                        self.expect(&TokenKind::RBrace)?;
                        break;
                    }
                }
                Ok(Expression::Object {
                    properties,
                    span: span.to(self.previous_span()),
                })
            }
            TokenKind::Keyword(Keyword::New) => {
                // `new Foo(...)` reads like a call for our purposes
                self.advance();
                self.postfix_expr()
            }
            other => {
                self.error_here(format!("expected expression, found {}", other));
                Err(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Cursor helpers
    // ------------------------------------------------------------------

    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn peek_ahead(&self, offset: usize) -> &TokenKind {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].kind
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    fn previous_span(&self) -> Span {
        if self.pos == 0 {
            return self.current_span();
        }
        self.tokens[(self.pos - 1).min(self.tokens.len() - 1)].span
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_kind(), TokenKind::Eof)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        self.eat(&TokenKind::Keyword(keyword))
    }

    fn eat_ident_text(&mut self, text: &str) -> bool {
        if let TokenKind::Ident(name) = self.peek_kind() {
            if name == text {
                self.advance();
                return true;
            }
        }
        false
    }

    fn expect(&mut self, kind: &TokenKind) -> Parse<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            self.error_here(format!("expected {}, found {}", kind, self.peek_kind()));
            Err(())
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Parse<()> {
        self.expect(&TokenKind::Keyword(keyword))
    }

    fn expect_ident(&mut self, what: &str) -> Parse<String> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => {
                self.error_here(format!("expected {}, found {}", what, other));
                Err(())
            }
        }
    }

    /// Member names admit keywords (`x.of`, `x.type`).
    fn expect_member_name(&mut self) -> Parse<String> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            TokenKind::Keyword(kw) => {
                self.advance();
                Ok(kw.as_str().to_string())
            }
            other => {
                self.error_here(format!("expected property name, found {}", other));
                Err(())
            }
        }
    }

    fn error_here(&mut self, message: impl Into<String>) {
        let location = self.file.location_of(self.current_span());
        self.diagnostics.error(location, message);
    }

    /// Skip to the next plausible top-level item.
    fn recover_to_item(&mut self) {
        while !self.at_eof() {
            match self.peek_kind() {
                TokenKind::Keyword(Keyword::Import)
                | TokenKind::Keyword(Keyword::Export)
                | TokenKind::Keyword(Keyword::Function)
                | TokenKind::Keyword(Keyword::Async)
                | TokenKind::DocComment(_) => return,
                _ => self.advance(),
            }
        }
    }

    /// Skip past the current statement inside a block.
    fn recover_in_block(&mut self) {
        let mut depth = 0usize;
        while !self.at_eof() {
            match self.peek_kind() {
                TokenKind::Semi if depth == 0 => {
                    self.advance();
                    return;
                }
                TokenKind::LBrace => {
                    depth += 1;
                    self.advance();
                }
                TokenKind::RBrace => {
                    if depth == 0 {
                        return; // let block() consume it
                    }
                    depth -= 1;
                    self.advance();
                }
                _ => self.advance(),
            }
        }
    }

    /// Skip a meaningless top-level statement without eating the next item.
    fn skip_statement_like(&mut self) {
        self.advance();
        let mut depth = 0usize;
        while !self.at_eof() {
            match self.peek_kind() {
                TokenKind::Semi if depth == 0 => {
                    self.advance();
                    return;
                }
                TokenKind::Keyword(
                    Keyword::Import | Keyword::Export | Keyword::Function | Keyword::Async,
                )
                | TokenKind::DocComment(_)
                    if depth == 0 =>
                {
                    return;
                }
                TokenKind::LBrace => {
                    depth += 1;
                    self.advance();
                }
                TokenKind::RBrace => {
                    depth = depth.saturating_sub(1);
                    self.advance();
                }
                _ => self.advance(),
            }
        }
    }
}
