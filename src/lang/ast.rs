//! Syntax tree for the flow dialect.
//!
//! Every node carries its [`Span`] so later passes can recover the exact
//! source text (conditions are captured verbatim) and report positions.

use super::token::Span;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Import(ImportDecl),
    Function(FunctionDecl),
}

/// `import { a, b as c } from "specifier";`
#[derive(Debug, Clone, PartialEq)]
pub struct ImportDecl {
    pub names: Vec<ImportedName>,
    pub specifier: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportedName {
    /// Name as exported by the source module.
    pub imported: String,
    /// Name visible in this module (alias or same as `imported`).
    pub local: String,
}

/// `export async function name(params): Type { ... }`, with its doc comment.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub exported: bool,
    pub is_async: bool,
    pub doc: Option<String>,
    pub params: Vec<Param>,
    /// Return type annotation text, generics and whitespace included.
    pub return_type: Option<String>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    /// Type annotation text as written, `None` when omitted.
    pub type_text: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `const`/`let`/`var` with an optional initializer.
    VarDecl {
        pattern: Pattern,
        init: Option<Expression>,
        span: Span,
    },
    Expression {
        expr: Expression,
        span: Span,
    },
    If {
        condition: Expression,
        then_block: Block,
        else_block: Option<Block>,
        span: Span,
    },
    While {
        condition: Expression,
        body: Block,
        span: Span,
    },
    ForOf {
        binding: String,
        iterable: Expression,
        body: Block,
        span: Span,
    },
    Try {
        block: Block,
        catch: Option<CatchClause>,
        finally: Option<Block>,
        span: Span,
    },
    Break {
        span: Span,
    },
    Continue {
        span: Span,
    },
    Return {
        value: Option<Expression>,
        span: Span,
    },
    Block(Block),
}

impl Statement {
    pub fn span(&self) -> Span {
        match self {
            Self::VarDecl { span, .. }
            | Self::Expression { span, .. }
            | Self::If { span, .. }
            | Self::While { span, .. }
            | Self::ForOf { span, .. }
            | Self::Try { span, .. }
            | Self::Break { span }
            | Self::Continue { span }
            | Self::Return { span, .. } => *span,
            Self::Block(block) => block.span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub param: Option<String>,
    pub block: Block,
    pub span: Span,
}

/// Binding patterns: `x`, `[a, b]`, `{ a, b }`.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Ident(String),
    /// Array destructuring; holes (`[, b]`) are `None`.
    Array(Vec<Option<String>>),
    Object(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    StrictEq,
    NotEq,
    StrictNotEq,
    Lt,
    Gt,
    Le,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Ident {
        name: String,
        span: Span,
    },
    Number {
        raw: String,
        span: Span,
    },
    Str {
        value: String,
        span: Span,
    },
    Bool {
        value: bool,
        span: Span,
    },
    Null {
        span: Span,
    },
    Array {
        elements: Vec<Expression>,
        span: Span,
    },
    Object {
        properties: Vec<(String, Expression)>,
        span: Span,
    },
    Member {
        object: Box<Expression>,
        property: String,
        span: Span,
    },
    Call {
        callee: Box<Expression>,
        args: Vec<Expression>,
        span: Span,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expression>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
        span: Span,
    },
    Await {
        operand: Box<Expression>,
        span: Span,
    },
    Paren {
        inner: Box<Expression>,
        span: Span,
    },
}

impl Expression {
    pub fn span(&self) -> Span {
        match self {
            Self::Ident { span, .. }
            | Self::Number { span, .. }
            | Self::Str { span, .. }
            | Self::Bool { span, .. }
            | Self::Null { span }
            | Self::Array { span, .. }
            | Self::Object { span, .. }
            | Self::Member { span, .. }
            | Self::Call { span, .. }
            | Self::Unary { span, .. }
            | Self::Binary { span, .. }
            | Self::Await { span, .. }
            | Self::Paren { span, .. } => *span,
        }
    }

    /// The callee name for `Name(...)` calls, `None` for anything else.
    pub fn call_name(&self) -> Option<&str> {
        match self {
            Self::Call { callee, .. } => match callee.as_ref() {
                Self::Ident { name, .. } => Some(name),
                _ => None,
            },
            _ => None,
        }
    }

    /// Match `Promise.all(arg)` and hand back its single argument.
    pub fn as_promise_all(&self) -> Option<&Expression> {
        let Self::Call { callee, args, .. } = self else {
            return None;
        };
        let Self::Member {
            object, property, ..
        } = callee.as_ref()
        else {
            return None;
        };
        let Self::Ident { name, .. } = object.as_ref() else {
            return None;
        };
        if name == "Promise" && property == "all" {
            args.first()
        } else {
            None
        }
    }

    /// Strip redundant parentheses.
    pub fn unwrap_parens(&self) -> &Expression {
        match self {
            Self::Paren { inner, .. } => inner.unwrap_parens(),
            other => other,
        }
    }

    /// Literal expressions can be lifted directly into node params.
    pub fn is_literal(&self) -> bool {
        match self {
            Self::Number { .. } | Self::Str { .. } | Self::Bool { .. } | Self::Null { .. } => {
                true
            }
            Self::Array { elements, .. } => elements.iter().all(Self::is_literal),
            Self::Object { properties, .. } => {
                properties.iter().all(|(_, v)| v.is_literal())
            }
            Self::Unary {
                op: UnaryOp::Neg,
                operand,
                ..
            } => matches!(operand.as_ref(), Self::Number { .. }),
            Self::Paren { inner, .. } => inner.is_literal(),
            _ => false,
        }
    }
}
