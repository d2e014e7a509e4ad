//! Shallow type view over step and flow signatures.
//!
//! The flow analyzer does not need a real type checker: it needs declared
//! parameter/return shapes so it can (a) record step signatures for the
//! manifest and (b) flag argument-to-parameter mismatches as diagnostics.
//! Types are compared structurally by normalized annotation text; anything
//! unannotated or too dynamic degrades to `Unknown`, which is assignable
//! both ways.

use std::collections::BTreeMap;

use crate::diagnostics::SourceLocation;
use crate::lang::ast::{Expression, FunctionDecl};

/// A declared type as the analyzer sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticType {
    /// Normalized annotation text: `string`, `Order`, `{ id: string }`.
    Named(String),
    Unknown,
}

impl StaticType {
    /// Build from an annotation as written. `Promise<T>` unwraps to `T`
    /// (flows and steps are async; the promise wrapper is noise here).
    pub fn from_annotation(text: Option<&str>) -> Self {
        let Some(text) = text else {
            return Self::Unknown;
        };
        let normalized = normalize(text);
        if normalized.is_empty() {
            return Self::Unknown;
        }
        if let Some(inner) = normalized
            .strip_prefix("Promise<")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            return Self::from_annotation(Some(inner));
        }
        match normalized.as_str() {
            "any" | "unknown" | "void" | "never" => Self::Unknown,
            _ => Self::Named(normalized),
        }
    }

    /// Static type of a literal argument expression, when evident.
    pub fn of_literal(expr: &Expression) -> Self {
        match expr.unwrap_parens() {
            Expression::Str { .. } => Self::Named("string".into()),
            Expression::Number { .. } => Self::Named("number".into()),
            Expression::Bool { .. } => Self::Named("boolean".into()),
            Expression::Null { .. } => Self::Unknown,
            _ => Self::Unknown,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::Unknown => "unknown",
        }
    }

    /// Shallow assignability: unknowns are assignable both ways, named
    /// types must match textually.
    pub fn assignable_to(&self, target: &StaticType) -> bool {
        match (self, target) {
            (Self::Unknown, _) | (_, Self::Unknown) => true,
            (Self::Named(a), Self::Named(b)) => a == b,
        }
    }
}

fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = true;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out.trim().to_string()
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamInfo {
    pub name: String,
    pub ty: StaticType,
}

/// Declared shape of one exported procedure.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub name: String,
    pub params: Vec<ParamInfo>,
    pub return_type: StaticType,
    pub location: SourceLocation,
}

impl Signature {
    pub fn of(decl: &FunctionDecl, location: SourceLocation) -> Self {
        Self {
            name: decl.name.clone(),
            params: decl
                .params
                .iter()
                .map(|p| ParamInfo {
                    name: p.name.clone(),
                    ty: StaticType::from_annotation(p.type_text.as_deref()),
                })
                .collect(),
            return_type: StaticType::from_annotation(decl.return_type.as_deref()),
            location,
        }
    }
}

/// All signatures visible to one compile invocation.
#[derive(Debug, Clone, Default)]
pub struct TypeView {
    signatures: BTreeMap<String, Signature>,
}

impl TypeView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, signature: Signature) {
        self.signatures.insert(signature.name.clone(), signature);
    }

    pub fn signature(&self, name: &str) -> Option<&Signature> {
        self.signatures.get(name)
    }

    /// Check one call site; returns mismatch messages (empty = fine).
    /// Arguments without an evident static type are skipped, mirroring a
    /// type-checker view being unavailable for a symbol.
    pub fn check_call(
        &self,
        callee: &str,
        args: &[(StaticType, SourceLocation)],
    ) -> Vec<(SourceLocation, String)> {
        let Some(signature) = self.signature(callee) else {
            return Vec::new();
        };
        let mut mismatches = Vec::new();
        for (index, (arg_ty, location)) in args.iter().enumerate() {
            let Some(param) = signature.params.get(index) else {
                mismatches.push((
                    location.clone(),
                    format!(
                        "'{}' takes {} argument(s) but {} were supplied",
                        callee,
                        signature.params.len(),
                        args.len()
                    ),
                ));
                break;
            };
            if !arg_ty.assignable_to(&param.ty) {
                mismatches.push((
                    location.clone(),
                    format!(
                        "argument of type '{}' is not assignable to parameter '{}' of type '{}'",
                        arg_ty.display_name(),
                        param.name,
                        param.ty.display_name()
                    ),
                ));
            }
        }
        mismatches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLocation {
        SourceLocation::new("steps.ts", 1, 1)
    }

    #[test]
    fn promise_wrapper_unwraps() {
        assert_eq!(
            StaticType::from_annotation(Some("Promise<Order>")),
            StaticType::Named("Order".into())
        );
        assert_eq!(
            StaticType::from_annotation(Some("Promise<void>")),
            StaticType::Unknown
        );
    }

    #[test]
    fn whitespace_normalizes() {
        assert_eq!(
            StaticType::from_annotation(Some("{ id:  string }")),
            StaticType::Named("{ id: string }".into())
        );
    }

    #[test]
    fn unknown_is_assignable_both_ways() {
        let unknown = StaticType::Unknown;
        let named = StaticType::Named("Order".into());
        assert!(unknown.assignable_to(&named));
        assert!(named.assignable_to(&unknown));
        assert!(!named.assignable_to(&StaticType::Named("User".into())));
    }

    #[test]
    fn check_call_reports_mismatch() {
        let mut view = TypeView::new();
        view.insert(Signature {
            name: "charge".into(),
            params: vec![ParamInfo {
                name: "amount".into(),
                ty: StaticType::Named("number".into()),
            }],
            return_type: StaticType::Unknown,
            location: loc(),
        });

        let ok = view.check_call("charge", &[(StaticType::Named("number".into()), loc())]);
        assert!(ok.is_empty());

        let bad = view.check_call("charge", &[(StaticType::Named("string".into()), loc())]);
        assert_eq!(bad.len(), 1);
        assert!(bad[0].1.contains("not assignable"));
    }

    #[test]
    fn check_call_reports_arity_overflow() {
        let mut view = TypeView::new();
        view.insert(Signature {
            name: "ping".into(),
            params: vec![],
            return_type: StaticType::Unknown,
            location: loc(),
        });
        let bad = view.check_call(
            "ping",
            &[(StaticType::Named("string".into()), loc())],
        );
        assert_eq!(bad.len(), 1);
        assert!(bad[0].1.contains("takes 0 argument"));
    }

    #[test]
    fn unknown_callee_is_silent() {
        let view = TypeView::new();
        assert!(view
            .check_call("ghost", &[(StaticType::Named("string".into()), loc())])
            .is_empty());
    }
}
