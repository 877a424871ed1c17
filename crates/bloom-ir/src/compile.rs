//! Typed expression compilation.
//!
//! Closure bodies are Rust expressions over the closure's parameters. They
//! are compiled once, at program construction, into a small typed tree:
//! - Field accesses resolved to (parameter, column) pairs
//! - Literals pre-evaluated to Values
//! - Every node's FieldType known, so ill-typed rows are rejected up front

use bloom_eval::{FieldType, Schema, Tuple, Value};
use proc_macro2::Span;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Expr, Token};

use crate::{LowerError, type_error, unsupported};

// ─── Compiled expression types ──────────────────────────────────────

/// Compiled value expression.
#[derive(Debug, Clone)]
pub(crate) enum CExpr {
    Literal(Value),
    /// Column `col` of closure parameter `param`.
    Field { param: usize, col: usize },
    Binary(CBinOp, Box<CExpr>, Box<CExpr>),
    Unary(CUnOp, Box<CExpr>),
    If {
        cond: Box<CExpr>,
        then: Box<CExpr>,
        els: Box<CExpr>,
    },
    /// `format!` split into literal pieces around `{}` holes.
    Format { pieces: Vec<String>, args: Vec<CExpr> },
    Method(CMethod, Box<CExpr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CBinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl CBinOp {
    fn symbol(self) -> &'static str {
        match self {
            CBinOp::Add => "+",
            CBinOp::Sub => "-",
            CBinOp::Mul => "*",
            CBinOp::Div => "/",
            CBinOp::Rem => "%",
            CBinOp::Eq => "==",
            CBinOp::Ne => "!=",
            CBinOp::Lt => "<",
            CBinOp::Le => "<=",
            CBinOp::Gt => ">",
            CBinOp::Ge => ">=",
            CBinOp::And => "&&",
            CBinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CUnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CMethod {
    Len,
    Abs,
    ToString,
}

/// Compiled row producer: what a closure emits for one input.
#[derive(Debug, Clone)]
pub(crate) enum Emit {
    Row(Vec<CExpr>),
    /// Trailing `if` without `else`: emit only when the condition holds.
    When(CExpr, Box<Emit>),
    Branch(CExpr, Box<Emit>, Box<Emit>),
}

// ─── Scope ──────────────────────────────────────────────────────────

/// Closure parameters in scope, each bound to a source schema.
pub(crate) struct Scope<'a> {
    params: Vec<(Option<String>, &'a Schema)>,
}

impl<'a> Scope<'a> {
    /// No parameters: literal rows.
    pub(crate) fn empty() -> Self {
        Scope { params: Vec::new() }
    }

    /// Bind a closure's parameters to `schemas`, in order.
    pub(crate) fn bind(closure: &syn::ExprClosure, schemas: &[&'a Schema]) -> Result<Self, LowerError> {
        if closure.inputs.len() != schemas.len() {
            return Err(type_error(
                closure.or1_token.spans[0],
                format!(
                    "closure takes {} parameter(s), expected {}",
                    closure.inputs.len(),
                    schemas.len()
                ),
            ));
        }
        let mut params = Vec::with_capacity(schemas.len());
        for (pat, schema) in closure.inputs.iter().zip(schemas) {
            let name = match pat {
                syn::Pat::Ident(p) => Some(p.ident.to_string()),
                syn::Pat::Wild(_) => None,
                syn::Pat::Type(t) => match &*t.pat {
                    syn::Pat::Ident(p) => Some(p.ident.to_string()),
                    _ => return Err(unsupported(pat.span(), "closure parameters must be plain names")),
                },
                _ => return Err(unsupported(pat.span(), "closure parameters must be plain names")),
            };
            params.push((name, *schema));
        }
        Ok(Scope { params })
    }

    fn param(&self, name: &str) -> Option<(usize, &'a Schema)> {
        self.params
            .iter()
            .position(|(n, _)| n.as_deref() == Some(name))
            .map(|i| (i, self.params[i].1))
    }
}

// ─── Compilation ────────────────────────────────────────────────────

type Typed = (CExpr, FieldType);

/// Compile a value expression.
pub(crate) fn compile_expr(expr: &Expr, scope: &Scope) -> Result<Typed, LowerError> {
    match expr {
        Expr::Lit(lit) => compile_lit(&lit.lit),
        Expr::Path(_) => {
            let (param, schema) = resolve_param(expr, scope)?;
            if schema.arity() == 1 {
                let ty = schema.fields()[0].ty;
                Ok((CExpr::Field { param, col: 0 }, ty))
            } else {
                Err(type_error(
                    expr.span(),
                    format!("a whole tuple {schema} is not a value; select a field"),
                ))
            }
        }
        Expr::Field(field) => {
            let (param, schema) = resolve_param(&field.base, scope)?;
            let col = match &field.member {
                syn::Member::Named(ident) => schema.position(&ident.to_string()).ok_or_else(|| {
                    type_error(ident.span(), format!("no field `{ident}` in {schema}"))
                })?,
                syn::Member::Unnamed(idx) => idx.index as usize,
            };
            field_at(param, schema, col, expr.span())
        }
        Expr::Index(index) => {
            let (param, schema) = resolve_param(&index.expr, scope)?;
            let col = match &*index.index {
                Expr::Lit(syn::ExprLit {
                    lit: syn::Lit::Int(i),
                    ..
                }) => i
                    .base10_parse::<usize>()
                    .map_err(|e| type_error(i.span(), e.to_string()))?,
                other => return Err(unsupported(other.span(), "tuple indices must be integer literals")),
            };
            field_at(param, schema, col, expr.span())
        }
        Expr::Binary(bin) => compile_binary(bin, scope),
        Expr::Unary(u) => {
            let (inner, ty) = compile_expr(&u.expr, scope)?;
            match (&u.op, ty) {
                (syn::UnOp::Neg(_), FieldType::Int) => {
                    // Fold negated literals.
                    if let CExpr::Literal(v) = &inner
                        && let Some(neg) = v.neg()
                    {
                        return Ok((CExpr::Literal(neg), FieldType::Int));
                    }
                    Ok((CExpr::Unary(CUnOp::Neg, Box::new(inner)), FieldType::Int))
                }
                (syn::UnOp::Not(_), FieldType::Bool) => {
                    Ok((CExpr::Unary(CUnOp::Not, Box::new(inner)), FieldType::Bool))
                }
                (syn::UnOp::Deref(_), ty) => Ok((inner, ty)),
                (op, ty) => Err(type_error(
                    op.span(),
                    format!("cannot apply `{}` to {ty}", quote::quote!(#op)),
                )),
            }
        }
        Expr::Paren(p) => compile_expr(&p.expr, scope),
        Expr::Group(g) => compile_expr(&g.expr, scope),
        Expr::Reference(r) => compile_expr(&r.expr, scope),
        Expr::Block(b) => compile_expr(block_expr(&b.block, expr.span())?, scope),
        Expr::If(if_expr) => {
            let (cond, cond_ty) = compile_expr(&if_expr.cond, scope)?;
            expect_type(cond_ty, FieldType::Bool, if_expr.cond.span())?;
            let Some((_, else_branch)) = &if_expr.else_branch else {
                return Err(type_error(
                    if_expr.if_token.span,
                    "`if` without `else` is only allowed around a whole row",
                ));
            };
            let (then, then_ty) = compile_expr(block_expr(&if_expr.then_branch, expr.span())?, scope)?;
            let (els, else_ty) = compile_expr(else_branch, scope)?;
            if then_ty != else_ty {
                return Err(type_error(
                    else_branch.span(),
                    format!("`if` branches differ: {then_ty} and {else_ty}"),
                ));
            }
            Ok((
                CExpr::If {
                    cond: Box::new(cond),
                    then: Box::new(then),
                    els: Box::new(els),
                },
                then_ty,
            ))
        }
        Expr::Macro(m) => compile_format(m, scope),
        Expr::MethodCall(mc) => {
            let (receiver, ty) = compile_expr(&mc.receiver, scope)?;
            if !mc.args.is_empty() {
                return Err(unsupported(mc.method.span(), format!("`{}` with arguments", mc.method)));
            }
            match (mc.method.to_string().as_str(), ty) {
                ("clone", ty) => Ok((receiver, ty)),
                ("len", FieldType::Str | FieldType::Opaque) => {
                    Ok((CExpr::Method(CMethod::Len, Box::new(receiver)), FieldType::Int))
                }
                ("abs", FieldType::Int) => {
                    Ok((CExpr::Method(CMethod::Abs, Box::new(receiver)), FieldType::Int))
                }
                ("to_string", _) => Ok((
                    CExpr::Method(CMethod::ToString, Box::new(receiver)),
                    FieldType::Str,
                )),
                (method, ty) => Err(type_error(
                    mc.method.span(),
                    format!("no method `{method}` on {ty}"),
                )),
            }
        }
        other => Err(unsupported(other.span(), "expression form")),
    }
}

fn compile_lit(lit: &syn::Lit) -> Result<Typed, LowerError> {
    match lit {
        syn::Lit::Int(i) => {
            let v = i
                .base10_parse::<i64>()
                .map_err(|e| type_error(i.span(), e.to_string()))?;
            Ok((CExpr::Literal(Value::Int(v)), FieldType::Int))
        }
        syn::Lit::Bool(b) => Ok((CExpr::Literal(Value::Bool(b.value)), FieldType::Bool)),
        syn::Lit::Str(s) => Ok((CExpr::Literal(Value::string(s.value())), FieldType::Str)),
        syn::Lit::ByteStr(b) => Ok((CExpr::Literal(Value::opaque(b.value())), FieldType::Opaque)),
        other => Err(type_error(other.span(), "unsupported literal")),
    }
}

fn resolve_param<'a>(expr: &Expr, scope: &Scope<'a>) -> Result<(usize, &'a Schema), LowerError> {
    let name = match expr {
        Expr::Path(p) => p.path.get_ident().map(ToString::to_string),
        _ => None,
    };
    let Some(name) = name else {
        return Err(unsupported(expr.span(), "only closure parameters can be accessed here"));
    };
    scope
        .param(&name)
        .ok_or_else(|| type_error(expr.span(), format!("unknown name `{name}`")))
}

fn field_at(param: usize, schema: &Schema, col: usize, span: Span) -> Result<Typed, LowerError> {
    match schema.field(col) {
        Some(field) => Ok((CExpr::Field { param, col }, field.ty)),
        None => Err(type_error(
            span,
            format!("column {col} is out of range for {schema}"),
        )),
    }
}

fn expect_type(found: FieldType, expected: FieldType, span: Span) -> Result<(), LowerError> {
    if found == expected {
        Ok(())
    } else {
        Err(type_error(span, format!("expected {expected}, found {found}")))
    }
}

/// The single expression of a `{ expr }` block.
fn block_expr(block: &syn::Block, span: Span) -> Result<&Expr, LowerError> {
    match block.stmts.as_slice() {
        [syn::Stmt::Expr(expr, None)] => Ok(expr),
        _ => Err(unsupported(span, "blocks must contain exactly one expression")),
    }
}

fn compile_binop(op: &syn::BinOp) -> Option<CBinOp> {
    Some(match op {
        syn::BinOp::Add(_) => CBinOp::Add,
        syn::BinOp::Sub(_) => CBinOp::Sub,
        syn::BinOp::Mul(_) => CBinOp::Mul,
        syn::BinOp::Div(_) => CBinOp::Div,
        syn::BinOp::Rem(_) => CBinOp::Rem,
        syn::BinOp::Eq(_) => CBinOp::Eq,
        syn::BinOp::Ne(_) => CBinOp::Ne,
        syn::BinOp::Lt(_) => CBinOp::Lt,
        syn::BinOp::Le(_) => CBinOp::Le,
        syn::BinOp::Gt(_) => CBinOp::Gt,
        syn::BinOp::Ge(_) => CBinOp::Ge,
        syn::BinOp::And(_) => CBinOp::And,
        syn::BinOp::Or(_) => CBinOp::Or,
        _ => return None,
    })
}

fn compile_binary(bin: &syn::ExprBinary, scope: &Scope) -> Result<Typed, LowerError> {
    let Some(op) = compile_binop(&bin.op) else {
        let op = &bin.op;
        return Err(unsupported(op.span(), format!("operator `{}`", quote::quote!(#op))));
    };
    let (left, lt) = compile_expr(&bin.left, scope)?;
    let (right, rt) = compile_expr(&bin.right, scope)?;
    let ty = match (op, lt, rt) {
        (CBinOp::Add, FieldType::Str, FieldType::Str) => Some(FieldType::Str),
        (CBinOp::Add | CBinOp::Sub | CBinOp::Mul | CBinOp::Div | CBinOp::Rem, FieldType::Int, FieldType::Int) => {
            Some(FieldType::Int)
        }
        (CBinOp::Eq | CBinOp::Ne, l, r) if l == r => Some(FieldType::Bool),
        (CBinOp::Lt | CBinOp::Le | CBinOp::Gt | CBinOp::Ge, l, r) if l == r && l != FieldType::Opaque => {
            Some(FieldType::Bool)
        }
        (CBinOp::And | CBinOp::Or, FieldType::Bool, FieldType::Bool) => Some(FieldType::Bool),
        _ => None,
    };
    let Some(ty) = ty else {
        return Err(type_error(
            bin.op.span(),
            format!("cannot apply `{}` to {lt} and {rt}", op.symbol()),
        ));
    };
    Ok((CExpr::Binary(op, Box::new(left), Box::new(right)), ty))
}

/// `format!("... {} ...", args)`; only positional `{}` holes.
fn compile_format(m: &syn::ExprMacro, scope: &Scope) -> Result<Typed, LowerError> {
    if !m.mac.path.is_ident("format") {
        return Err(unsupported(m.mac.path.span(), "macros other than `format!`"));
    }
    let args = m
        .mac
        .parse_body_with(Punctuated::<Expr, Token![,]>::parse_terminated)
        .map_err(LowerError::Parse)?;
    let mut args = args.into_iter();
    let template = match args.next() {
        Some(Expr::Lit(syn::ExprLit {
            lit: syn::Lit::Str(s),
            ..
        })) => s,
        _ => return Err(type_error(m.span(), "`format!` needs a string literal template")),
    };
    let pieces = split_template(&template.value())
        .ok_or_else(|| unsupported(template.span(), "only `{}` placeholders are supported"))?;
    let args: Vec<CExpr> = args
        .map(|a| compile_expr(&a, scope).map(|(c, _)| c))
        .collect::<Result<_, _>>()?;
    if args.len() + 1 != pieces.len() {
        return Err(type_error(
            template.span(),
            format!(
                "`format!` template has {} placeholder(s) but {} argument(s)",
                pieces.len() - 1,
                args.len()
            ),
        ));
    }
    Ok((CExpr::Format { pieces, args }, FieldType::Str))
}

/// Split a template around `{}` holes, unescaping `{{` and `}}`.
/// Returns one more piece than there are holes.
fn split_template(template: &str) -> Option<Vec<String>> {
    let mut pieces = vec![String::new()];
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('{', Some('{')) | ('}', Some('}')) => {
                chars.next();
                pieces.last_mut()?.push(c);
            }
            ('{', Some('}')) => {
                chars.next();
                pieces.push(String::new());
            }
            ('{' | '}', _) => return None,
            _ => pieces.last_mut()?.push(c),
        }
    }
    Some(pieces)
}

/// Compile what a closure body emits, checked against the target schema.
///
/// An `if` around whole rows selects between rows; without `else` it
/// emits nothing when the condition fails.
pub(crate) fn compile_emit(expr: &Expr, scope: &Scope, target: &Schema) -> Result<Emit, LowerError> {
    match expr {
        Expr::If(if_expr) => {
            let (cond, ty) = compile_expr(&if_expr.cond, scope)?;
            expect_type(ty, FieldType::Bool, if_expr.cond.span())?;
            let then = compile_emit(block_expr(&if_expr.then_branch, expr.span())?, scope, target)?;
            match &if_expr.else_branch {
                Some((_, els)) => Ok(Emit::Branch(
                    cond,
                    Box::new(then),
                    Box::new(compile_emit(els, scope, target)?),
                )),
                None => Ok(Emit::When(cond, Box::new(then))),
            }
        }
        Expr::Block(b) => compile_emit(block_expr(&b.block, expr.span())?, scope, target),
        Expr::Paren(p) => compile_emit(&p.expr, scope, target),
        _ => {
            let cols = compile_row(expr, scope)?;
            check_row(&cols, target, expr.span())?;
            Ok(Emit::Row(cols.into_iter().map(|(c, _)| c).collect()))
        }
    }
}

/// Compile one row: `[a, b]`, `(a, b)`, a bare parameter (its whole tuple),
/// or a single value.
fn compile_row(expr: &Expr, scope: &Scope) -> Result<Vec<Typed>, LowerError> {
    match expr {
        Expr::Array(arr) => arr.elems.iter().map(|e| compile_expr(e, scope)).collect(),
        Expr::Tuple(t) => t.elems.iter().map(|e| compile_expr(e, scope)).collect(),
        Expr::Path(p) => {
            if let Some(ident) = p.path.get_ident()
                && let Some((param, schema)) = scope.param(&ident.to_string())
            {
                return Ok(schema
                    .fields()
                    .iter()
                    .enumerate()
                    .map(|(col, f)| (CExpr::Field { param, col }, f.ty))
                    .collect());
            }
            Ok(vec![compile_expr(expr, scope)?])
        }
        _ => Ok(vec![compile_expr(expr, scope)?]),
    }
}

fn check_row(cols: &[Typed], target: &Schema, span: Span) -> Result<(), LowerError> {
    if cols.len() != target.arity() {
        return Err(type_error(
            span,
            format!(
                "row has {} column(s) but the target expects {target}",
                cols.len()
            ),
        ));
    }
    for ((_, ty), field) in cols.iter().zip(target.fields()) {
        if *ty != field.ty {
            return Err(type_error(
                span,
                format!("field `{}` expects {}, found {ty}", field.name, field.ty),
            ));
        }
    }
    Ok(())
}

/// Compile and evaluate a row with no parameters in scope.
pub(crate) fn constant_row(expr: &Expr, target: &Schema) -> Result<Tuple, LowerError> {
    let emit = compile_emit(expr, &Scope::empty(), target)?;
    emit.eval(&[])
        .ok_or_else(|| type_error(expr.span(), "row does not evaluate to a value"))
}

/// Equality conjuncts `l.f == r.g` between parameters 0 and 1 in a row-level
/// condition, as `(left column, right column)` pairs.
pub(crate) fn join_keys(emit: &Emit) -> Vec<(usize, usize)> {
    let mut keys = Vec::new();
    if let Emit::When(cond, _) = emit {
        collect_keys(cond, &mut keys);
    }
    keys
}

fn collect_keys(cond: &CExpr, keys: &mut Vec<(usize, usize)>) {
    match cond {
        CExpr::Binary(CBinOp::And, l, r) => {
            collect_keys(l, keys);
            collect_keys(r, keys);
        }
        CExpr::Binary(CBinOp::Eq, l, r) => match (&**l, &**r) {
            (CExpr::Field { param: 0, col: a }, CExpr::Field { param: 1, col: b })
            | (CExpr::Field { param: 1, col: b }, CExpr::Field { param: 0, col: a }) => {
                keys.push((*a, *b));
            }
            _ => {}
        },
        _ => {}
    }
}

// ─── Evaluation ─────────────────────────────────────────────────────

impl CExpr {
    /// Evaluate against the closure's arguments. `None` when an operation
    /// fails (overflow, division by zero).
    pub(crate) fn eval(&self, args: &[&[Value]]) -> Option<Value> {
        match self {
            CExpr::Literal(v) => Some(v.clone()),
            CExpr::Field { param, col } => args.get(*param)?.get(*col).cloned(),
            CExpr::Binary(op, l, r) => {
                // Short-circuit for && and ||
                match op {
                    CBinOp::And => {
                        if !l.eval(args)?.as_bool()? {
                            return Some(Value::Bool(false));
                        }
                        return Some(Value::Bool(r.eval(args)?.as_bool()?));
                    }
                    CBinOp::Or => {
                        if l.eval(args)?.as_bool()? {
                            return Some(Value::Bool(true));
                        }
                        return Some(Value::Bool(r.eval(args)?.as_bool()?));
                    }
                    _ => {}
                }
                let l = l.eval(args)?;
                let r = r.eval(args)?;
                eval_binary_op(*op, &l, &r)
            }
            CExpr::Unary(CUnOp::Neg, e) => e.eval(args)?.neg(),
            CExpr::Unary(CUnOp::Not, e) => e.eval(args)?.not(),
            CExpr::If { cond, then, els } => {
                if cond.eval(args)?.as_bool()? {
                    then.eval(args)
                } else {
                    els.eval(args)
                }
            }
            CExpr::Format { pieces, args: fmt_args } => {
                let mut out = String::new();
                for (i, piece) in pieces.iter().enumerate() {
                    out.push_str(piece);
                    if let Some(arg) = fmt_args.get(i) {
                        out.push_str(&arg.eval(args)?.to_string());
                    }
                }
                Some(Value::string(out))
            }
            CExpr::Method(CMethod::Len, e) => e.eval(args)?.len(),
            CExpr::Method(CMethod::Abs, e) => e.eval(args)?.abs(),
            CExpr::Method(CMethod::ToString, e) => Some(Value::string(e.eval(args)?.to_string())),
        }
    }
}

fn eval_binary_op(op: CBinOp, l: &Value, r: &Value) -> Option<Value> {
    use std::cmp::Ordering;
    match op {
        CBinOp::Add => l.add(r),
        CBinOp::Sub => l.sub(r),
        CBinOp::Mul => l.mul(r),
        CBinOp::Div => l.div(r),
        CBinOp::Rem => l.rem(r),
        CBinOp::Eq => Some(Value::Bool(l == r)),
        CBinOp::Ne => Some(Value::Bool(l != r)),
        CBinOp::Lt => Some(Value::Bool(l.partial_cmp_val(r)? == Ordering::Less)),
        CBinOp::Le => Some(Value::Bool(l.partial_cmp_val(r)? != Ordering::Greater)),
        CBinOp::Gt => Some(Value::Bool(l.partial_cmp_val(r)? == Ordering::Greater)),
        CBinOp::Ge => Some(Value::Bool(l.partial_cmp_val(r)? != Ordering::Less)),
        CBinOp::And => Some(Value::Bool(l.as_bool()? && r.as_bool()?)),
        CBinOp::Or => Some(Value::Bool(l.as_bool()? || r.as_bool()?)),
    }
}

impl Emit {
    pub(crate) fn eval(&self, args: &[&[Value]]) -> Option<Tuple> {
        match self {
            Emit::Row(cols) => cols.iter().map(|c| c.eval(args)).collect(),
            Emit::When(cond, inner) => {
                if cond.eval(args)?.as_bool()? {
                    inner.eval(args)
                } else {
                    None
                }
            }
            Emit::Branch(cond, then, els) => {
                if cond.eval(args)?.as_bool()? {
                    then.eval(args)
                } else {
                    els.eval(args)
                }
            }
        }
    }
}
