//! Lowering from parsed program text to an engine [`Program`].

use bloom_eval::{
    EvalError, FieldType, Operator, Persistence, Program, ProgramBuilder, Schema, TemporalOp, Tuple,
    Value,
};
use bloom_syntax::{BloomProgram, CollectionKind, CollectionNode, FieldNode, MergeOpNode, RuleNode, line_col};
use proc_macro2::Span;
use rustc_hash::FxHashSet;
use syn::spanned::Spanned;
use syn::{Expr, Ident};

use crate::compile::{Emit, Scope, compile_emit, compile_expr, constant_row, join_keys};
use crate::{LowerError, type_error, unsupported};

/// Name of the implicitly declared standard-output stream.
pub const STDIO: &str = "stdio";

/// Lower a parsed program: declare its collections, stage its bootstrap
/// rows and compile its rules.
pub fn lower(ast: &BloomProgram) -> Result<Program, LowerError> {
    let mut builder = Program::builder();

    for node in &ast.collections {
        let schema = lower_schema(node)?;
        let name = node.name.to_string();
        builder.declare(name, schema, persistence(&node.kind))?;
    }
    if builder.lookup(STDIO).is_none() {
        builder.stream(STDIO, Schema::new([("line", FieldType::Str)]))?;
    }

    for rule in &ast.bootstrap {
        lower_bootstrap(&mut builder, rule)?;
    }
    for (block, rule) in ast.rules() {
        lower_rule(&mut builder, block, rule)?;
    }

    let program = builder.build();
    tracing::debug!(
        collections = program.collections().len(),
        rules = program.rules().len(),
        "lowered program"
    );
    Ok(program)
}

fn persistence(kind: &CollectionKind) -> Persistence {
    match kind {
        CollectionKind::Scratch(_) => Persistence::Scratch,
        CollectionKind::Table(_) => Persistence::Table,
        CollectionKind::Sqltable(_) => Persistence::DurableTable,
        CollectionKind::Stream(_) => Persistence::StreamSink,
    }
}

fn lower_schema(node: &CollectionNode) -> Result<Schema, LowerError> {
    let mut seen = FxHashSet::default();
    for field in node.fields() {
        if !seen.insert(field.name.to_string()) {
            return Err(type_error(
                field.name.span(),
                format!("field `{}` is declared twice in `{}`", field.name, node.name),
            ));
        }
    }
    let keys = lower_fields(&node.keys)?;
    if node.values.is_empty() {
        Ok(Schema::new(keys))
    } else {
        Ok(Schema::keyed(keys, lower_fields(&node.values)?))
    }
}

fn lower_fields(fields: &[FieldNode]) -> Result<Vec<(String, FieldType)>, LowerError> {
    fields
        .iter()
        .map(|f| Ok((f.name.to_string(), lower_type(&f.ty)?)))
        .collect()
}

/// Map a written field type onto the closed set of field types.
pub(crate) fn lower_type(ty: &syn::Type) -> Result<FieldType, LowerError> {
    match ty {
        syn::Type::Reference(r) => lower_type(&r.elem),
        syn::Type::Path(p) if p.qself.is_none() => {
            let Some(last) = p.path.segments.last() else {
                return Err(type_error(ty.span(), "empty type"));
            };
            let name = last.ident.to_string();
            match (name.as_str(), &last.arguments) {
                ("int" | "i64" | "i32", syn::PathArguments::None) => Ok(FieldType::Int),
                ("bool", syn::PathArguments::None) => Ok(FieldType::Bool),
                ("string" | "String" | "str", syn::PathArguments::None) => Ok(FieldType::Str),
                ("opaque" | "bytes", syn::PathArguments::None) => Ok(FieldType::Opaque),
                ("Vec", syn::PathArguments::AngleBracketed(args)) if is_u8(args) => Ok(FieldType::Opaque),
                _ => Err(type_error(
                    ty.span(),
                    format!("unknown field type `{}`", quote::quote!(#ty)),
                )),
            }
        }
        _ => Err(type_error(
            ty.span(),
            format!("unknown field type `{}`", quote::quote!(#ty)),
        )),
    }
}

fn is_u8(args: &syn::AngleBracketedGenericArguments) -> bool {
    match args.args.iter().collect::<Vec<_>>().as_slice() {
        [syn::GenericArgument::Type(syn::Type::Path(p))] => p.path.is_ident("u8"),
        _ => false,
    }
}

fn temporal_op(op: &MergeOpNode) -> TemporalOp {
    match op {
        MergeOpNode::Now(_) | MergeOpNode::Async(_) => TemporalOp::MergeNow,
        MergeOpNode::NextTick(_) => TemporalOp::MergeNextTick,
        MergeOpNode::RetractNextTick(_) => TemporalOp::MergeRetractNextTick,
    }
}

fn rule_label(block: Option<&Ident>, rule: &RuleNode) -> String {
    let (line, column) = line_col(rule.span());
    let head = format!("{} {} at {line}:{column}", rule.target, rule.op.symbol());
    match block {
        Some(name) => format!("{name}: {head}"),
        None => head,
    }
}

fn target_schema(builder: &ProgramBuilder, rule: &RuleNode) -> Result<(Schema, Persistence), LowerError> {
    let name = rule.target.to_string();
    builder
        .lookup(&name)
        .map(|d| (d.schema.clone(), d.persistence))
        .ok_or_else(|| LowerError::Eval(EvalError::UnknownCollection(name)))
}

fn source_schema(builder: &ProgramBuilder, name: &Ident) -> Result<Schema, LowerError> {
    let name = name.to_string();
    builder
        .lookup(&name)
        .map(|d| d.schema.clone())
        .ok_or_else(|| LowerError::Eval(EvalError::UnknownCollection(name)))
}

fn lower_bootstrap(builder: &mut ProgramBuilder, rule: &RuleNode) -> Result<(), LowerError> {
    if !matches!(rule.op, MergeOpNode::Now(_)) {
        return Err(unsupported(
            rule.op.span(),
            format!("bootstrap rules merge with `<=`, not `{}`", rule.op.symbol()),
        ));
    }
    let (schema, _) = target_schema(builder, rule)?;
    let Expr::Array(rows) = &rule.body else {
        return Err(unsupported(
            rule.body.span(),
            "bootstrap rules must list literal rows in `[...]`",
        ));
    };
    let rows = rows
        .elems
        .iter()
        .map(|row| constant_row(row, &schema))
        .collect::<Result<Vec<_>, _>>()?;
    builder.bootstrap(&rule.target.to_string(), rows)?;
    Ok(())
}

fn lower_rule(builder: &mut ProgramBuilder, block: Option<&Ident>, rule: &RuleNode) -> Result<(), LowerError> {
    let (target, persistence) = target_schema(builder, rule)?;
    if matches!(rule.op, MergeOpNode::Async(_)) && persistence != Persistence::StreamSink {
        return Err(type_error(
            rule.op.span(),
            format!("`<~` must target a stream, but `{}` is a {persistence}", rule.target),
        ));
    }
    let operator = lower_body(builder, &rule.body, &target)?;
    let label = rule_label(block, rule);
    tracing::trace!(rule = %label, "lowered rule");
    builder.labeled_rule(label, &rule.target.to_string(), temporal_op(&rule.op), operator)?;
    Ok(())
}

fn lower_body(builder: &ProgramBuilder, body: &Expr, target: &Schema) -> Result<Operator, LowerError> {
    match body {
        Expr::Path(_) => {
            let source = collection_name(body)?;
            let schema = source_schema(builder, source)?;
            same_shape(&schema, target, body.span())?;
            Ok(Operator::scan(source.to_string()))
        }
        Expr::Array(rows) => {
            let rows = rows
                .elems
                .iter()
                .map(|row| constant_row(row, target))
                .collect::<Result<Vec<Tuple>, _>>()?;
            Ok(Operator::values(rows))
        }
        Expr::Paren(p) => lower_body(builder, &p.expr, target),
        Expr::MethodCall(call) => {
            let closure = single_closure(call)?;
            match call.method.to_string().as_str() {
                "map" => {
                    let source = collection_name(&call.receiver)?;
                    let schema = source_schema(builder, source)?;
                    let scope = Scope::bind(closure, &[&schema])?;
                    let emit = compile_emit(&closure.body, &scope, target)?;
                    Ok(Operator::map(source.to_string(), move |t| emit.eval(&[t])))
                }
                "filter" => {
                    let source = collection_name(&call.receiver)?;
                    let schema = source_schema(builder, source)?;
                    same_shape(&schema, target, call.receiver.span())?;
                    let scope = Scope::bind(closure, &[&schema])?;
                    let (cond, ty) = compile_expr(&closure.body, &scope)?;
                    if ty != FieldType::Bool {
                        return Err(type_error(
                            closure.body.span(),
                            format!("filter condition must be bool, found {ty}"),
                        ));
                    }
                    Ok(Operator::filter(source.to_string(), move |t| {
                        cond.eval(&[t]).and_then(|v| v.as_bool()).unwrap_or(false)
                    }))
                }
                "pairs" => {
                    let (left, right) = product(&call.receiver)?;
                    let left_schema = source_schema(builder, left)?;
                    let right_schema = source_schema(builder, right)?;
                    let scope = Scope::bind(closure, &[&left_schema, &right_schema])?;
                    let emit = compile_emit(&closure.body, &scope, target)?;
                    let keys = join_keys(&emit);
                    Ok(pairs(left, right, emit).on(keys))
                }
                other => Err(unsupported(call.method.span(), format!("collection method `{other}`"))),
            }
        }
        other => Err(unsupported(
            other.span(),
            "rule bodies are a collection, `.map`, `.filter`, `.pairs` or literal rows",
        )),
    }
}

fn pairs(left: &Ident, right: &Ident, emit: Emit) -> Operator {
    Operator::join(left.to_string(), right.to_string(), move |l, r| emit.eval(&[l, r]))
}

fn collection_name(expr: &Expr) -> Result<&Ident, LowerError> {
    match expr {
        Expr::Path(p) if p.qself.is_none() => p
            .path
            .get_ident()
            .ok_or_else(|| unsupported(expr.span(), "expected a collection name")),
        Expr::Paren(p) => collection_name(&p.expr),
        _ => Err(unsupported(expr.span(), "expected a collection name")),
    }
}

/// `(a * b)`
fn product(expr: &Expr) -> Result<(&Ident, &Ident), LowerError> {
    match expr {
        Expr::Paren(p) => product(&p.expr),
        Expr::Binary(bin) if matches!(bin.op, syn::BinOp::Mul(_)) => {
            Ok((collection_name(&bin.left)?, collection_name(&bin.right)?))
        }
        _ => Err(unsupported(expr.span(), "`.pairs` needs a product `(left * right)`")),
    }
}

fn single_closure(call: &syn::ExprMethodCall) -> Result<&syn::ExprClosure, LowerError> {
    match call.args.iter().collect::<Vec<_>>().as_slice() {
        [Expr::Closure(c)] => Ok(c),
        _ => Err(unsupported(
            call.method.span(),
            format!("`.{}` takes a single closure", call.method),
        )),
    }
}

/// Whole tuples copied from `source` must fit `target` column for column.
fn same_shape(source: &Schema, target: &Schema, span: Span) -> Result<(), LowerError> {
    if source.field_types().eq(target.field_types()) {
        Ok(())
    } else {
        Err(type_error(span, format!("{source} does not fit {target}")))
    }
}

/// Parse a literal row for `schema`, e.g. `("george", 5, "green")`.
pub fn parse_row(schema: &Schema, text: &str) -> Result<Tuple, LowerError> {
    let expr: Expr = syn::parse_str(text)?;
    constant_row(&expr, schema)
}

/// Parse a query pattern for `schema`: literal columns must match, `_`
/// matches anything.
pub fn parse_pattern(schema: &Schema, text: &str) -> Result<Vec<Option<Value>>, LowerError> {
    let expr: Expr = syn::parse_str(text)?;
    let cols: Vec<&Expr> = match &expr {
        Expr::Tuple(t) => t.elems.iter().collect(),
        Expr::Array(a) => a.elems.iter().collect(),
        Expr::Paren(p) => vec![&*p.expr],
        other => vec![other],
    };
    if cols.len() != schema.arity() {
        return Err(type_error(
            expr.span(),
            format!("pattern has {} column(s) but {schema} has {}", cols.len(), schema.arity()),
        ));
    }
    cols.into_iter()
        .zip(schema.fields())
        .map(|(col, field)| {
            if matches!(col, Expr::Infer(_)) {
                return Ok(None);
            }
            let (c, ty) = compile_expr(col, &Scope::empty())?;
            if ty != field.ty {
                return Err(type_error(
                    col.span(),
                    format!("field `{}` expects {}, found {ty}", field.name, field.ty),
                ));
            }
            c.eval(&[])
                .map(Some)
                .ok_or_else(|| type_error(col.span(), "pattern column does not evaluate"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;

    #[test]
    fn test_declares_stdio() {
        let program = compile("state { table t(x: int); }").unwrap();
        let stdio = program.collection_id(STDIO).unwrap();
        assert_eq!(program.decl(stdio).persistence, Persistence::StreamSink);
    }

    #[test]
    fn test_keyed_schema() {
        let program = compile("state { sqltable nodes(name: string => reachable: bool); }").unwrap();
        let id = program.collection_id("nodes").unwrap();
        let decl = program.decl(id);
        assert_eq!(decl.persistence, Persistence::DurableTable);
        assert_eq!(decl.schema.key_len(), 1);
        assert_eq!(decl.schema.arity(), 2);
    }

    #[test]
    fn test_rust_type_spellings() {
        let program =
            compile("state { table t(a: i64, b: String, c: Vec<u8>, d: &str, e: bool); }").unwrap();
        let id = program.collection_id("t").unwrap();
        let types: Vec<FieldType> = program.decl(id).schema.field_types().collect();
        assert_eq!(
            types,
            vec![
                FieldType::Int,
                FieldType::Str,
                FieldType::Opaque,
                FieldType::Str,
                FieldType::Bool
            ]
        );
    }

    #[test]
    fn test_unknown_type() {
        let err = compile("state { table t(a: f64); }").unwrap_err();
        assert!(matches!(err, LowerError::Type { line: 1, .. }));
    }

    #[test]
    fn test_duplicate_field() {
        assert!(compile("state { table t(a: int, a: int); }").is_err());
    }

    #[test]
    fn test_rule_labels_carry_location() {
        let program = compile(
            "state { table a(x: int); table b(x: int); }\nbloom step {\n    b <+ a;\n}",
        )
        .unwrap();
        assert_eq!(program.rules()[0].label(), "step: b <+ at 3:5");
    }

    #[test]
    fn test_async_requires_stream() {
        let err = compile("state { table a(x: int); table b(x: int); } bloom { b <~ a; }").unwrap_err();
        assert!(err.to_string().contains("`<~` must target a stream"));
    }

    #[test]
    fn test_reading_stream_rejected() {
        let err = compile(r#"state { table t(line: string); } bloom { t <= stdio; }"#).unwrap_err();
        assert!(matches!(err, LowerError::Eval(EvalError::WriteOnlySource(_))));
    }

    #[test]
    fn test_unknown_collection() {
        let err = compile("state { table a(x: int); } bloom { a <= missing; }").unwrap_err();
        assert!(matches!(err, LowerError::Eval(EvalError::UnknownCollection(name)) if name == "missing"));
    }

    #[test]
    fn test_scan_shape_checked() {
        let err =
            compile("state { table a(x: int); table b(x: string); } bloom { b <= a; }").unwrap_err();
        assert!(matches!(err, LowerError::Type { .. }));
    }

    #[test]
    fn test_filter_must_be_bool() {
        let err = compile("state { table a(x: int); } bloom { a <= a.filter(|r| r.x + 1); }").unwrap_err();
        assert!(err.to_string().contains("filter condition must be bool"));
    }

    #[test]
    fn test_join_keys_become_hints() {
        let program = compile(
            r#"
            state {
                table link(from: string, to: string);
                table path(from: string, to: string);
            }
            bloom {
                path <= (link * path).pairs(|l, p| if l.to == p.from { (l.from, p.to) });
            }
            "#,
        )
        .unwrap();
        assert!(program.rules()[0].is_recursive());
    }

    #[test]
    fn test_bootstrap_rows() {
        let err = compile("state { table t(x: int); } bootstrap { t <= t; }").unwrap_err();
        assert!(matches!(err, LowerError::Unsupported { .. }));
        assert!(compile("state { table t(x: int); } bootstrap { t <= [1, 2, 3]; }").is_ok());
    }

    #[test]
    fn test_parse_row() {
        let schema = Schema::new([("name", FieldType::Str), ("id", FieldType::Int)]);
        assert_eq!(
            parse_row(&schema, r#"("ann", -2)"#).unwrap(),
            vec![Value::from("ann"), Value::from(-2)]
        );
        assert!(parse_row(&schema, r#"("ann", "two")"#).is_err());
        assert!(parse_row(&schema, "(").is_err());
    }

    #[test]
    fn test_parse_pattern() {
        let schema = Schema::new([("name", FieldType::Str), ("id", FieldType::Int)]);
        assert_eq!(
            parse_pattern(&schema, r#"(_, 5)"#).unwrap(),
            vec![None, Some(Value::from(5))]
        );
        assert!(parse_pattern(&schema, "(_)").is_err());
    }
}
