//! AST types and parsing for Bloom program text.

use derive_syn_parse::Parse;
use proc_macro2::Span;
use syn::parse::{Parse, ParseStream};
use syn::{Expr, Ident, Result, Token, Type, braced, parenthesized};

use crate::utils::join_spans;

mod kw {
    syn::custom_keyword!(state);
    syn::custom_keyword!(bootstrap);
    syn::custom_keyword!(bloom);
    syn::custom_keyword!(scratch);
    syn::custom_keyword!(table);
    syn::custom_keyword!(sqltable);
    syn::custom_keyword!(stream);
}

/// Persistence keyword of a collection declaration.
#[derive(Parse, Clone, Debug)]
pub enum CollectionKind {
    #[peek(kw::scratch, name = "scratch")]
    Scratch(kw::scratch),
    #[peek(kw::table, name = "table")]
    Table(kw::table),
    #[peek(kw::sqltable, name = "sqltable")]
    Sqltable(kw::sqltable),
    #[peek(kw::stream, name = "stream")]
    Stream(kw::stream),
}

impl CollectionKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            CollectionKind::Scratch(_) => "scratch",
            CollectionKind::Table(_) => "table",
            CollectionKind::Sqltable(_) => "sqltable",
            CollectionKind::Stream(_) => "stream",
        }
    }

    pub fn span(&self) -> Span {
        match self {
            CollectionKind::Scratch(k) => k.span,
            CollectionKind::Table(k) => k.span,
            CollectionKind::Sqltable(k) => k.span,
            CollectionKind::Stream(k) => k.span,
        }
    }
}

fn peek_collection_kind(input: ParseStream) -> bool {
    input.peek(kw::scratch) || input.peek(kw::table) || input.peek(kw::sqltable) || input.peek(kw::stream)
}

/// A typed field: `name: type`
#[derive(Parse, Clone)]
pub struct FieldNode {
    pub name: Ident,
    pub colon: Token![:],
    pub ty: Type,
}

impl std::fmt::Debug for FieldNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ty = &self.ty;
        write!(f, "{}: {}", self.name, quote::quote!(#ty))
    }
}

/// A collection declaration: `table name(k: type, ... => v: type, ...);`
///
/// Fields before `=>` form the key; without `=>` every field is a key field.
#[derive(Clone)]
pub struct CollectionNode {
    pub kind: CollectionKind,
    pub name: Ident,
    pub keys: Vec<FieldNode>,
    pub values: Vec<FieldNode>,
}

impl CollectionNode {
    /// All fields, keys first.
    pub fn fields(&self) -> impl Iterator<Item = &FieldNode> {
        self.keys.iter().chain(&self.values)
    }
}

impl Parse for CollectionNode {
    fn parse(input: ParseStream) -> Result<Self> {
        let kind: CollectionKind = input.parse()?;
        let name: Ident = input.parse()?;
        let content;
        parenthesized!(content in input);

        let mut keys = vec![];
        let mut values = vec![];
        let mut seen_arrow = false;
        while !content.is_empty() {
            if content.peek(Token![=>]) {
                let arrow: Token![=>] = content.parse()?;
                if seen_arrow {
                    return Err(syn::Error::new(arrow.spans[0], "`=>` may appear only once"));
                }
                seen_arrow = true;
                continue;
            }
            let field: FieldNode = content.parse()?;
            if seen_arrow {
                values.push(field);
            } else {
                keys.push(field);
            }
            if content.is_empty() || content.peek(Token![=>]) {
                continue;
            }
            content.parse::<Token![,]>()?;
        }
        input.parse::<Token![;]>()?;

        if keys.is_empty() && !values.is_empty() {
            return Err(syn::Error::new(name.span(), "key columns are required before `=>`"));
        }
        Ok(CollectionNode {
            kind,
            name,
            keys,
            values,
        })
    }
}

impl std::fmt::Debug for CollectionNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionNode")
            .field("kind", &self.kind.keyword())
            .field("name", &self.name.to_string())
            .field("keys", &self.keys)
            .field("values", &self.values)
            .finish()
    }
}

/// The `<+` token.
#[derive(Parse, Clone)]
pub struct NextTickArrow(Token![<], Token![+]);

/// The `<+-` token.
#[derive(Parse, Clone)]
pub struct RetractArrow(Token![<], Token![+], Token![-]);

/// The `<~` token.
#[derive(Parse, Clone)]
pub struct AsyncArrow(Token![<], Token![~]);

/// Merge operator between a rule's target and its body.
#[derive(Clone)]
pub enum MergeOpNode {
    /// `<=`
    Now(Token![<=]),
    /// `<+`
    NextTick(NextTickArrow),
    /// `<+-`
    RetractNextTick(RetractArrow),
    /// `<~`
    Async(AsyncArrow),
}

impl MergeOpNode {
    pub fn symbol(&self) -> &'static str {
        match self {
            MergeOpNode::Now(_) => "<=",
            MergeOpNode::NextTick(_) => "<+",
            MergeOpNode::RetractNextTick(_) => "<+-",
            MergeOpNode::Async(_) => "<~",
        }
    }

    pub fn span(&self) -> Span {
        match self {
            MergeOpNode::Now(t) => join_spans(t.spans),
            MergeOpNode::NextTick(a) => join_spans([a.0.spans[0], a.1.spans[0]]),
            MergeOpNode::RetractNextTick(a) => join_spans([a.0.spans[0], a.1.spans[0], a.2.spans[0]]),
            MergeOpNode::Async(a) => join_spans([a.0.spans[0], a.1.spans[0]]),
        }
    }
}

impl Parse for MergeOpNode {
    fn parse(input: ParseStream) -> Result<Self> {
        if input.peek(Token![<=]) {
            return Ok(MergeOpNode::Now(input.parse()?));
        }
        if input.peek(Token![<]) {
            if input.peek2(Token![~]) {
                return Ok(MergeOpNode::Async(input.parse()?));
            }
            if input.peek2(Token![+]) {
                if input.peek3(Token![-]) {
                    return Ok(MergeOpNode::RetractNextTick(input.parse()?));
                }
                return Ok(MergeOpNode::NextTick(input.parse()?));
            }
        }
        Err(input.error("expected one of `<=`, `<+`, `<+-`, `<~`"))
    }
}

impl std::fmt::Debug for MergeOpNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// A rule: `target <op> body;`
#[derive(Parse, Clone)]
pub struct RuleNode {
    pub target: Ident,
    pub op: MergeOpNode,
    pub body: Expr,
    pub semi: Token![;],
}

impl RuleNode {
    pub fn span(&self) -> Span {
        self.target.span()
    }
}

impl std::fmt::Debug for RuleNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleNode")
            .field("target", &self.target.to_string())
            .field("op", &self.op)
            .finish()
    }
}

fn parse_rules(input: ParseStream) -> Result<Vec<RuleNode>> {
    let mut rules = vec![];
    while !input.is_empty() {
        rules.push(input.parse()?);
    }
    Ok(rules)
}

/// `state { declarations }`
#[derive(Parse, Clone, Debug)]
pub struct StateBlock {
    pub state_kw: kw::state,
    #[brace]
    pub brace: syn::token::Brace,
    #[inside(brace)]
    #[call(parse_collections)]
    pub collections: Vec<CollectionNode>,
}

fn parse_collections(input: ParseStream) -> Result<Vec<CollectionNode>> {
    let mut collections = vec![];
    while !input.is_empty() {
        if !peek_collection_kind(input) {
            return Err(input.error("expected `scratch`, `table`, `sqltable` or `stream`"));
        }
        collections.push(input.parse()?);
    }
    Ok(collections)
}

/// `bootstrap { rules }`: rows merged in during tick 0.
#[derive(Parse, Clone, Debug)]
pub struct BootstrapBlock {
    pub bootstrap_kw: kw::bootstrap,
    #[brace]
    pub brace: syn::token::Brace,
    #[inside(brace)]
    #[call(parse_rules)]
    pub rules: Vec<RuleNode>,
}

/// `bloom [name] { rules }`
#[derive(Clone, Debug)]
pub struct BloomBlock {
    pub name: Option<Ident>,
    pub rules: Vec<RuleNode>,
}

impl Parse for BloomBlock {
    fn parse(input: ParseStream) -> Result<Self> {
        input.parse::<kw::bloom>()?;
        let name = if input.peek(Ident) {
            Some(input.parse()?)
        } else {
            None
        };
        let content;
        braced!(content in input);
        let rules = parse_rules(&content)?;
        Ok(BloomBlock { name, rules })
    }
}

/// A complete program: any number of `state`, `bootstrap` and `bloom`
/// blocks, in any order.
#[derive(Debug, Default)]
pub struct BloomProgram {
    pub collections: Vec<CollectionNode>,
    pub bootstrap: Vec<RuleNode>,
    pub blocks: Vec<BloomBlock>,
}

impl BloomProgram {
    /// Every rule of every `bloom` block, in declaration order.
    pub fn rules(&self) -> impl Iterator<Item = (Option<&Ident>, &RuleNode)> {
        self.blocks
            .iter()
            .flat_map(|b| b.rules.iter().map(move |r| (b.name.as_ref(), r)))
    }
}

impl Parse for BloomProgram {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut program = BloomProgram::default();
        while !input.is_empty() {
            if input.peek(kw::state) {
                let block: StateBlock = input.parse()?;
                program.collections.extend(block.collections);
            } else if input.peek(kw::bootstrap) {
                let block: BootstrapBlock = input.parse()?;
                program.bootstrap.extend(block.rules);
            } else if input.peek(kw::bloom) {
                program.blocks.push(input.parse()?);
            } else {
                return Err(input.error("expected a `state`, `bootstrap` or `bloom` block"));
            }
        }
        Ok(program)
    }
}

/// Parse program text.
pub fn parse_program(src: &str) -> Result<BloomProgram> {
    syn::parse_str(src)
}

/// Collection declarations accepted on their own, without a `state` block.
/// Used by tools that declare collections interactively.
pub fn parse_declarations(src: &str) -> Result<Vec<CollectionNode>> {
    syn::parse::Parser::parse_str(parse_collections, src)
}

/// Rules accepted on their own, without a `bloom` block.
pub fn parse_rule_list(src: &str) -> Result<Vec<RuleNode>> {
    syn::parse::Parser::parse_str(parse_rules, src)
}
