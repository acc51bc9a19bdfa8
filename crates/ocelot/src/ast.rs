use std::fmt::{self, Display};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::error::SourceLocation;

/// Stable identity of one AST node, unique within a single compilation.
///
/// Ids are assigned monotonically by the builder starting at 1 and key every
/// side table: source positions, checker types, resolved references, and the
/// macro-call record. Id 0 never identifies a real node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExprId(u32);

impl ExprId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded literal token.
///
/// Literal decoding (escape sequences, integer bases, the `u` suffix) happens
/// in the parser; by the time a literal reaches the AST it is a plain value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl LiteralValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null_type",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Uint(_) => "uint",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }
}

/// One `key: value` entry of a map literal.
///
/// The entry itself carries an id (distinct from the key and value node ids)
/// so the checker can anchor entry-level diagnostics, e.g. a bad key type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapEntry {
    pub entry_id: ExprId,
    pub key: Expr,
    pub value: Expr,
    /// True for `?key: value` entries: the value expression yields an
    /// `optional` and the entry is omitted when it is empty.
    pub optional: bool,
}

/// One `field: value` initializer of a struct construction expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructField {
    pub field_id: ExprId,
    pub name: String,
    pub value: Expr,
    /// True for `?field: value` initializers, mirroring optional map entries.
    pub optional: bool,
}

/// The lowered form of every iteration macro.
///
/// `iter_var2` is present only for the two-variable comprehensions, where the
/// first variable binds the list index or map key and the second the element
/// or map value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComprehensionExpr {
    pub iter_range: Expr,
    pub iter_var: String,
    pub iter_var2: Option<String>,
    pub accu_var: String,
    pub accu_init: Expr,
    pub loop_condition: Expr,
    pub loop_step: Expr,
    pub result: Expr,
}

/// An expression node: stable id plus variant payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
}

/// Expression variants of the abstract syntax tree.
///
/// Operators are already lowered to their canonical function names
/// (`_+_`, `_[_]`, …) by the builder, so `Call` is the only application form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(LiteralValue),
    Ident(String),
    /// Field selection `operand.field`, or a presence test when `test_only`
    /// (the lowering of `has(operand.field)`).
    Select {
        operand: Box<Expr>,
        field: String,
        test_only: bool,
    },
    /// Function application. Receiver-style calls (`target.f(args)`) carry
    /// `target = Some`; global calls carry `None`.
    Call {
        function: String,
        target: Option<Box<Expr>>,
        args: Vec<Expr>,
    },
    /// List construction. `optional_indices` holds the positions (sorted,
    /// ascending) whose element expression yields an `optional` to be
    /// skipped when empty.
    List {
        elements: Vec<Expr>,
        optional_indices: Vec<u32>,
    },
    Map {
        entries: Vec<MapEntry>,
    },
    Struct {
        type_name: String,
        fields: Vec<StructField>,
    },
    Comprehension(Box<ComprehensionExpr>),
    /// Placeholder emitted for error-recovery; never survives a successful
    /// parse.
    Unspecified,
}

impl Expr {
    pub fn new(id: ExprId, kind: ExprKind) -> Self {
        Self { id, kind }
    }

    /// Walks the subtree rooted here, calling `f` on every node.
    pub fn visit(&self, f: &mut impl FnMut(&Self)) {
        f(self);
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Ident(_) | ExprKind::Unspecified => {}
            ExprKind::Select { operand, .. } => operand.visit(f),
            ExprKind::Call { target, args, .. } => {
                if let Some(target) = target {
                    target.visit(f);
                }
                for arg in args {
                    arg.visit(f);
                }
            }
            ExprKind::List { elements, .. } => {
                for element in elements {
                    element.visit(f);
                }
            }
            ExprKind::Map { entries } => {
                for entry in entries {
                    entry.key.visit(f);
                    entry.value.visit(f);
                }
            }
            ExprKind::Struct { fields, .. } => {
                for field in fields {
                    field.value.visit(f);
                }
            }
            ExprKind::Comprehension(c) => {
                c.iter_range.visit(f);
                c.accu_init.visit(f);
                c.loop_condition.visit(f);
                c.loop_step.visit(f);
                c.result.visit(f);
            }
        }
    }
}

/// Allocator for fresh node ids.
///
/// Shared between the parser and the macro expanders so that expansion output
/// continues the same monotonic sequence as the surrounding parse.
#[derive(Debug, Default)]
pub struct IdGen {
    next: u32,
}

impl IdGen {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> ExprId {
        let id = ExprId(self.next);
        self.next += 1;
        id
    }

    /// Resumes allocation after the given id. Used when re-expanding a
    /// stored AST must not collide with existing ids.
    pub fn resume_after(max_seen: ExprId) -> Self {
        Self { next: max_seen.0 + 1 }
    }
}

/// Source text plus the side tables needed to report positions.
///
/// Created by the builder, owned by the [`Ast`], and never mutated after
/// checking. `macro_calls` preserves each pre-expansion call so tooling can
/// re-print the surface form of expanded macros.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceInfo {
    source: String,
    /// Byte offset at which each line starts; index 0 is always 0.
    line_starts: Vec<u32>,
    /// Byte span `(start, end)` of each expression node.
    positions: AHashMap<ExprId, (u32, u32)>,
    /// Expanded node id → the original macro `Call` expression.
    macro_calls: AHashMap<ExprId, Expr>,
}

impl SourceInfo {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let mut line_starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(u32::try_from(i + 1).unwrap_or(u32::MAX));
            }
        }
        Self {
            source,
            line_starts,
            positions: AHashMap::new(),
            macro_calls: AHashMap::new(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn record_position(&mut self, id: ExprId, start: u32, end: u32) {
        self.positions.insert(id, (start, end));
    }

    pub fn record_macro_call(&mut self, expanded: ExprId, original: Expr) {
        self.macro_calls.insert(expanded, original);
    }

    pub fn position(&self, id: ExprId) -> Option<(u32, u32)> {
        self.positions.get(&id).copied()
    }

    pub fn macro_call(&self, id: ExprId) -> Option<&Expr> {
        self.macro_calls.get(&id)
    }

    pub fn macro_calls(&self) -> impl Iterator<Item = (ExprId, &Expr)> {
        self.macro_calls.iter().map(|(id, expr)| (*id, expr))
    }

    /// Converts a byte offset to a 1-based `line:column` location.
    ///
    /// Columns count Unicode scalar values from the line start, so multi-byte
    /// characters advance the column by one.
    pub fn location_of_offset(&self, offset: u32) -> SourceLocation {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        let line_start = self.line_starts[line_idx] as usize;
        let upto = &self.source[line_start..(offset as usize).min(self.source.len())];
        SourceLocation {
            line: u32::try_from(line_idx + 1).unwrap_or(u32::MAX),
            column: u32::try_from(upto.chars().count() + 1).unwrap_or(u32::MAX),
        }
    }

    /// Location of a node's start offset, when the node is known.
    pub fn location(&self, id: ExprId) -> Option<SourceLocation> {
        self.position(id).map(|(start, _)| self.location_of_offset(start))
    }
}

/// A parsed (and macro-expanded) expression with its source info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ast {
    pub expr: Expr,
    pub source_info: SourceInfo,
}

impl Ast {
    /// Serializes the AST to a compact binary form.
    ///
    /// Lets hosts cache parsed expressions and skip re-parsing on later runs.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Restores an AST previously serialized with [`Ast::dump`].
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }

    /// The largest id assigned anywhere in the tree, including macro-call
    /// records. Used to resume id allocation without collisions.
    pub fn max_id(&self) -> ExprId {
        let mut max = ExprId(0);
        let mut track = |e: &Expr| {
            if e.id > max {
                max = e.id;
            }
            if let ExprKind::Map { entries } = &e.kind {
                for entry in entries {
                    if entry.entry_id > max {
                        max = entry.entry_id;
                    }
                }
            }
            if let ExprKind::Struct { fields, .. } = &e.kind {
                for field in fields {
                    if field.field_id > max {
                        max = field.field_id;
                    }
                }
            }
        };
        self.expr.visit(&mut track);
        for (_, original) in self.source_info.macro_calls() {
            original.visit(&mut track);
        }
        max
    }
}
