use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    activation::{Activation, MutableActivation},
    ast::ExprId,
    checker::TYPE_NAMES,
    error::{RuntimeError, RuntimeErrorKind},
    provider::{FieldInfo, TypeProvider, WRAPPER_TYPES},
    stdlib::{self, Overload},
    types::CelType,
    value::{MapKey, MapValue, StructValue, UnknownSet, Value, cel_compare, cel_equals},
};

/// Ambient state threaded through evaluation: the type provider and the
/// enum representation flag. Variable state lives in the activation.
pub struct EvalContext<'a> {
    pub provider: &'a dyn TypeProvider,
    pub enums_as_ints: bool,
}

/// Strict binary operators lowered from their canonical call forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
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
    In,
}

/// Type conversion targets lowered from conversion function calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conversion {
    Int,
    Uint,
    Double,
    String,
    Bytes,
    Bool,
    Timestamp,
    Duration,
    Type,
    Dyn,
    /// Conversion to a named enum type via the `TypeProvider`.
    Enum(String),
}

/// One step of an attribute chain: a field name or a computed index.
#[derive(Debug)]
pub enum Qualifier {
    Field { field: String, id: ExprId },
    Index { index: Interpretable, id: ExprId },
}

/// A map or struct entry of a `CreateMap` / `CreateStruct` node.
#[derive(Debug)]
pub struct PlannedEntry<K> {
    pub key: K,
    pub value: Interpretable,
    pub optional: bool,
}

/// The evaluator node tree produced by the planner.
///
/// Each node evaluates to a [`Value`]; errors and unknowns are in-band
/// values, so evaluation never unwinds. The variants mirror the operations
/// of the language rather than its syntax: operators are specialised nodes,
/// select chains are attribute traversals.
#[derive(Debug)]
pub enum Interpretable {
    Const(Value),
    /// A variable reference; `candidates` holds the resolution names in
    /// precedence order (most-qualified first).
    Ident {
        name: String,
        candidates: Vec<String>,
        id: ExprId,
    },
    /// A folded `Ident`/`Select`/index chain. When the base identifier is
    /// absent from the activation, leading field qualifiers are folded into
    /// the name for qualified-reference resolution.
    Attr {
        base: Box<Interpretable>,
        qualifiers: Vec<Qualifier>,
    },
    Not {
        operand: Box<Interpretable>,
        id: ExprId,
    },
    NotStrictlyFalse {
        operand: Box<Interpretable>,
    },
    Neg {
        operand: Box<Interpretable>,
        id: ExprId,
    },
    And {
        left: Box<Interpretable>,
        right: Box<Interpretable>,
        id: ExprId,
    },
    Or {
        left: Box<Interpretable>,
        right: Box<Interpretable>,
        id: ExprId,
    },
    Conditional {
        condition: Box<Interpretable>,
        then: Box<Interpretable>,
        otherwise: Box<Interpretable>,
        id: ExprId,
    },
    Binary {
        op: BinaryOp,
        left: Box<Interpretable>,
        right: Box<Interpretable>,
        id: ExprId,
    },
    Call {
        function: String,
        candidates: Vec<Arc<Overload>>,
        args: Vec<Interpretable>,
        id: ExprId,
    },
    /// A single let-binding: evaluate `init`, bind it, evaluate `body`.
    /// The lowering of zero-iteration comprehensions (`cel.bind`).
    Block {
        var: String,
        init: Box<Interpretable>,
        body: Box<Interpretable>,
    },
    CreateList {
        elements: Vec<Interpretable>,
        optional_indices: Vec<u32>,
        id: ExprId,
    },
    CreateMap {
        entries: Vec<PlannedEntry<Interpretable>>,
        id: ExprId,
    },
    CreateStruct {
        type_name: String,
        fields: Vec<PlannedEntry<String>>,
        id: ExprId,
    },
    Index {
        base: Box<Interpretable>,
        index: Box<Interpretable>,
        id: ExprId,
    },
    Field {
        operand: Box<Interpretable>,
        field: String,
        id: ExprId,
    },
    HasField {
        operand: Box<Interpretable>,
        field: String,
        id: ExprId,
    },
    Comprehension(Box<ComprehensionPlan>),
    TypeConversion {
        conversion: Conversion,
        operand: Box<Interpretable>,
        id: ExprId,
    },
    /// `optional.or` / `orValue`: the alternative is evaluated only when the
    /// receiver is empty.
    OptionalOr {
        receiver: Box<Interpretable>,
        alternative: Box<Interpretable>,
        with_value: bool,
        id: ExprId,
    },
}

/// The lowered loop form shared by every iteration macro.
#[derive(Debug)]
pub struct ComprehensionPlan {
    pub iter_range: Interpretable,
    pub iter_var: String,
    pub iter_var2: Option<String>,
    pub accu_var: String,
    pub accu_init: Interpretable,
    pub loop_condition: Interpretable,
    pub loop_step: Interpretable,
    pub result: Interpretable,
    pub id: ExprId,
}

impl Interpretable {
    /// Evaluates this node against an activation.
    pub fn eval(&self, vars: &dyn Activation, ctx: &EvalContext<'_>) -> Value {
        match self {
            Self::Const(value) => value.clone(),
            Self::Ident { name, candidates, id } => eval_ident(name, candidates, vars, ctx, *id),
            Self::Attr { base, qualifiers } => eval_attr(base, qualifiers, vars, ctx),
            Self::Not { operand, id } => match operand.eval(vars, ctx) {
                Value::Bool(b) => Value::Bool(!b),
                exceptional if exceptional.is_exceptional() => exceptional,
                other => type_error(format!("!({})", other.type_name()), *id),
            },
            Self::NotStrictlyFalse { operand } => {
                // Converts error/unknown/non-bool into true; only a literal
                // false is false. Used as the loop guard of all()/exists().
                match operand.eval(vars, ctx) {
                    Value::Bool(false) => Value::Bool(false),
                    _ => Value::Bool(true),
                }
            }
            Self::Neg { operand, id } => match operand.eval(vars, ctx) {
                exceptional if exceptional.is_exceptional() => exceptional,
                value => crate::value::arith_neg(&value).unwrap_or_else(|e| Value::error(e.or_at(*id))),
            },
            Self::And { left, right, id } => eval_logic(left, right, vars, ctx, false, *id),
            Self::Or { left, right, id } => eval_logic(left, right, vars, ctx, true, *id),
            Self::Conditional {
                condition,
                then,
                otherwise,
                id,
            } => match condition.eval(vars, ctx) {
                Value::Bool(true) => then.eval(vars, ctx),
                Value::Bool(false) => otherwise.eval(vars, ctx),
                exceptional if exceptional.is_exceptional() => exceptional,
                other => type_error(format!("{} ? _ : _", other.type_name()), *id),
            },
            Self::Binary { op, left, right, id } => {
                let lhs = left.eval(vars, ctx);
                let rhs = right.eval(vars, ctx);
                if let Some(exceptional) = strict_guard([&lhs, &rhs]) {
                    return exceptional;
                }
                eval_binary(*op, &lhs, &rhs).unwrap_or_else(|e| Value::error(e.or_at(*id)))
            }
            Self::Call {
                function,
                candidates,
                args,
                id,
            } => {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(arg.eval(vars, ctx));
                }
                if let Some(exceptional) = strict_guard(evaluated.iter()) {
                    return exceptional;
                }
                match stdlib::dispatch(function, candidates, &evaluated) {
                    Value::Error(err) => Value::Error(Box::new(err.or_at(*id))),
                    value => value,
                }
            }
            Self::Block { var, init, body } => {
                let bound = init.eval(vars, ctx);
                let mut frame = MutableActivation::new(vars);
                frame.set(var, bound);
                body.eval(&frame, ctx)
            }
            Self::CreateList {
                elements,
                optional_indices,
                id,
            } => eval_create_list(elements, optional_indices, vars, ctx, *id),
            Self::CreateMap { entries, id } => eval_create_map(entries, vars, ctx, *id),
            Self::CreateStruct { type_name, fields, id } => eval_create_struct(type_name, fields, vars, ctx, *id),
            Self::Index { base, index, id } => {
                let base = base.eval(vars, ctx);
                let index = index.eval(vars, ctx);
                if let Some(exceptional) = strict_guard([&base, &index]) {
                    return exceptional;
                }
                stdlib::index_value(&base, &index).unwrap_or_else(|e| Value::error(e.or_at(*id)))
            }
            Self::Field { operand, field, id } => {
                let operand = operand.eval(vars, ctx);
                if operand.is_exceptional() {
                    return operand;
                }
                select_field(&operand, field, ctx).unwrap_or_else(|e| Value::error(e.or_at(*id)))
            }
            Self::HasField { operand, field, id } => {
                let operand = operand.eval(vars, ctx);
                if operand.is_exceptional() {
                    return operand;
                }
                has_field(&operand, field, ctx).unwrap_or_else(|e| Value::error(e.or_at(*id)))
            }
            Self::Comprehension(plan) => eval_comprehension(plan, vars, ctx),
            Self::TypeConversion { conversion, operand, id } => {
                let operand = operand.eval(vars, ctx);
                if operand.is_exceptional() {
                    return operand;
                }
                convert(conversion, &operand, ctx).unwrap_or_else(|e| Value::error(e.or_at(*id)))
            }
            Self::OptionalOr {
                receiver,
                alternative,
                with_value,
                id,
            } => {
                let receiver = receiver.eval(vars, ctx);
                match &receiver {
                    exceptional if exceptional.is_exceptional() => receiver,
                    Value::Optional(inner) => match (inner.as_ref(), *with_value) {
                        (Some(value), true) => value.clone(),
                        (Some(_), false) => receiver,
                        (None, _) => alternative.eval(vars, ctx),
                    },
                    other => type_error(format!("expected optional, found {}", other.type_name()), *id),
                }
            }
        }
    }

    /// Static upper-bound cost: one unit per node, summed over children.
    pub fn cost(&self) -> u64 {
        1 + match self {
            Self::Const(_) => 0,
            Self::Ident { .. } => 0,
            Self::Attr { base, qualifiers } => {
                base.cost()
                    + qualifiers
                        .iter()
                        .map(|q| match q {
                            Qualifier::Field { .. } => 1,
                            Qualifier::Index { index, .. } => index.cost(),
                        })
                        .sum::<u64>()
            }
            Self::Not { operand, .. } | Self::NotStrictlyFalse { operand } | Self::Neg { operand, .. } => operand.cost(),
            Self::And { left, right, .. } | Self::Or { left, right, .. } | Self::Binary { left, right, .. } => {
                left.cost() + right.cost()
            }
            Self::Conditional {
                condition,
                then,
                otherwise,
                ..
            } => condition.cost() + then.cost() + otherwise.cost(),
            Self::Call { args, .. } => args.iter().map(Self::cost).sum(),
            Self::Block { init, body, .. } => init.cost() + body.cost(),
            Self::CreateList { elements, .. } => elements.iter().map(Self::cost).sum(),
            Self::CreateMap { entries, .. } => entries.iter().map(|e| e.key.cost() + e.value.cost()).sum(),
            Self::CreateStruct { fields, .. } => fields.iter().map(|f| f.value.cost()).sum(),
            Self::Index { base, index, .. } => base.cost() + index.cost(),
            Self::Field { operand, .. } | Self::HasField { operand, .. } => operand.cost(),
            Self::Comprehension(plan) => {
                plan.iter_range.cost()
                    + plan.accu_init.cost()
                    + plan.loop_condition.cost()
                    + plan.loop_step.cost()
                    + plan.result.cost()
            }
            Self::TypeConversion { operand, .. } => operand.cost(),
            Self::OptionalOr {
                receiver, alternative, ..
            } => receiver.cost() + alternative.cost(),
        }
    }
}

fn type_error(message: String, id: ExprId) -> Value {
    Value::error(RuntimeError::no_such_overload(message).or_at(id))
}

/// Strict propagation: the first error wins; otherwise all unknowns merge.
fn strict_guard<'a>(values: impl IntoIterator<Item = &'a Value>) -> Option<Value> {
    let mut unknowns: Option<UnknownSet> = None;
    for value in values {
        match value {
            Value::Error(_) => return Some(value.clone()),
            Value::Unknown(set) => {
                unknowns = Some(match unknowns {
                    Some(current) => current.merge(set),
                    None => set.as_ref().clone(),
                });
            }
            _ => {}
        }
    }
    unknowns.map(|set| Value::Unknown(Arc::new(set)))
}

/// `&&` / `||` with absorption: `absorbing` is `false` for and, `true` for
/// or. A definite absorbing operand decides the result regardless of the
/// other side; two exceptionals keep the left one (unknowns merge).
fn eval_logic(
    left: &Interpretable,
    right: &Interpretable,
    vars: &dyn Activation,
    ctx: &EvalContext<'_>,
    absorbing: bool,
    id: ExprId,
) -> Value {
    let lhs = left.eval(vars, ctx);
    if matches!(lhs, Value::Bool(b) if b == absorbing) {
        return Value::Bool(absorbing);
    }
    let rhs = right.eval(vars, ctx);
    if matches!(rhs, Value::Bool(b) if b == absorbing) {
        return Value::Bool(absorbing);
    }
    match (&lhs, &rhs) {
        (Value::Bool(_), Value::Bool(_)) => Value::Bool(!absorbing),
        (Value::Unknown(a), Value::Unknown(b)) => Value::Unknown(Arc::new(a.merge(b))),
        (l, _) if l.is_exceptional() => lhs,
        (_, r) if r.is_exceptional() => rhs,
        (Value::Bool(_), other) | (other, _) => {
            let op = if absorbing { "||" } else { "&&" };
            type_error(format!("{}({})", op, other.type_name()), id)
        }
    }
}

fn eval_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    use crate::value::{arith_add, arith_div, arith_mul, arith_rem, arith_sub, contains};
    match op {
        BinaryOp::Add => arith_add(left, right),
        BinaryOp::Sub => arith_sub(left, right),
        BinaryOp::Mul => arith_mul(left, right),
        BinaryOp::Div => arith_div(left, right),
        BinaryOp::Rem => arith_rem(left, right),
        BinaryOp::Eq => Ok(Value::Bool(cel_equals(left, right))),
        BinaryOp::Ne => Ok(Value::Bool(!cel_equals(left, right))),
        BinaryOp::Lt => ordering(left, right, |o| o == std::cmp::Ordering::Less),
        BinaryOp::Le => ordering(left, right, |o| o != std::cmp::Ordering::Greater),
        BinaryOp::Gt => ordering(left, right, |o| o == std::cmp::Ordering::Greater),
        BinaryOp::Ge => ordering(left, right, |o| o != std::cmp::Ordering::Less),
        BinaryOp::In => contains(left, right),
    }
}

fn ordering(left: &Value, right: &Value, accept: fn(std::cmp::Ordering) -> bool) -> Result<Value, RuntimeError> {
    Ok(Value::Bool(cel_compare(left, right)?.is_some_and(accept)))
}

fn eval_ident(name: &str, candidates: &[String], vars: &dyn Activation, ctx: &EvalContext<'_>, id: ExprId) -> Value {
    for candidate in candidates {
        if let Some(value) = vars.resolve(candidate) {
            return value;
        }
    }
    resolve_static_name(candidates, ctx)
        .unwrap_or_else(|| Value::error(no_such_attribute(name).or_at(id)))
}

/// Type names and enum constants resolve without an activation entry.
fn resolve_static_name(candidates: &[String], ctx: &EvalContext<'_>) -> Option<Value> {
    for candidate in candidates {
        if TYPE_NAMES.contains(&candidate.as_str()) {
            return Some(Value::Type(Arc::from(candidate.as_str())));
        }
        if ctx.provider.find_struct_type(candidate).is_some() || ctx.provider.find_enum_type(candidate).is_some() {
            return Some(Value::Type(Arc::from(candidate.as_str())));
        }
        if let Some((enum_name, value_name)) = candidate.rsplit_once('.')
            && let Some(value) = ctx.provider.find_enum_value(enum_name, value_name)
        {
            return Some(make_enum(enum_name, value, ctx));
        }
    }
    None
}

fn make_enum(type_name: &str, value: i32, ctx: &EvalContext<'_>) -> Value {
    if ctx.enums_as_ints {
        Value::Int(i64::from(value))
    } else {
        Value::Enum(Arc::from(type_name), i64::from(value))
    }
}

fn no_such_attribute(name: &str) -> RuntimeError {
    RuntimeError::new(
        RuntimeErrorKind::NoSuchAttribute,
        format!("no such attribute '{name}'"),
    )
}

/// Attribute chain evaluation.
///
/// When the base is an identifier missing from the activation, leading field
/// qualifiers fold into progressively longer dotted names so qualified
/// references (`a.b.c` as one declared variable, or an enum constant)
/// resolve before field selection is attempted.
fn eval_attr(base: &Interpretable, qualifiers: &[Qualifier], vars: &dyn Activation, ctx: &EvalContext<'_>) -> Value {
    let (mut current, mut remaining) = match base {
        Interpretable::Ident { name, candidates, id } => {
            let mut resolved = None;
            for candidate in candidates {
                if let Some(value) = vars.resolve(candidate) {
                    resolved = Some(value);
                    break;
                }
            }
            match resolved {
                Some(value) => (value, qualifiers),
                None => {
                    // Fold `a.b.c` prefixes: longest match first.
                    let field_prefix: Vec<&str> = qualifiers
                        .iter()
                        .map_while(|q| match q {
                            Qualifier::Field { field, .. } => Some(field.as_str()),
                            Qualifier::Index { .. } => None,
                        })
                        .collect();
                    let mut matched = None;
                    'outer: for take in (1..=field_prefix.len()).rev() {
                        for candidate in candidates {
                            let qualified =
                                format!("{candidate}.{}", field_prefix[..take].join("."));
                            if let Some(value) = vars.resolve(&qualified) {
                                matched = Some((value, take));
                                break 'outer;
                            }
                            if let Some(value) = resolve_static_name(&[qualified], ctx) {
                                matched = Some((value, take));
                                break 'outer;
                            }
                        }
                    }
                    match matched {
                        Some((value, consumed)) => (value, &qualifiers[consumed..]),
                        None => match resolve_static_name(candidates, ctx) {
                            Some(value) => (value, qualifiers),
                            None => return Value::error(no_such_attribute(name).or_at(*id)),
                        },
                    }
                }
            }
        }
        other => (other.eval(vars, ctx), qualifiers),
    };
    loop {
        if current.is_exceptional() || remaining.is_empty() {
            return current;
        }
        let (qualifier, rest) = remaining.split_first().expect("non-empty");
        remaining = rest;
        current = match qualifier {
            Qualifier::Field { field, id } => {
                select_field(&current, field, ctx).unwrap_or_else(|e| Value::error(e.or_at(*id)))
            }
            Qualifier::Index { index, id } => {
                let index = index.eval(vars, ctx);
                if index.is_exceptional() {
                    return index;
                }
                stdlib::index_value(&current, &index).unwrap_or_else(|e| Value::error(e.or_at(*id)))
            }
        };
    }
}

/// `operand.field` for maps and structs.
fn select_field(operand: &Value, field: &str, ctx: &EvalContext<'_>) -> Result<Value, RuntimeError> {
    match operand {
        Value::Map(map) => {
            let key = MapKey::String(Arc::from(field));
            map.get(&key).cloned().ok_or_else(|| RuntimeError::no_such_key(field))
        }
        Value::Struct(s) => {
            if let Some(value) = s.fields.get(field) {
                return Ok(value.clone());
            }
            match ctx.provider.find_field(&s.type_name, field) {
                Some(info) => Ok(default_field_value(&info, ctx)),
                None => Err(RuntimeError::no_such_field(field)),
            }
        }
        other => Err(RuntimeError::no_such_overload(format!(
            "{}.{field}",
            other.type_name()
        ))),
    }
}

/// `has(operand.field)`.
fn has_field(operand: &Value, field: &str, ctx: &EvalContext<'_>) -> Result<Value, RuntimeError> {
    match operand {
        Value::Map(map) => {
            let key = MapKey::String(Arc::from(field));
            Ok(Value::Bool(map.contains_key(&key)))
        }
        Value::Struct(s) => {
            if ctx.provider.find_field(&s.type_name, field).is_none() {
                return Err(RuntimeError::no_such_field(field));
            }
            Ok(Value::Bool(s.fields.contains_key(field)))
        }
        other => Err(RuntimeError::no_such_overload(format!(
            "has({}.{field})",
            other.type_name()
        ))),
    }
}

/// The value an unset struct field reads as: null for presence-tracked
/// fields, the zero value otherwise.
fn default_field_value(info: &FieldInfo, ctx: &EvalContext<'_>) -> Value {
    if info.has_presence {
        return Value::Null;
    }
    default_for_type(&info.ty, ctx)
}

fn default_for_type(ty: &CelType, ctx: &EvalContext<'_>) -> Value {
    match ty {
        CelType::Bool => Value::Bool(false),
        CelType::Int => Value::Int(0),
        CelType::Uint => Value::Uint(0),
        CelType::Double => Value::Double(0.0),
        CelType::String => Value::from(""),
        CelType::Bytes => Value::bytes(Vec::new()),
        CelType::List(_) => Value::list(Vec::new()),
        CelType::Map(..) => Value::map(MapValue::new()),
        CelType::Duration => Value::Duration(chrono::TimeDelta::zero()),
        CelType::Timestamp => Value::Timestamp(chrono::DateTime::UNIX_EPOCH),
        CelType::Optional(_) => Value::optional_none(),
        CelType::Struct(name) => Value::Struct(Arc::new(StructValue {
            type_name: name.clone(),
            fields: IndexMap::new(),
        })),
        CelType::Opaque(name) => make_enum(name, 0, ctx),
        _ => Value::Null,
    }
}

fn eval_create_list(
    elements: &[Interpretable],
    optional_indices: &[u32],
    vars: &dyn Activation,
    ctx: &EvalContext<'_>,
    id: ExprId,
) -> Value {
    let mut items = Vec::with_capacity(elements.len());
    for (i, element) in elements.iter().enumerate() {
        let value = element.eval(vars, ctx);
        if value.is_exceptional() {
            return value;
        }
        if optional_indices.contains(&(i as u32)) {
            match value {
                Value::Optional(inner) => {
                    if let Some(inner) = inner.as_ref() {
                        items.push(inner.clone());
                    }
                }
                other => {
                    return type_error(format!("expected optional element, found {}", other.type_name()), id);
                }
            }
        } else {
            items.push(value);
        }
    }
    Value::list(items)
}

fn eval_create_map(
    entries: &[PlannedEntry<Interpretable>],
    vars: &dyn Activation,
    ctx: &EvalContext<'_>,
    id: ExprId,
) -> Value {
    let mut map = MapValue::with_capacity(entries.len());
    for entry in entries {
        let key = entry.key.eval(vars, ctx);
        if key.is_exceptional() {
            return key;
        }
        let value = entry.value.eval(vars, ctx);
        if value.is_exceptional() {
            return value;
        }
        let value = if entry.optional {
            match value {
                Value::Optional(inner) => match inner.as_ref() {
                    Some(inner) => inner.clone(),
                    None => continue,
                },
                other => {
                    return type_error(format!("expected optional value, found {}", other.type_name()), id);
                }
            }
        } else {
            value
        };
        let key = match MapKey::from_value(&key) {
            Ok(key) => key,
            Err(err) => return Value::error(err.or_at(id)),
        };
        if map.contains_key(&key) {
            return Value::error(
                RuntimeError::invalid_argument(format!("repeated key '{key}' in map literal")).or_at(id),
            );
        }
        map.insert(key, value);
    }
    Value::map(map)
}

fn eval_create_struct(
    type_name: &str,
    fields: &[PlannedEntry<String>],
    vars: &dyn Activation,
    ctx: &EvalContext<'_>,
    id: ExprId,
) -> Value {
    if ctx.provider.find_struct_type(type_name).is_none() {
        return Value::error(
            RuntimeError::type_mismatch(format!("unknown struct type '{type_name}'")).or_at(id),
        );
    }
    let mut out: IndexMap<String, Value> = IndexMap::with_capacity(fields.len());
    for field in fields {
        let Some(info) = ctx.provider.find_field(type_name, &field.key) else {
            return Value::error(RuntimeError::no_such_field(&field.key).or_at(id));
        };
        let value = field.value.eval(vars, ctx);
        if value.is_exceptional() {
            return value;
        }
        let value = if field.optional {
            match value {
                Value::Optional(inner) => match inner.as_ref() {
                    Some(inner) => inner.clone(),
                    None => continue,
                },
                other => {
                    return type_error(format!("expected optional value, found {}", other.type_name()), id);
                }
            }
        } else {
            value
        };
        let value = match coerce_field_value(&info, value, ctx) {
            Ok(value) => value,
            Err(err) => return Value::error(err.or_at(id)),
        };
        // Default-valued fields are elided unless presence matters.
        if !info.is_oneof && !info.has_presence && is_default_value(&info.ty, &value, ctx) {
            continue;
        }
        out.insert(field.key.clone(), value);
    }
    Value::Struct(Arc::new(StructValue {
        type_name: type_name.to_owned(),
        fields: out,
    }))
}

/// Applies null rules, wrapper coercion, and enum range checks to one
/// struct field initializer.
fn coerce_field_value(info: &FieldInfo, value: Value, ctx: &EvalContext<'_>) -> Result<Value, RuntimeError> {
    if matches!(value, Value::Null) {
        let nullable = matches!(info.ty, CelType::Struct(_) | CelType::Optional(_) | CelType::Dyn | CelType::Null)
            || WRAPPER_TYPES.contains(&info.proto_type.as_str());
        if !nullable {
            return Err(RuntimeError::type_mismatch(format!(
                "null is not assignable to field of type '{}'",
                info.ty
            )));
        }
        return Ok(Value::Null);
    }
    match info.proto_type.as_str() {
        "google.protobuf.Int32Value" | "int32" | "sint32" | "sfixed32" => {
            if let Value::Int(i) = value {
                if i32::try_from(i).is_err() {
                    return Err(RuntimeError::new(RuntimeErrorKind::RangeError, "int32 out of range"));
                }
            }
            Ok(value)
        }
        "google.protobuf.UInt32Value" | "uint32" | "fixed32" => {
            if let Value::Uint(u) = value {
                if u32::try_from(u).is_err() {
                    return Err(RuntimeError::new(RuntimeErrorKind::RangeError, "uint32 out of range"));
                }
            }
            Ok(value)
        }
        "google.protobuf.FloatValue" | "float" => match value {
            Value::Double(d) => Ok(Value::Double(f64::from(d as f32))),
            other => Ok(other),
        },
        _ => match &info.ty {
            CelType::Opaque(enum_name) => match value {
                Value::Int(i) => {
                    let narrowed = i32::try_from(i)
                        .map_err(|_| RuntimeError::new(RuntimeErrorKind::RangeError, "enum value out of range"))?;
                    Ok(make_enum(enum_name, narrowed, ctx))
                }
                Value::Enum(..) => Ok(value),
                other => Err(RuntimeError::type_mismatch(format!(
                    "cannot assign {} to enum field",
                    other.type_name()
                ))),
            },
            _ => Ok(value),
        },
    }
}

fn is_default_value(ty: &CelType, value: &Value, ctx: &EvalContext<'_>) -> bool {
    cel_equals(value, &default_for_type(ty, ctx))
}

fn eval_comprehension(plan: &ComprehensionPlan, vars: &dyn Activation, ctx: &EvalContext<'_>) -> Value {
    let range = plan.iter_range.eval(vars, ctx);
    if range.is_exceptional() {
        return range;
    }
    enum Iteration {
        List(Arc<Vec<Value>>),
        Map(Arc<MapValue>),
    }
    let iteration = match range {
        Value::List(items) => Iteration::List(items),
        Value::Map(map) => Iteration::Map(map),
        other => {
            return Value::error(
                RuntimeError::type_mismatch(format!("cannot iterate over {}", other.type_name())).or_at(plan.id),
            );
        }
    };

    let accu = plan.accu_init.eval(vars, ctx);
    let mut frame = MutableActivation::new(vars);
    frame.set(&plan.accu_var, accu);

    let pairs: Vec<(Value, Option<Value>)> = match &iteration {
        Iteration::List(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                if plan.iter_var2.is_some() {
                    (Value::Int(i as i64), Some(item.clone()))
                } else {
                    (item.clone(), None)
                }
            })
            .collect(),
        Iteration::Map(map) => map
            .iter()
            .map(|(key, value)| {
                if plan.iter_var2.is_some() {
                    (key.to_value(), Some(value.clone()))
                } else {
                    (key.to_value(), None)
                }
            })
            .collect(),
    };

    for (first, second) in pairs {
        frame.set(&plan.iter_var, first);
        if let (Some(var2), Some(second)) = (&plan.iter_var2, second) {
            frame.set(var2, second);
        }
        match plan.loop_condition.eval(&frame, ctx) {
            Value::Bool(true) => {}
            Value::Bool(false) => break,
            exceptional if exceptional.is_exceptional() => return exceptional,
            other => {
                return Value::error(
                    RuntimeError::type_mismatch(format!(
                        "loop condition must be bool, found {}",
                        other.type_name()
                    ))
                    .or_at(plan.id),
                );
            }
        }
        // The step may produce an error value; it is rebound rather than
        // aborting so the logical operators in the step can still absorb it
        // on a later iteration.
        let next = plan.loop_step.eval(&frame, ctx);
        frame.set(&plan.accu_var, next);
    }
    plan.result.eval(&frame, ctx)
}

fn convert(conversion: &Conversion, operand: &Value, ctx: &EvalContext<'_>) -> Result<Value, RuntimeError> {
    match conversion {
        Conversion::Int => stdlib::convert_to_int(operand),
        Conversion::Uint => stdlib::convert_to_uint(operand),
        Conversion::Double => stdlib::convert_to_double(operand),
        Conversion::String => stdlib::convert_to_string(operand),
        Conversion::Bytes => stdlib::convert_to_bytes(operand),
        Conversion::Bool => stdlib::convert_to_bool(operand),
        Conversion::Timestamp => stdlib::convert_to_timestamp(operand),
        Conversion::Duration => stdlib::convert_to_duration(operand),
        Conversion::Type => stdlib::convert_to_type(operand),
        Conversion::Dyn => Ok(operand.clone()),
        Conversion::Enum(type_name) => match operand {
            Value::Int(i) => {
                let narrowed = i32::try_from(*i)
                    .map_err(|_| RuntimeError::new(RuntimeErrorKind::RangeError, "enum value out of range"))?;
                Ok(make_enum(type_name, narrowed, ctx))
            }
            Value::String(name) => match ctx.provider.find_enum_value(type_name, name) {
                Some(value) => Ok(make_enum(type_name, value, ctx)),
                None => Err(RuntimeError::conversion(format!(
                    "no enum value '{name}' in '{type_name}'"
                ))),
            },
            Value::Enum(..) => Ok(operand.clone()),
            other => Err(RuntimeError::no_such_overload(format!(
                "{type_name}({})",
                other.type_name()
            ))),
        },
    }
}
