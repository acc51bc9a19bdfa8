use std::{
    cmp::Ordering,
    fmt::{self, Display, Write},
    hash::{Hash, Hasher},
    sync::Arc,
};

use chrono::{DateTime, Datelike, TimeDelta, Utc};
use indexmap::IndexMap;

use crate::{
    ast::ExprId,
    error::{RuntimeError, RuntimeErrorKind},
    types::CelType,
};

/// Inclusive duration magnitude bound, in seconds (±10,000 years).
pub const MAX_DURATION_SECONDS: i64 = 315_576_000_000;

/// A key of a CEL map.
///
/// Only `bool`, `int`, `uint`, and `string` may key a map. `Int` and `Uint`
/// keys compare and hash by numeric value, so `{1: 'a'}[1u]` finds the entry:
/// CEL map lookup uses CEL equality, which is numeric across integer kinds.
#[derive(Debug, Clone, Eq)]
pub enum MapKey {
    Bool(bool),
    Int(i64),
    Uint(u64),
    String(Arc<str>),
}

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Uint(a), Self::Uint(b)) => a == b,
            (Self::Int(a), Self::Uint(b)) | (Self::Uint(b), Self::Int(a)) => {
                *a >= 0 && u64::try_from(*a).is_ok_and(|a| a == *b)
            }
            (Self::String(a), Self::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Hash for MapKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Int and Uint of equal numeric value must hash identically.
        match self {
            Self::Bool(b) => {
                0u8.hash(state);
                b.hash(state);
            }
            Self::Int(i) if *i >= 0 => {
                1u8.hash(state);
                (*i as u64).hash(state);
            }
            Self::Int(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Self::Uint(u) => {
                1u8.hash(state);
                u.hash(state);
            }
            Self::String(s) => {
                3u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl MapKey {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Uint(u) => Value::Uint(*u),
            Self::String(s) => Value::String(s.clone()),
        }
    }

    /// Converts a value to a map key, applying CEL's numeric coercions
    /// (an integral double keys the same entry as the equal integer).
    pub fn from_value(value: &Value) -> Result<Self, RuntimeError> {
        match value {
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Int(i) => Ok(Self::Int(*i)),
            Value::Uint(u) => Ok(Self::Uint(*u)),
            Value::String(s) => Ok(Self::String(s.clone())),
            Value::Double(d) if d.fract() == 0.0 && *d >= -(2f64.powi(63)) && *d < 2f64.powi(63) => {
                Ok(Self::Int(*d as i64))
            }
            other => Err(RuntimeError::new(
                RuntimeErrorKind::UnsupportedKeyType,
                format!("unsupported key type: {}", other.type_name()),
            )),
        }
    }
}

impl Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_value().fmt(f)
    }
}

/// An insertion-ordered CEL map.
///
/// Iteration order is insertion order, which makes comprehension results over
/// maps deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapValue {
    entries: IndexMap<MapKey, Value>,
}

impl MapValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity),
        }
    }

    pub fn insert(&mut self, key: MapKey, value: Value) {
        self.entries.insert(key, value);
    }

    pub fn get(&self, key: &MapKey) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &MapKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MapKey, &Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &MapKey> {
        self.entries.keys()
    }
}

impl FromIterator<(MapKey, Value)> for MapValue {
    fn from_iter<T: IntoIterator<Item = (MapKey, Value)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// A constructed struct (message) value.
///
/// Fields hold only the explicitly-set entries; absent fields read as their
/// type's default through the `TypeProvider` at access time.
#[derive(Debug, Clone, PartialEq)]
pub struct StructValue {
    pub type_name: String,
    pub fields: IndexMap<String, Value>,
}

/// The set of attribute ids an `unknown` value stands in for.
///
/// Kept sorted and deduplicated; merging is a sorted union.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnknownSet {
    ids: Vec<ExprId>,
}

impl UnknownSet {
    pub fn single(id: ExprId) -> Self {
        Self { ids: vec![id] }
    }

    pub fn ids(&self) -> &[ExprId] {
        &self.ids
    }

    pub fn merge(&self, other: &Self) -> Self {
        let mut ids: Vec<ExprId> = self.ids.iter().chain(other.ids.iter()).copied().collect();
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }
}

/// A CEL runtime value.
///
/// Errors and unknowns are first-class variants so the evaluator's recursion
/// stays uniform: strict operators propagate them, the logical operators
/// absorb them when the surviving branch decides the result.
///
/// Aggregate payloads are `Arc`-shared: CEL values are immutable, so cloning
/// a list or map is a pointer copy.
///
/// The derived `PartialEq` is structural Rust equality (used by tests and
/// hosts); CEL's cross-kind equality lives in [`cel_equals`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(Arc<str>),
    Bytes(Arc<[u8]>),
    List(Arc<Vec<Value>>),
    Map(Arc<MapValue>),
    /// A first-class type value, e.g. the result of `type(1)`.
    Type(Arc<str>),
    /// Elapsed time, stored with nanosecond precision.
    Duration(TimeDelta),
    /// An absolute instant; restricted to years 0001–9999.
    Timestamp(DateTime<Utc>),
    Struct(Arc<StructValue>),
    /// A named enum value; the payload is the numeric value, range-checked
    /// to int32 at construction.
    Enum(Arc<str>, i64),
    /// A boxed optional: either empty or holding one inner value.
    Optional(Arc<Option<Value>>),
    Error(Box<RuntimeError>),
    Unknown(Arc<UnknownSet>),
}

impl Value {
    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Self::String(s.into())
    }

    pub fn bytes(b: impl Into<Arc<[u8]>>) -> Self {
        Self::Bytes(b.into())
    }

    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Arc::new(items))
    }

    pub fn map(map: MapValue) -> Self {
        Self::Map(Arc::new(map))
    }

    pub fn optional_of(value: Self) -> Self {
        Self::Optional(Arc::new(Some(value)))
    }

    pub fn optional_none() -> Self {
        Self::Optional(Arc::new(None))
    }

    pub fn error(err: RuntimeError) -> Self {
        Self::Error(Box::new(err))
    }

    pub fn unknown(id: ExprId) -> Self {
        Self::Unknown(Arc::new(UnknownSet::single(id)))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }

    /// True for values that stop strict evaluation (error or unknown).
    pub fn is_exceptional(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Unknown(_))
    }

    /// The runtime type, as consumed by fallback overload dispatch.
    pub fn type_of(&self) -> CelType {
        match self {
            Self::Null => CelType::Null,
            Self::Bool(_) => CelType::Bool,
            Self::Int(_) => CelType::Int,
            Self::Uint(_) => CelType::Uint,
            Self::Double(_) => CelType::Double,
            Self::String(_) => CelType::String,
            Self::Bytes(_) => CelType::Bytes,
            Self::List(_) => CelType::List(Box::new(CelType::Dyn)),
            Self::Map(_) => CelType::Map(Box::new(CelType::Dyn), Box::new(CelType::Dyn)),
            Self::Type(_) => CelType::Type,
            Self::Duration(_) => CelType::Duration,
            Self::Timestamp(_) => CelType::Timestamp,
            Self::Struct(s) => CelType::Struct(s.type_name.clone()),
            Self::Enum(name, _) => CelType::Opaque(name.to_string()),
            Self::Optional(_) => CelType::Optional(Box::new(CelType::Dyn)),
            Self::Error(_) => CelType::Error,
            Self::Unknown(_) => CelType::Dyn,
        }
    }

    /// The type name reported in runtime error messages.
    pub fn type_name(&self) -> String {
        match self {
            Self::Struct(s) => s.type_name.clone(),
            Self::Enum(name, _) => name.to_string(),
            other => other.type_of().to_string(),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(Arc::from(v.as_str()))
    }
}

/// CEL equality.
///
/// Heterogeneous comparisons are `false`, not errors; numeric kinds compare
/// by value across `int`/`uint`/`double`; `NaN` is unequal to everything,
/// itself included. Lists and maps compare element-wise.
pub fn cel_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Uint(a), Value::Uint(b)) => a == b,
        (Value::Double(a), Value::Double(b)) => a == b,
        (Value::Int(a), Value::Uint(b)) | (Value::Uint(b), Value::Int(a)) => {
            *a >= 0 && u64::try_from(*a).is_ok_and(|a| a == *b)
        }
        (Value::Int(a), Value::Double(b)) | (Value::Double(b), Value::Int(a)) => (*a as f64) == *b,
        (Value::Uint(a), Value::Double(b)) | (Value::Double(b), Value::Uint(a)) => (*a as f64) == *b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bytes(a), Value::Bytes(b)) => a == b,
        (Value::Type(a), Value::Type(b)) => a == b,
        (Value::Duration(a), Value::Duration(b)) => a == b,
        (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
        (Value::List(a), Value::List(b)) => a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| cel_equals(x, y)),
        (Value::Map(a), Value::Map(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| cel_equals(v, other)))
        }
        (Value::Struct(a), Value::Struct(b)) => {
            a.type_name == b.type_name
                && a.fields.len() == b.fields.len()
                && a.fields
                    .iter()
                    .all(|(name, v)| b.fields.get(name).is_some_and(|other| cel_equals(v, other)))
        }
        (Value::Enum(an, av), Value::Enum(bn, bv)) => an == bn && av == bv,
        (Value::Enum(_, av), Value::Int(b)) | (Value::Int(b), Value::Enum(_, av)) => av == b,
        (Value::Optional(a), Value::Optional(b)) => match (a.as_ref(), b.as_ref()) {
            (None, None) => true,
            (Some(x), Some(y)) => cel_equals(x, y),
            _ => false,
        },
        _ => false,
    }
}

/// CEL ordering.
///
/// `Ok(None)` means the operands are numerically comparable but unordered
/// (a `NaN` was involved): ordering predicates answer `false` without
/// raising. `Err` means the kinds do not order at all.
pub fn cel_compare(left: &Value, right: &Value) -> Result<Option<Ordering>, RuntimeError> {
    let mismatch = || {
        RuntimeError::no_such_overload(format!(
            "({}, {})",
            left.type_name(),
            right.type_name()
        ))
    };
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => Ok(Some(a.cmp(b))),
        (Value::Int(a), Value::Int(b)) => Ok(Some(a.cmp(b))),
        (Value::Uint(a), Value::Uint(b)) => Ok(Some(a.cmp(b))),
        (Value::Double(a), Value::Double(b)) => Ok(a.partial_cmp(b)),
        (Value::Int(a), Value::Uint(b)) => Ok(Some(compare_int_uint(*a, *b))),
        (Value::Uint(a), Value::Int(b)) => Ok(Some(compare_int_uint(*b, *a).reverse())),
        (Value::Int(a), Value::Double(b)) => Ok((*a as f64).partial_cmp(b)),
        (Value::Double(a), Value::Int(b)) => Ok(a.partial_cmp(&(*b as f64))),
        (Value::Uint(a), Value::Double(b)) => Ok((*a as f64).partial_cmp(b)),
        (Value::Double(a), Value::Uint(b)) => Ok(a.partial_cmp(&(*b as f64))),
        (Value::String(a), Value::String(b)) => Ok(Some(a.as_bytes().cmp(b.as_bytes()))),
        (Value::Bytes(a), Value::Bytes(b)) => Ok(Some(a.as_ref().cmp(b.as_ref()))),
        (Value::Duration(a), Value::Duration(b)) => Ok(Some(a.cmp(b))),
        (Value::Timestamp(a), Value::Timestamp(b)) => Ok(Some(a.cmp(b))),
        _ => Err(mismatch()),
    }
}

/// Signed/unsigned comparison: a negative `int` is less than any `uint`.
fn compare_int_uint(i: i64, u: u64) -> Ordering {
    if i < 0 {
        Ordering::Less
    } else {
        (i as u64).cmp(&u)
    }
}

fn duration_in_range(d: TimeDelta) -> bool {
    d.num_seconds().abs() <= MAX_DURATION_SECONDS
}

fn timestamp_in_range(t: DateTime<Utc>) -> bool {
    (1..=9999).contains(&t.year())
}

pub fn checked_duration(d: TimeDelta) -> Result<Value, RuntimeError> {
    if duration_in_range(d) {
        Ok(Value::Duration(d))
    } else {
        Err(RuntimeError::new(RuntimeErrorKind::RangeError, "duration out of range"))
    }
}

pub fn checked_timestamp(t: DateTime<Utc>) -> Result<Value, RuntimeError> {
    if timestamp_in_range(t) {
        Ok(Value::Timestamp(t))
    } else {
        Err(RuntimeError::new(
            RuntimeErrorKind::RangeError,
            "timestamp out of range",
        ))
    }
}

/// `_+_`: numeric addition, string/bytes/list concatenation, time arithmetic.
pub fn arith_add(left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.checked_add(*b).map(Value::Int).ok_or_else(RuntimeError::overflow),
        (Value::Uint(a), Value::Uint(b)) => a.checked_add(*b).map(Value::Uint).ok_or_else(RuntimeError::overflow),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a + b)),
        (Value::String(a), Value::String(b)) => {
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            Ok(Value::string(s))
        }
        (Value::Bytes(a), Value::Bytes(b)) => {
            let mut v = Vec::with_capacity(a.len() + b.len());
            v.extend_from_slice(a);
            v.extend_from_slice(b);
            Ok(Value::bytes(v))
        }
        (Value::List(a), Value::List(b)) => {
            let mut items = Vec::with_capacity(a.len() + b.len());
            items.extend(a.iter().cloned());
            items.extend(b.iter().cloned());
            Ok(Value::list(items))
        }
        (Value::Duration(a), Value::Duration(b)) => {
            let sum = a.checked_add(b).ok_or_else(RuntimeError::overflow)?;
            checked_duration(sum)
        }
        (Value::Timestamp(t), Value::Duration(d)) | (Value::Duration(d), Value::Timestamp(t)) => {
            let sum = t.checked_add_signed(*d).ok_or_else(RuntimeError::overflow)?;
            checked_timestamp(sum)
        }
        _ => Err(no_arith_overload("_+_", left, right)),
    }
}

/// `_-_`: numeric subtraction and time arithmetic.
pub fn arith_sub(left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.checked_sub(*b).map(Value::Int).ok_or_else(RuntimeError::overflow),
        (Value::Uint(a), Value::Uint(b)) => a.checked_sub(*b).map(Value::Uint).ok_or_else(RuntimeError::overflow),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a - b)),
        (Value::Duration(a), Value::Duration(b)) => {
            let diff = a.checked_sub(b).ok_or_else(RuntimeError::overflow)?;
            checked_duration(diff)
        }
        (Value::Timestamp(t), Value::Duration(d)) => {
            let diff = t.checked_sub_signed(*d).ok_or_else(RuntimeError::overflow)?;
            checked_timestamp(diff)
        }
        (Value::Timestamp(a), Value::Timestamp(b)) => {
            let diff = a.signed_duration_since(*b);
            checked_duration(diff)
        }
        _ => Err(no_arith_overload("_-_", left, right)),
    }
}

/// `_*_`: numeric multiplication.
pub fn arith_mul(left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.checked_mul(*b).map(Value::Int).ok_or_else(RuntimeError::overflow),
        (Value::Uint(a), Value::Uint(b)) => a.checked_mul(*b).map(Value::Uint).ok_or_else(RuntimeError::overflow),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a * b)),
        _ => Err(no_arith_overload("_*_", left, right)),
    }
}

/// `_/_`: division. Integer division by zero and `INT64_MIN / -1` raise;
/// double division follows IEEE-754.
pub fn arith_div(left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Int(_), Value::Int(0)) => Err(RuntimeError::divide_by_zero()),
        (Value::Int(a), Value::Int(b)) => a.checked_div(*b).map(Value::Int).ok_or_else(RuntimeError::overflow),
        (Value::Uint(_), Value::Uint(0)) => Err(RuntimeError::divide_by_zero()),
        (Value::Uint(a), Value::Uint(b)) => Ok(Value::Uint(a / b)),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a / b)),
        _ => Err(no_arith_overload("_/_", left, right)),
    }
}

/// `_%_`: integer remainder. No double form.
pub fn arith_rem(left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Int(_), Value::Int(0)) => Err(RuntimeError::modulus_by_zero()),
        (Value::Int(a), Value::Int(b)) => a.checked_rem(*b).map(Value::Int).ok_or_else(RuntimeError::overflow),
        (Value::Uint(_), Value::Uint(0)) => Err(RuntimeError::modulus_by_zero()),
        (Value::Uint(a), Value::Uint(b)) => Ok(Value::Uint(a % b)),
        _ => Err(no_arith_overload("_%_", left, right)),
    }
}

/// `-_`: numeric negation. `-INT64_MIN` overflows; `-0.0` is IEEE negation.
pub fn arith_neg(operand: &Value) -> Result<Value, RuntimeError> {
    match operand {
        Value::Int(a) => a.checked_neg().map(Value::Int).ok_or_else(RuntimeError::overflow),
        Value::Double(a) => Ok(Value::Double(-a)),
        other => Err(RuntimeError::no_such_overload(format!("-({})", other.type_name()))),
    }
}

fn no_arith_overload(op: &str, left: &Value, right: &Value) -> RuntimeError {
    RuntimeError::no_such_overload(format!("{op}({}, {})", left.type_name(), right.type_name()))
}

/// `in`: list membership, map key lookup, or substring containment.
pub fn contains(item: &Value, container: &Value) -> Result<Value, RuntimeError> {
    match container {
        Value::List(items) => Ok(Value::Bool(items.iter().any(|member| cel_equals(member, item)))),
        Value::Map(map) => {
            let key = MapKey::from_value(item)?;
            Ok(Value::Bool(map.contains_key(&key)))
        }
        Value::String(s) => match item {
            Value::String(needle) => Ok(Value::Bool(s.contains(needle.as_ref()))),
            other => Err(RuntimeError::no_such_overload(format!(
                "{} in string",
                other.type_name()
            ))),
        },
        other => Err(RuntimeError::no_such_overload(format!(
            "in({})",
            other.type_name()
        ))),
    }
}

/// Writes a CEL string literal, escaping per the source syntax.
pub fn quote_string_into(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Formats a double with ryu's shortest round-trip representation.
pub fn format_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_owned()
    } else if d.is_infinite() {
        if d > 0.0 { "+Inf".to_owned() } else { "-Inf".to_owned() }
    } else {
        ryu::Buffer::new().format(d).to_owned()
    }
}

/// Formats a duration as decimal seconds with an `s` suffix, e.g. `3.5s`.
pub fn format_duration(d: TimeDelta) -> String {
    let secs = d.num_seconds();
    let nanos = d.subsec_nanos();
    if nanos == 0 {
        return format!("{secs}s");
    }
    // Negative sub-second durations print a single leading sign.
    let (sign, secs, nanos) = if secs < 0 || nanos < 0 {
        ("-", secs.abs(), nanos.abs())
    } else {
        ("", secs, nanos)
    };
    let frac = format!("{nanos:09}");
    let frac = frac.trim_end_matches('0');
    format!("{sign}{secs}.{frac}s")
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Uint(u) => write!(f, "{u}u"),
            Self::Double(d) => write!(f, "{}", format_double(*d)),
            Self::String(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                quote_string_into(&mut out, s);
                write!(f, "{out}")
            }
            Self::Bytes(b) => {
                write!(f, "b\"")?;
                for byte in b.iter() {
                    match byte {
                        b'"' => write!(f, "\\\"")?,
                        b'\\' => write!(f, "\\\\")?,
                        0x20..=0x7e => write!(f, "{}", *byte as char)?,
                        _ => write!(f, "\\x{byte:02x}")?,
                    }
                }
                write!(f, "\"")
            }
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Self::Type(name) => write!(f, "{name}"),
            Self::Duration(d) => write!(f, "{}", format_duration(*d)),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)),
            Self::Struct(s) => {
                write!(f, "{}{{", s.type_name)?;
                for (i, (name, value)) in s.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Enum(_, value) => write!(f, "{value}"),
            Self::Optional(inner) => match inner.as_ref() {
                Some(value) => write!(f, "optional.of({value})"),
                None => write!(f, "optional.none"),
            },
            Self::Error(err) => write!(f, "{err}"),
            Self::Unknown(unknowns) => {
                write!(f, "unknown{{")?;
                for (i, id) in unknowns.ids().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{id}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> MapKey {
        MapKey::String(Arc::from(s))
    }

    #[test]
    fn int_uint_keys_alias() {
        let mut map = MapValue::new();
        map.insert(MapKey::Int(1), Value::from("a"));
        assert!(map.contains_key(&MapKey::Uint(1)));
        assert!(!map.contains_key(&MapKey::Uint(2)));
        assert!(!map.contains_key(&key("1")));
    }

    #[test]
    fn negative_int_key_never_aliases_uint() {
        let mut map = MapValue::new();
        map.insert(MapKey::Int(-1), Value::from(1i64));
        assert!(!map.contains_key(&MapKey::Uint(u64::MAX)));
    }

    #[test]
    fn cross_kind_numeric_equality() {
        assert!(cel_equals(&Value::Int(1), &Value::Uint(1)));
        assert!(cel_equals(&Value::Int(1), &Value::Double(1.0)));
        assert!(cel_equals(&Value::Uint(5), &Value::Double(5.0)));
        assert!(!cel_equals(&Value::Int(-1), &Value::Uint(u64::MAX)));
        assert!(!cel_equals(&Value::Double(f64::NAN), &Value::Double(f64::NAN)));
        assert!(!cel_equals(&Value::Int(1), &Value::from("1")));
    }

    #[test]
    fn signed_unsigned_ordering() {
        assert_eq!(
            cel_compare(&Value::Int(-1), &Value::Uint(0)).unwrap(),
            Some(Ordering::Less)
        );
        assert_eq!(
            cel_compare(&Value::Uint(u64::MAX), &Value::Int(1)).unwrap(),
            Some(Ordering::Greater)
        );
        assert_eq!(
            cel_compare(&Value::Double(f64::NAN), &Value::Double(1.0)).unwrap(),
            None
        );
    }

    #[test]
    fn addition_overflow_detected() {
        let err = arith_add(&Value::Int(i64::MAX), &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::IntegerOverflow);
        let err = arith_sub(&Value::Int(i64::MIN), &Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::IntegerOverflow);
        let err = arith_sub(&Value::Uint(0), &Value::Uint(1)).unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::IntegerOverflow);
    }

    #[test]
    fn division_edge_cases() {
        assert_eq!(
            arith_div(&Value::Int(1), &Value::Int(0)).unwrap_err().kind,
            RuntimeErrorKind::DivideByZero
        );
        assert_eq!(
            arith_div(&Value::Int(i64::MIN), &Value::Int(-1)).unwrap_err().kind,
            RuntimeErrorKind::IntegerOverflow
        );
        // IEEE-754: double division by zero is inf, not an error.
        match arith_div(&Value::Double(1.0), &Value::Double(0.0)).unwrap() {
            Value::Double(d) => assert!(d.is_infinite()),
            other => panic!("expected double, got {other:?}"),
        }
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(TimeDelta::seconds(3600)), "3600s");
        assert_eq!(
            format_duration(TimeDelta::seconds(3) + TimeDelta::nanoseconds(500_000_000)),
            "3.5s"
        );
        assert_eq!(format_duration(TimeDelta::milliseconds(-1500)), "-1.5s");
    }

    #[test]
    fn display_forms() {
        assert_eq!(Value::from("a\nb").to_string(), "\"a\\nb\"");
        assert_eq!(Value::Uint(3).to_string(), "3u");
        assert_eq!(
            Value::list(vec![Value::Int(1), Value::from("x")]).to_string(),
            "[1, \"x\"]"
        );
        assert_eq!(Value::optional_none().to_string(), "optional.none");
    }

    #[test]
    fn in_operator_families() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert!(matches!(contains(&Value::Uint(2), &list), Ok(Value::Bool(true))));
        let s = Value::from("hello");
        assert!(matches!(contains(&Value::from("ell"), &s), Ok(Value::Bool(true))));
        let mut map = MapValue::new();
        map.insert(key("k"), Value::Int(1));
        assert!(matches!(
            contains(&Value::from("k"), &Value::map(map)),
            Ok(Value::Bool(true))
        ));
    }
}
