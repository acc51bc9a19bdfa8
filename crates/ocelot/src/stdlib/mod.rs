//! The standard function catalogue.
//!
//! Every entry is an overload `(id, param types, result type, implementation)`
//! registered under a CEL function name. The checker consumes the
//! declarations for overload resolution; the evaluator consumes the
//! implementations through the dispatcher. Built-in operators are also
//! registered here even though the planner lowers them to specialised nodes.

mod encoders;
mod lists;
mod math;
mod optional;
mod sets;
mod strings;
mod time;

use std::{cmp::Ordering, fmt, sync::Arc};

use ahash::AHashMap;
use chrono::{DateTime, TimeZone, Utc};

use crate::{
    error::{RuntimeError, RuntimeErrorKind},
    parse::operators,
    types::CelType,
    value::{self, MapKey, Value, cel_compare, cel_equals, checked_duration, checked_timestamp, format_double},
};

/// A function implementation: a pure mapping from argument values to a
/// result. Receiver-style functions receive the target as the first argument.
pub type CelFn = Arc<dyn Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

/// One concrete signature registered under a CEL function name.
#[derive(Clone)]
pub struct Overload {
    pub id: String,
    pub params: Vec<CelType>,
    pub result: CelType,
    pub type_params: Vec<String>,
    pub receiver_style: bool,
    pub implementation: Option<CelFn>,
}

impl fmt::Debug for Overload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overload")
            .field("id", &self.id)
            .field("params", &self.params)
            .field("result", &self.result)
            .field("receiver_style", &self.receiver_style)
            .finish_non_exhaustive()
    }
}

impl Overload {
    pub fn global(id: &str, params: Vec<CelType>, result: CelType) -> Self {
        Self {
            id: id.to_owned(),
            params,
            result,
            type_params: Vec::new(),
            receiver_style: false,
            implementation: None,
        }
    }

    pub fn member(id: &str, params: Vec<CelType>, result: CelType) -> Self {
        Self {
            receiver_style: true,
            ..Self::global(id, params, result)
        }
    }

    #[must_use]
    pub fn with_type_params(mut self, names: &[&str]) -> Self {
        self.type_params = names.iter().map(|&n| n.to_owned()).collect();
        self
    }

    #[must_use]
    pub fn with_impl(mut self, f: impl Fn(&[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static) -> Self {
        self.implementation = Some(Arc::new(f));
        self
    }

    /// Loose runtime signature check used by fallback dispatch.
    pub fn matches_args(&self, args: &[Value]) -> bool {
        self.params.len() == args.len() && self.params.iter().zip(args).all(|(p, a)| value_matches(p, a))
    }
}

fn value_matches(param: &CelType, value: &Value) -> bool {
    match param {
        CelType::Dyn | CelType::TypeParam(_) | CelType::Error => true,
        CelType::Null => matches!(value, Value::Null),
        CelType::Bool => matches!(value, Value::Bool(_)),
        CelType::Int => matches!(value, Value::Int(_) | Value::Enum(..)),
        CelType::Uint => matches!(value, Value::Uint(_)),
        CelType::Double => matches!(value, Value::Double(_)),
        CelType::String => matches!(value, Value::String(_)),
        CelType::Bytes => matches!(value, Value::Bytes(_)),
        CelType::Duration => matches!(value, Value::Duration(_)),
        CelType::Timestamp => matches!(value, Value::Timestamp(_)),
        CelType::Type => matches!(value, Value::Type(_)),
        CelType::List(_) => matches!(value, Value::List(_)),
        CelType::Map(..) => matches!(value, Value::Map(_)),
        CelType::Optional(_) => matches!(value, Value::Optional(_)),
        CelType::Struct(name) => matches!(value, Value::Struct(s) if s.type_name == *name),
        CelType::Opaque(name) => matches!(value, Value::Enum(n, _) if n.as_ref() == name),
    }
}

/// All overloads registered under one function name.
#[derive(Debug, Clone, Default)]
pub struct FunctionDecl {
    pub name: String,
    pub overloads: Vec<Arc<Overload>>,
}

impl FunctionDecl {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            overloads: Vec::new(),
        }
    }

    #[must_use]
    pub fn overload(mut self, overload: Overload) -> Self {
        self.overloads.push(Arc::new(overload));
        self
    }
}

/// The dispatcher's catalogue: function declarations keyed by name, with a
/// secondary index by overload id.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: AHashMap<String, FunctionDecl>,
    by_overload: AHashMap<String, Arc<Overload>>,
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in library consumed by the checker and evaluator.
    pub fn standard() -> Self {
        let mut registry = Self::default();
        register_operators(&mut registry);
        register_conversions(&mut registry);
        register_size(&mut registry);
        strings::register(&mut registry);
        encoders::register(&mut registry);
        lists::register(&mut registry);
        math::register(&mut registry);
        time::register(&mut registry);
        sets::register(&mut registry);
        optional::register(&mut registry);
        registry
    }

    /// Adds a declaration, merging overloads when the name already exists.
    pub fn add(&mut self, decl: FunctionDecl) {
        for overload in &decl.overloads {
            self.by_overload.insert(overload.id.clone(), Arc::clone(overload));
        }
        let entry = self
            .functions
            .entry(decl.name.clone())
            .or_insert_with(|| FunctionDecl::new(&decl.name));
        entry.overloads.extend(decl.overloads);
    }

    pub fn find(&self, name: &str) -> Option<&FunctionDecl> {
        self.functions.get(name)
    }

    pub fn overload(&self, id: &str) -> Option<&Arc<Overload>> {
        self.by_overload.get(id)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

/// Runtime overload dispatch: try candidates in order, preferring the ones
/// the checker resolved; return the first non-error result, else the last
/// error.
pub fn dispatch(function: &str, candidates: &[Arc<Overload>], args: &[Value]) -> Value {
    let mut last_error: Option<RuntimeError> = None;
    for overload in candidates {
        if !overload.matches_args(args) {
            continue;
        }
        let Some(implementation) = &overload.implementation else {
            continue;
        };
        match implementation(args) {
            Ok(value) => return value,
            Err(err) => last_error = Some(err),
        }
    }
    let err = last_error.unwrap_or_else(|| {
        let kinds: Vec<String> = args.iter().map(Value::type_name).collect();
        RuntimeError::no_such_overload(format!("{function}({})", kinds.join(", ")))
    });
    Value::error(err)
}

// --- shared argument helpers -------------------------------------------------

pub(crate) fn want_string(v: &Value) -> Result<&str, RuntimeError> {
    match v {
        Value::String(s) => Ok(s),
        other => Err(RuntimeError::type_mismatch(format!(
            "expected string, found {}",
            other.type_name()
        ))),
    }
}

pub(crate) fn want_int(v: &Value) -> Result<i64, RuntimeError> {
    match v {
        Value::Int(i) => Ok(*i),
        other => Err(RuntimeError::type_mismatch(format!(
            "expected int, found {}",
            other.type_name()
        ))),
    }
}

pub(crate) fn want_list(v: &Value) -> Result<&[Value], RuntimeError> {
    match v {
        Value::List(items) => Ok(items),
        other => Err(RuntimeError::type_mismatch(format!(
            "expected list, found {}",
            other.type_name()
        ))),
    }
}

// --- operators ---------------------------------------------------------------

fn register_operators(registry: &mut FunctionRegistry) {
    use CelType::{Bool, Bytes, Double, Duration, Int, String as Str, Timestamp, Uint};

    registry.add(
        FunctionDecl::new(operators::ADD)
            .overload(Overload::global("add_int64", vec![Int, Int], Int).with_impl(|a| value::arith_add(&a[0], &a[1])))
            .overload(
                Overload::global("add_uint64", vec![Uint, Uint], Uint).with_impl(|a| value::arith_add(&a[0], &a[1])),
            )
            .overload(
                Overload::global("add_double", vec![Double, Double], Double)
                    .with_impl(|a| value::arith_add(&a[0], &a[1])),
            )
            .overload(
                Overload::global("add_string", vec![Str, Str], Str).with_impl(|a| value::arith_add(&a[0], &a[1])),
            )
            .overload(
                Overload::global("add_bytes", vec![Bytes, Bytes], Bytes).with_impl(|a| value::arith_add(&a[0], &a[1])),
            )
            .overload(
                Overload::global(
                    "add_list",
                    vec![CelType::list_of(CelType::type_param("A")), CelType::list_of(CelType::type_param("A"))],
                    CelType::list_of(CelType::type_param("A")),
                )
                .with_type_params(&["A"])
                .with_impl(|a| value::arith_add(&a[0], &a[1])),
            )
            .overload(
                Overload::global("add_duration_duration", vec![Duration, Duration], Duration)
                    .with_impl(|a| value::arith_add(&a[0], &a[1])),
            )
            .overload(
                Overload::global("add_timestamp_duration", vec![Timestamp, Duration], Timestamp)
                    .with_impl(|a| value::arith_add(&a[0], &a[1])),
            )
            .overload(
                Overload::global("add_duration_timestamp", vec![Duration, Timestamp], Timestamp)
                    .with_impl(|a| value::arith_add(&a[0], &a[1])),
            ),
    );

    registry.add(
        FunctionDecl::new(operators::SUBTRACT)
            .overload(
                Overload::global("subtract_int64", vec![Int, Int], Int).with_impl(|a| value::arith_sub(&a[0], &a[1])),
            )
            .overload(
                Overload::global("subtract_uint64", vec![Uint, Uint], Uint)
                    .with_impl(|a| value::arith_sub(&a[0], &a[1])),
            )
            .overload(
                Overload::global("subtract_double", vec![Double, Double], Double)
                    .with_impl(|a| value::arith_sub(&a[0], &a[1])),
            )
            .overload(
                Overload::global("subtract_duration_duration", vec![Duration, Duration], Duration)
                    .with_impl(|a| value::arith_sub(&a[0], &a[1])),
            )
            .overload(
                Overload::global("subtract_timestamp_duration", vec![Timestamp, Duration], Timestamp)
                    .with_impl(|a| value::arith_sub(&a[0], &a[1])),
            )
            .overload(
                Overload::global("subtract_timestamp_timestamp", vec![Timestamp, Timestamp], Duration)
                    .with_impl(|a| value::arith_sub(&a[0], &a[1])),
            ),
    );

    registry.add(
        FunctionDecl::new(operators::MULTIPLY)
            .overload(
                Overload::global("multiply_int64", vec![Int, Int], Int).with_impl(|a| value::arith_mul(&a[0], &a[1])),
            )
            .overload(
                Overload::global("multiply_uint64", vec![Uint, Uint], Uint)
                    .with_impl(|a| value::arith_mul(&a[0], &a[1])),
            )
            .overload(
                Overload::global("multiply_double", vec![Double, Double], Double)
                    .with_impl(|a| value::arith_mul(&a[0], &a[1])),
            ),
    );

    registry.add(
        FunctionDecl::new(operators::DIVIDE)
            .overload(
                Overload::global("divide_int64", vec![Int, Int], Int).with_impl(|a| value::arith_div(&a[0], &a[1])),
            )
            .overload(
                Overload::global("divide_uint64", vec![Uint, Uint], Uint).with_impl(|a| value::arith_div(&a[0], &a[1])),
            )
            .overload(
                Overload::global("divide_double", vec![Double, Double], Double)
                    .with_impl(|a| value::arith_div(&a[0], &a[1])),
            ),
    );

    registry.add(
        FunctionDecl::new(operators::MODULO)
            .overload(
                Overload::global("modulo_int64", vec![Int, Int], Int).with_impl(|a| value::arith_rem(&a[0], &a[1])),
            )
            .overload(
                Overload::global("modulo_uint64", vec![Uint, Uint], Uint).with_impl(|a| value::arith_rem(&a[0], &a[1])),
            ),
    );

    registry.add(
        FunctionDecl::new(operators::NEGATE)
            .overload(Overload::global("negate_int64", vec![Int], Int).with_impl(|a| value::arith_neg(&a[0])))
            .overload(Overload::global("negate_double", vec![Double], Double).with_impl(|a| value::arith_neg(&a[0]))),
    );

    registry.add(
        FunctionDecl::new(operators::LOGICAL_NOT).overload(
            Overload::global("logical_not", vec![Bool], Bool).with_impl(|a| match &a[0] {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(RuntimeError::no_such_overload(format!("!({})", other.type_name()))),
            }),
        ),
    );

    // The short-circuiting forms are planner-lowered; the declarations exist
    // for the checker and for completeness of the catalogue.
    registry.add(
        FunctionDecl::new(operators::LOGICAL_AND)
            .overload(Overload::global("logical_and", vec![Bool, Bool], Bool)),
    );
    registry.add(
        FunctionDecl::new(operators::LOGICAL_OR).overload(Overload::global("logical_or", vec![Bool, Bool], Bool)),
    );
    registry.add(
        FunctionDecl::new(operators::CONDITIONAL).overload(
            Overload::global(
                "conditional",
                vec![Bool, CelType::type_param("A"), CelType::type_param("A")],
                CelType::type_param("A"),
            )
            .with_type_params(&["A"]),
        ),
    );
    registry.add(
        FunctionDecl::new(operators::NOT_STRICTLY_FALSE).overload(
            Overload::global("not_strictly_false", vec![Bool], Bool)
                .with_impl(|a| Ok(Value::Bool(!matches!(&a[0], Value::Bool(false))))),
        ),
    );

    registry.add(
        FunctionDecl::new(operators::EQUALS).overload(
            Overload::global(
                "equals",
                vec![CelType::type_param("A"), CelType::type_param("A")],
                Bool,
            )
            .with_type_params(&["A"])
            .with_impl(|a| Ok(Value::Bool(cel_equals(&a[0], &a[1])))),
        ),
    );
    registry.add(
        FunctionDecl::new(operators::NOT_EQUALS).overload(
            Overload::global(
                "not_equals",
                vec![CelType::type_param("A"), CelType::type_param("A")],
                Bool,
            )
            .with_type_params(&["A"])
            .with_impl(|a| Ok(Value::Bool(!cel_equals(&a[0], &a[1])))),
        ),
    );

    register_ordering(registry, operators::LESS, "less", |o| o == Ordering::Less);
    register_ordering(registry, operators::LESS_EQUALS, "less_equals", |o| o != Ordering::Greater);
    register_ordering(registry, operators::GREATER, "greater", |o| o == Ordering::Greater);
    register_ordering(registry, operators::GREATER_EQUALS, "greater_equals", |o| o != Ordering::Less);

    registry.add(
        FunctionDecl::new(operators::IN)
            .overload(
                Overload::global(
                    "in_list",
                    vec![CelType::type_param("A"), CelType::list_of(CelType::type_param("A"))],
                    Bool,
                )
                .with_type_params(&["A"])
                .with_impl(|a| value::contains(&a[0], &a[1])),
            )
            .overload(
                Overload::global(
                    "in_map",
                    vec![
                        CelType::type_param("A"),
                        CelType::map_of(CelType::type_param("A"), CelType::type_param("B")),
                    ],
                    Bool,
                )
                .with_type_params(&["A", "B"])
                .with_impl(|a| value::contains(&a[0], &a[1])),
            )
            .overload(
                Overload::global("in_string", vec![Str, Str], Bool).with_impl(|a| value::contains(&a[0], &a[1])),
            ),
    );

    registry.add(
        FunctionDecl::new(operators::INDEX)
            .overload(
                Overload::global(
                    "index_list",
                    vec![CelType::list_of(CelType::type_param("A")), Int],
                    CelType::type_param("A"),
                )
                .with_type_params(&["A"])
                .with_impl(|a| index_value(&a[0], &a[1])),
            )
            .overload(
                Overload::global(
                    "index_map",
                    vec![
                        CelType::map_of(CelType::type_param("A"), CelType::type_param("B")),
                        CelType::type_param("A"),
                    ],
                    CelType::type_param("B"),
                )
                .with_type_params(&["A", "B"])
                .with_impl(|a| index_value(&a[0], &a[1])),
            ),
    );
}

fn register_ordering(
    registry: &mut FunctionRegistry,
    name: &str,
    id_prefix: &str,
    accept: fn(Ordering) -> bool,
) {
    use CelType::{Bool, Bytes, Double, Duration, Int, String as Str, Timestamp, Uint};
    let pairs: &[(&str, CelType, CelType)] = &[
        ("bool", Bool, Bool),
        ("int64", Int, Int),
        ("uint64", Uint, Uint),
        ("double", Double, Double),
        ("string", Str, Str),
        ("bytes", Bytes, Bytes),
        ("duration", Duration, Duration),
        ("timestamp", Timestamp, Timestamp),
        ("int64_uint64", Int, Uint),
        ("uint64_int64", Uint, Int),
        ("int64_double", Int, Double),
        ("double_int64", Double, Int),
        ("uint64_double", Uint, Double),
        ("double_uint64", Double, Uint),
    ];
    let mut decl = FunctionDecl::new(name);
    for (suffix, left, right) in pairs {
        decl = decl.overload(
            Overload::global(&format!("{id_prefix}_{suffix}"), vec![left.clone(), right.clone()], Bool).with_impl(
                move |a| {
                    Ok(Value::Bool(
                        cel_compare(&a[0], &a[1])?.is_some_and(accept),
                    ))
                },
            ),
        );
    }
    registry.add(decl);
}

/// `list[idx]` / `map[key]` with the index coercions of the specification.
pub fn index_value(container: &Value, index: &Value) -> Result<Value, RuntimeError> {
    match container {
        Value::List(items) => {
            let idx = match index {
                Value::Int(i) => *i,
                Value::Uint(u) => i64::try_from(*u).map_err(|_| {
                    RuntimeError::invalid_argument(format!("index {u} out of range (size {})", items.len()))
                })?,
                Value::Double(d) if d.fract() == 0.0 && *d >= -(2f64.powi(63)) && *d < 2f64.powi(63) => *d as i64,
                Value::Double(d) => {
                    return Err(RuntimeError::invalid_argument(format!(
                        "non-integral index {}",
                        format_double(*d)
                    )));
                }
                other => {
                    return Err(RuntimeError::type_mismatch(format!(
                        "list index must be an integer, found {}",
                        other.type_name()
                    )));
                }
            };
            if idx < 0 || idx as usize >= items.len() {
                return Err(RuntimeError::invalid_argument(format!(
                    "index {idx} out of range (size {})",
                    items.len()
                )));
            }
            Ok(items[idx as usize].clone())
        }
        Value::Map(map) => {
            let key = MapKey::from_value(index)?;
            map.get(&key)
                .cloned()
                .ok_or_else(|| RuntimeError::no_such_key(index))
        }
        other => Err(RuntimeError::no_such_overload(format!(
            "{}[{}]",
            other.type_name(),
            index.type_name()
        ))),
    }
}

// --- size --------------------------------------------------------------------

fn size_impl(v: &Value) -> Result<Value, RuntimeError> {
    let len = match v {
        Value::String(s) => s.chars().count(),
        Value::Bytes(b) => b.len(),
        Value::List(items) => items.len(),
        Value::Map(map) => map.len(),
        other => {
            return Err(RuntimeError::no_such_overload(format!(
                "size({})",
                other.type_name()
            )));
        }
    };
    i64::try_from(len)
        .map(Value::Int)
        .map_err(|_| RuntimeError::overflow())
}

fn register_size(registry: &mut FunctionRegistry) {
    use CelType::{Bytes, Int, String as Str};
    let list_a = CelType::list_of(CelType::type_param("A"));
    let map_ab = CelType::map_of(CelType::type_param("A"), CelType::type_param("B"));
    registry.add(
        FunctionDecl::new("size")
            .overload(Overload::global("size_string", vec![Str], Int).with_impl(|a| size_impl(&a[0])))
            .overload(Overload::global("size_bytes", vec![Bytes], Int).with_impl(|a| size_impl(&a[0])))
            .overload(
                Overload::global("size_list", vec![list_a.clone()], Int)
                    .with_type_params(&["A"])
                    .with_impl(|a| size_impl(&a[0])),
            )
            .overload(
                Overload::global("size_map", vec![map_ab.clone()], Int)
                    .with_type_params(&["A", "B"])
                    .with_impl(|a| size_impl(&a[0])),
            )
            .overload(Overload::member("string_size", vec![Str], Int).with_impl(|a| size_impl(&a[0])))
            .overload(Overload::member("bytes_size", vec![Bytes], Int).with_impl(|a| size_impl(&a[0])))
            .overload(
                Overload::member("list_size", vec![list_a], Int)
                    .with_type_params(&["A"])
                    .with_impl(|a| size_impl(&a[0])),
            )
            .overload(
                Overload::member("map_size", vec![map_ab], Int)
                    .with_type_params(&["A", "B"])
                    .with_impl(|a| size_impl(&a[0])),
            ),
    );
}

// --- type conversions --------------------------------------------------------

pub fn convert_to_int(v: &Value) -> Result<Value, RuntimeError> {
    match v {
        Value::Int(_) => Ok(v.clone()),
        Value::Uint(u) => i64::try_from(*u).map(Value::Int).map_err(|_| RuntimeError::overflow()),
        Value::Double(d) => {
            if d.is_nan() || *d >= 9.223_372_036_854_776e18 || *d < -9.223_372_036_854_776e18 {
                Err(RuntimeError::overflow())
            } else {
                Ok(Value::Int(d.trunc() as i64))
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| RuntimeError::conversion(format!("cannot convert {s:?} to int"))),
        Value::Timestamp(t) => Ok(Value::Int(t.timestamp())),
        Value::Enum(_, n) => Ok(Value::Int(*n)),
        other => Err(RuntimeError::no_such_overload(format!("int({})", other.type_name()))),
    }
}

pub fn convert_to_uint(v: &Value) -> Result<Value, RuntimeError> {
    match v {
        Value::Uint(_) => Ok(v.clone()),
        Value::Int(i) => u64::try_from(*i).map(Value::Uint).map_err(|_| RuntimeError::overflow()),
        Value::Double(d) => {
            if d.is_nan() || *d < 0.0 || *d >= 1.844_674_407_370_955_2e19 {
                Err(RuntimeError::overflow())
            } else {
                Ok(Value::Uint(d.trunc() as u64))
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map(Value::Uint)
            .map_err(|_| RuntimeError::conversion(format!("cannot convert {s:?} to uint"))),
        other => Err(RuntimeError::no_such_overload(format!("uint({})", other.type_name()))),
    }
}

pub fn convert_to_double(v: &Value) -> Result<Value, RuntimeError> {
    match v {
        Value::Double(_) => Ok(v.clone()),
        Value::Int(i) => Ok(Value::Double(*i as f64)),
        Value::Uint(u) => Ok(Value::Double(*u as f64)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| RuntimeError::conversion(format!("cannot convert {s:?} to double"))),
        other => Err(RuntimeError::no_such_overload(format!(
            "double({})",
            other.type_name()
        ))),
    }
}

pub fn convert_to_string(v: &Value) -> Result<Value, RuntimeError> {
    match v {
        Value::String(_) => Ok(v.clone()),
        Value::Int(i) => Ok(Value::string(i.to_string())),
        Value::Uint(u) => Ok(Value::string(u.to_string())),
        Value::Double(d) => Ok(Value::string(format_double(*d))),
        Value::Bool(b) => Ok(Value::string(b.to_string())),
        Value::Bytes(b) => std::str::from_utf8(b)
            .map(Value::from)
            .map_err(|_| RuntimeError::conversion("bytes are not valid UTF-8")),
        Value::Timestamp(t) => Ok(Value::string(
            t.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
        )),
        Value::Duration(d) => Ok(Value::string(value::format_duration(*d))),
        other => Err(RuntimeError::no_such_overload(format!(
            "string({})",
            other.type_name()
        ))),
    }
}

pub fn convert_to_bytes(v: &Value) -> Result<Value, RuntimeError> {
    match v {
        Value::Bytes(_) => Ok(v.clone()),
        Value::String(s) => Ok(Value::bytes(s.as_bytes().to_vec())),
        other => Err(RuntimeError::no_such_overload(format!("bytes({})", other.type_name()))),
    }
}

pub fn convert_to_bool(v: &Value) -> Result<Value, RuntimeError> {
    match v {
        Value::Bool(_) => Ok(v.clone()),
        Value::String(s) => match s.as_ref() {
            "1" | "t" | "true" | "TRUE" | "True" => Ok(Value::Bool(true)),
            "0" | "f" | "false" | "FALSE" | "False" => Ok(Value::Bool(false)),
            _ => Err(RuntimeError::conversion(format!("cannot convert {s:?} to bool"))),
        },
        other => Err(RuntimeError::no_such_overload(format!("bool({})", other.type_name()))),
    }
}

pub fn convert_to_timestamp(v: &Value) -> Result<Value, RuntimeError> {
    match v {
        Value::Timestamp(_) => Ok(v.clone()),
        Value::Int(epoch_seconds) => match Utc.timestamp_opt(*epoch_seconds, 0).single() {
            Some(t) => checked_timestamp(t),
            None => Err(RuntimeError::new(
                RuntimeErrorKind::RangeError,
                "timestamp out of range",
            )),
        },
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map_err(|e| RuntimeError::conversion(format!("cannot parse timestamp {s:?}: {e}")))
            .and_then(|t| checked_timestamp(t.with_timezone(&Utc))),
        other => Err(RuntimeError::no_such_overload(format!(
            "timestamp({})",
            other.type_name()
        ))),
    }
}

pub fn convert_to_duration(v: &Value) -> Result<Value, RuntimeError> {
    match v {
        Value::Duration(_) => Ok(v.clone()),
        Value::String(s) => parse_duration(s),
        other => Err(RuntimeError::no_such_overload(format!(
            "duration({})",
            other.type_name()
        ))),
    }
}

/// Parses the proto duration string form: a signed decimal sequence of
/// `h`, `m`, `s`, `ms`, `us`, `ns` terms, e.g. `1h30m` or `-2.5s`.
pub fn parse_duration(s: &str) -> Result<Value, RuntimeError> {
    let bad = || RuntimeError::conversion(format!("cannot parse duration {s:?}"));
    let (negative, mut rest) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    if rest.is_empty() {
        return Err(bad());
    }
    let mut total_ns: i128 = 0;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(bad)?;
        if digits_end == 0 {
            return Err(bad());
        }
        let number: f64 = rest[..digits_end].parse().map_err(|_| bad())?;
        rest = &rest[digits_end..];
        let (unit_ns, unit_len) = if rest.starts_with("ms") {
            (1_000_000f64, 2)
        } else if rest.starts_with("us") {
            (1_000f64, 2)
        } else if rest.starts_with("ns") {
            (1f64, 2)
        } else if rest.starts_with('h') {
            (3_600_000_000_000f64, 1)
        } else if rest.starts_with('m') {
            (60_000_000_000f64, 1)
        } else if rest.starts_with('s') {
            (1_000_000_000f64, 1)
        } else {
            return Err(bad());
        };
        rest = &rest[unit_len..];
        total_ns += (number * unit_ns) as i128;
    }
    if negative {
        total_ns = -total_ns;
    }
    let seconds = i64::try_from(total_ns / 1_000_000_000).map_err(|_| RuntimeError::overflow())?;
    let nanos = (total_ns % 1_000_000_000) as i64;
    let delta = chrono::TimeDelta::try_seconds(seconds)
        .ok_or_else(RuntimeError::overflow)?
        .checked_add(&chrono::TimeDelta::nanoseconds(nanos))
        .ok_or_else(RuntimeError::overflow)?;
    checked_duration(delta)
}

/// `type(x)`: the runtime type as a first-class value.
pub fn convert_to_type(v: &Value) -> Result<Value, RuntimeError> {
    Ok(Value::Type(Arc::from(v.type_name().as_str())))
}

fn register_conversions(registry: &mut FunctionRegistry) {
    use CelType::{Bool, Bytes, Double, Duration, Dyn, Int, String as Str, Timestamp, Type, Uint};

    registry.add(
        FunctionDecl::new("int")
            .overload(Overload::global("int64_to_int64", vec![Int], Int).with_impl(|a| convert_to_int(&a[0])))
            .overload(Overload::global("uint64_to_int64", vec![Uint], Int).with_impl(|a| convert_to_int(&a[0])))
            .overload(Overload::global("double_to_int64", vec![Double], Int).with_impl(|a| convert_to_int(&a[0])))
            .overload(Overload::global("string_to_int64", vec![Str], Int).with_impl(|a| convert_to_int(&a[0])))
            .overload(
                Overload::global("timestamp_to_int64", vec![Timestamp], Int).with_impl(|a| convert_to_int(&a[0])),
            ),
    );
    registry.add(
        FunctionDecl::new("uint")
            .overload(Overload::global("uint64_to_uint64", vec![Uint], Uint).with_impl(|a| convert_to_uint(&a[0])))
            .overload(Overload::global("int64_to_uint64", vec![Int], Uint).with_impl(|a| convert_to_uint(&a[0])))
            .overload(Overload::global("double_to_uint64", vec![Double], Uint).with_impl(|a| convert_to_uint(&a[0])))
            .overload(Overload::global("string_to_uint64", vec![Str], Uint).with_impl(|a| convert_to_uint(&a[0]))),
    );
    registry.add(
        FunctionDecl::new("double")
            .overload(
                Overload::global("double_to_double", vec![Double], Double).with_impl(|a| convert_to_double(&a[0])),
            )
            .overload(Overload::global("int64_to_double", vec![Int], Double).with_impl(|a| convert_to_double(&a[0])))
            .overload(Overload::global("uint64_to_double", vec![Uint], Double).with_impl(|a| convert_to_double(&a[0])))
            .overload(Overload::global("string_to_double", vec![Str], Double).with_impl(|a| convert_to_double(&a[0]))),
    );
    registry.add(
        FunctionDecl::new("string")
            .overload(Overload::global("string_to_string", vec![Str], Str).with_impl(|a| convert_to_string(&a[0])))
            .overload(Overload::global("int64_to_string", vec![Int], Str).with_impl(|a| convert_to_string(&a[0])))
            .overload(Overload::global("uint64_to_string", vec![Uint], Str).with_impl(|a| convert_to_string(&a[0])))
            .overload(Overload::global("double_to_string", vec![Double], Str).with_impl(|a| convert_to_string(&a[0])))
            .overload(Overload::global("bool_to_string", vec![Bool], Str).with_impl(|a| convert_to_string(&a[0])))
            .overload(Overload::global("bytes_to_string", vec![Bytes], Str).with_impl(|a| convert_to_string(&a[0])))
            .overload(
                Overload::global("timestamp_to_string", vec![Timestamp], Str)
                    .with_impl(|a| convert_to_string(&a[0])),
            )
            .overload(
                Overload::global("duration_to_string", vec![Duration], Str).with_impl(|a| convert_to_string(&a[0])),
            ),
    );
    registry.add(
        FunctionDecl::new("bytes")
            .overload(Overload::global("bytes_to_bytes", vec![Bytes], Bytes).with_impl(|a| convert_to_bytes(&a[0])))
            .overload(Overload::global("string_to_bytes", vec![Str], Bytes).with_impl(|a| convert_to_bytes(&a[0]))),
    );
    registry.add(
        FunctionDecl::new("bool")
            .overload(Overload::global("bool_to_bool", vec![Bool], Bool).with_impl(|a| convert_to_bool(&a[0])))
            .overload(Overload::global("string_to_bool", vec![Str], Bool).with_impl(|a| convert_to_bool(&a[0]))),
    );
    registry.add(
        FunctionDecl::new("timestamp")
            .overload(
                Overload::global("string_to_timestamp", vec![Str], Timestamp)
                    .with_impl(|a| convert_to_timestamp(&a[0])),
            )
            .overload(
                Overload::global("int64_to_timestamp", vec![Int], Timestamp)
                    .with_impl(|a| convert_to_timestamp(&a[0])),
            )
            .overload(
                Overload::global("timestamp_to_timestamp", vec![Timestamp], Timestamp)
                    .with_impl(|a| convert_to_timestamp(&a[0])),
            ),
    );
    registry.add(
        FunctionDecl::new("duration")
            .overload(
                Overload::global("string_to_duration", vec![Str], Duration)
                    .with_impl(|a| convert_to_duration(&a[0])),
            )
            .overload(
                Overload::global("duration_to_duration", vec![Duration], Duration)
                    .with_impl(|a| convert_to_duration(&a[0])),
            ),
    );
    registry.add(
        FunctionDecl::new("type").overload(
            Overload::global("type", vec![CelType::type_param("A")], Type)
                .with_type_params(&["A"])
                .with_impl(|a| convert_to_type(&a[0])),
        ),
    );
    registry.add(
        FunctionDecl::new("dyn").overload(
            Overload::global("to_dyn", vec![CelType::type_param("A")], Dyn)
                .with_type_params(&["A"])
                .with_impl(|a| Ok(a[0].clone())),
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_catalogue_has_core_names() {
        let registry = FunctionRegistry::standard();
        for name in [
            "_+_", "_==_", "_<_", "@in", "_[_]", "size", "int", "uint", "double", "string", "bytes", "bool",
            "timestamp", "duration", "type", "dyn", "contains", "startsWith", "endsWith", "matches", "split", "join",
            "replace", "trim", "lowerAscii", "upperAscii", "charAt", "indexOf", "lastIndexOf", "substring", "format",
            "strings.quote", "reverse", "base64.encode", "base64.decode", "slice", "flatten", "distinct", "sort",
            "@sortByAssociatedKeys", "lists.range", "math.@min", "math.@max", "math.ceil", "math.floor",
            "math.round", "math.trunc", "math.abs", "math.sign", "math.sqrt", "math.isInf", "math.isNaN",
            "math.isFinite", "math.bitAnd", "math.bitOr", "math.bitXor", "math.bitNot", "math.bitShiftLeft",
            "math.bitShiftRight", "getFullYear", "getMonth", "getDate", "getDayOfMonth", "getDayOfWeek",
            "getDayOfYear", "getHours", "getMinutes", "getSeconds", "getMilliseconds", "sets.contains",
            "sets.equivalent", "sets.intersects", "optional.of", "optional.ofNonZeroValue", "optional.none",
            "hasValue", "value", "or", "orValue",
        ] {
            assert!(registry.contains(name), "missing function {name}");
        }
    }

    #[test]
    fn dispatch_prefers_matching_kinds() {
        let registry = FunctionRegistry::standard();
        let decl = registry.find("_+_").unwrap();
        let result = dispatch("_+_", &decl.overloads, &[Value::Int(2), Value::Int(3)]);
        assert!(matches!(result, Value::Int(5)));
        let result = dispatch("_+_", &decl.overloads, &[Value::from("a"), Value::from("b")]);
        assert!(matches!(&result, Value::String(s) if s.as_ref() == "ab"));
        let result = dispatch("_+_", &decl.overloads, &[Value::Int(1), Value::from("b")]);
        assert!(result.is_error());
    }

    #[test]
    fn duration_parsing() {
        let Value::Duration(d) = parse_duration("1h30m").unwrap() else {
            panic!("expected duration");
        };
        assert_eq!(d.num_minutes(), 90);
        let Value::Duration(d) = parse_duration("-2.5s").unwrap() else {
            panic!("expected duration");
        };
        assert_eq!(d.num_milliseconds(), -2500);
        assert!(parse_duration("nonsense").is_err());
        assert!(parse_duration("10").is_err());
    }

    #[test]
    fn conversion_range_checks() {
        assert!(convert_to_int(&Value::Uint(u64::MAX)).is_err());
        assert!(convert_to_int(&Value::Double(f64::NAN)).is_err());
        assert!(convert_to_uint(&Value::Int(-1)).is_err());
        assert!(matches!(
            convert_to_int(&Value::Double(-2.9)).unwrap(),
            Value::Int(-2)
        ));
        assert!(matches!(
            convert_to_string(&Value::Double(1.0)).unwrap(),
            Value::String(s) if s.as_ref() == "1.0"
        ));
    }
}
