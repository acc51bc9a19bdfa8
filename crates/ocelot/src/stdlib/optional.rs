//! Optional-value constructors and accessors.
//!
//! `or`/`orValue` are declared here for the checker and fallback dispatch,
//! but the planner lowers them to short-circuiting nodes so the right-hand
//! side is never evaluated when the receiver holds a value.

use crate::{
    error::RuntimeError,
    stdlib::{FunctionDecl, FunctionRegistry, Overload},
    types::CelType,
    value::Value,
};

pub(crate) fn register(registry: &mut FunctionRegistry) {
    use CelType::{Bool, Dyn};
    let a = CelType::type_param("A");
    let opt_a = CelType::optional_of(a.clone());

    registry.add(
        FunctionDecl::new("optional.of").overload(
            Overload::global("optional_of", vec![a.clone()], opt_a.clone())
                .with_type_params(&["A"])
                .with_impl(|args| Ok(Value::optional_of(args[0].clone()))),
        ),
    );

    registry.add(
        FunctionDecl::new("optional.ofNonZeroValue").overload(
            Overload::global("optional_of_non_zero_value", vec![a.clone()], opt_a.clone())
                .with_type_params(&["A"])
                .with_impl(|args| {
                    Ok(if is_zero_value(&args[0]) {
                        Value::optional_none()
                    } else {
                        Value::optional_of(args[0].clone())
                    })
                }),
        ),
    );

    registry.add(
        FunctionDecl::new("optional.none").overload(
            Overload::global("optional_none", vec![], CelType::optional_of(Dyn))
                .with_impl(|_| Ok(Value::optional_none())),
        ),
    );

    registry.add(
        FunctionDecl::new("hasValue").overload(
            Overload::member("optional_has_value", vec![opt_a.clone()], Bool)
                .with_type_params(&["A"])
                .with_impl(|args| match &args[0] {
                    Value::Optional(inner) => Ok(Value::Bool(inner.is_some())),
                    other => Err(non_optional(other)),
                }),
        ),
    );

    registry.add(
        FunctionDecl::new("value").overload(
            Overload::member("optional_value", vec![opt_a.clone()], a.clone())
                .with_type_params(&["A"])
                .with_impl(|args| unwrap_optional(&args[0])),
        ),
    );

    registry.add(
        FunctionDecl::new("or").overload(
            Overload::member("optional_or_optional", vec![opt_a.clone(), opt_a.clone()], opt_a.clone())
                .with_type_params(&["A"])
                .with_impl(|args| match &args[0] {
                    Value::Optional(inner) if inner.is_some() => Ok(args[0].clone()),
                    Value::Optional(_) => Ok(args[1].clone()),
                    other => Err(non_optional(other)),
                }),
        ),
    );

    registry.add(
        FunctionDecl::new("orValue").overload(
            Overload::member("optional_or_value", vec![opt_a, a], CelType::type_param("A"))
                .with_type_params(&["A"])
                .with_impl(|args| match &args[0] {
                    Value::Optional(inner) => Ok(inner.as_ref().clone().unwrap_or_else(|| args[1].clone())),
                    other => Err(non_optional(other)),
                }),
        ),
    );
}

fn non_optional(v: &Value) -> RuntimeError {
    RuntimeError::type_mismatch(format!("expected optional, found {}", v.type_name()))
}

pub(crate) fn unwrap_optional(v: &Value) -> Result<Value, RuntimeError> {
    match v {
        Value::Optional(inner) => match inner.as_ref() {
            Some(value) => Ok(value.clone()),
            None => Err(RuntimeError::invalid_argument("optional.none() dereference")),
        },
        other => Err(non_optional(other)),
    }
}

/// The proto zero values: `optional.ofNonZeroValue` maps them to none.
fn is_zero_value(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Int(i) => *i == 0,
        Value::Uint(u) => *u == 0,
        Value::Double(d) => *d == 0.0,
        Value::String(s) => s.is_empty(),
        Value::Bytes(b) => b.is_empty(),
        Value::List(items) => items.is_empty(),
        Value::Map(map) => map.is_empty(),
        Value::Duration(d) => d.is_zero(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::MapValue;

    #[test]
    fn of_non_zero_value() {
        assert!(is_zero_value(&Value::Int(0)));
        assert!(is_zero_value(&Value::from("")));
        assert!(is_zero_value(&Value::map(MapValue::new())));
        assert!(!is_zero_value(&Value::Int(1)));
        assert!(!is_zero_value(&Value::optional_none()));
    }

    #[test]
    fn value_dereference() {
        assert!(matches!(
            unwrap_optional(&Value::optional_of(Value::Int(3))).unwrap(),
            Value::Int(3)
        ));
        let err = unwrap_optional(&Value::optional_none()).unwrap_err();
        assert!(err.message.contains("dereference"));
    }
}
