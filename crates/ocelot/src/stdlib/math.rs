//! Math extension functions under the `math.` namespace.

use std::cmp::Ordering;

use crate::{
    error::RuntimeError,
    stdlib::{FunctionDecl, FunctionRegistry, Overload, want_list},
    types::CelType,
    value::{Value, cel_compare},
};

pub(crate) fn register(registry: &mut FunctionRegistry) {
    use CelType::{Bool, Double, Dyn, Int, Uint};

    registry.add(
        FunctionDecl::new("math.@min").overload(
            Overload::global("math_min_list", vec![CelType::list_of(Dyn)], Dyn)
                .with_impl(|a| extreme(want_list(&a[0])?, Ordering::Less)),
        ),
    );
    registry.add(
        FunctionDecl::new("math.@max").overload(
            Overload::global("math_max_list", vec![CelType::list_of(Dyn)], Dyn)
                .with_impl(|a| extreme(want_list(&a[0])?, Ordering::Greater)),
        ),
    );

    let rounding: &[(&str, &str, fn(f64) -> f64)] = &[
        ("math.ceil", "math_ceil_double", f64::ceil),
        ("math.floor", "math_floor_double", f64::floor),
        ("math.round", "math_round_double", f64::round),
        ("math.trunc", "math_trunc_double", f64::trunc),
    ];
    for (name, id, op) in rounding {
        let op = *op;
        registry.add(FunctionDecl::new(name).overload(
            Overload::global(id, vec![Double], Double).with_impl(move |a| match &a[0] {
                Value::Double(d) => Ok(Value::Double(op(*d))),
                other => Err(RuntimeError::no_such_overload(format!("({})", other.type_name()))),
            }),
        ));
    }

    registry.add(
        FunctionDecl::new("math.abs")
            .overload(
                Overload::global("math_abs_int", vec![Int], Int).with_impl(|a| match &a[0] {
                    Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(RuntimeError::overflow),
                    other => Err(RuntimeError::no_such_overload(format!("abs({})", other.type_name()))),
                }),
            )
            .overload(Overload::global("math_abs_uint", vec![Uint], Uint).with_impl(|a| Ok(a[0].clone())))
            .overload(
                Overload::global("math_abs_double", vec![Double], Double).with_impl(|a| match &a[0] {
                    Value::Double(d) => Ok(Value::Double(d.abs())),
                    other => Err(RuntimeError::no_such_overload(format!("abs({})", other.type_name()))),
                }),
            ),
    );

    registry.add(
        FunctionDecl::new("math.sign")
            .overload(
                Overload::global("math_sign_int", vec![Int], Int).with_impl(|a| match &a[0] {
                    Value::Int(i) => Ok(Value::Int(i.signum())),
                    other => Err(RuntimeError::no_such_overload(format!("sign({})", other.type_name()))),
                }),
            )
            .overload(
                Overload::global("math_sign_uint", vec![Uint], Uint).with_impl(|a| match &a[0] {
                    Value::Uint(u) => Ok(Value::Uint(u64::from(*u != 0))),
                    other => Err(RuntimeError::no_such_overload(format!("sign({})", other.type_name()))),
                }),
            )
            .overload(
                Overload::global("math_sign_double", vec![Double], Double).with_impl(|a| match &a[0] {
                    Value::Double(d) if d.is_nan() => Ok(Value::Double(f64::NAN)),
                    Value::Double(d) if *d == 0.0 => Ok(Value::Double(0.0)),
                    Value::Double(d) => Ok(Value::Double(d.signum())),
                    other => Err(RuntimeError::no_such_overload(format!("sign({})", other.type_name()))),
                }),
            ),
    );

    registry.add(
        FunctionDecl::new("math.sqrt")
            .overload(
                Overload::global("math_sqrt_double", vec![Double], Double).with_impl(|a| sqrt_impl(&a[0])),
            )
            .overload(Overload::global("math_sqrt_int", vec![Int], Double).with_impl(|a| sqrt_impl(&a[0])))
            .overload(Overload::global("math_sqrt_uint", vec![Uint], Double).with_impl(|a| sqrt_impl(&a[0]))),
    );

    let predicates: &[(&str, &str, fn(f64) -> bool)] = &[
        ("math.isInf", "math_is_inf_double", f64::is_infinite),
        ("math.isNaN", "math_is_nan_double", f64::is_nan),
        ("math.isFinite", "math_is_finite_double", f64::is_finite),
    ];
    for (name, id, op) in predicates {
        let op = *op;
        registry.add(FunctionDecl::new(name).overload(
            Overload::global(id, vec![Double], Bool).with_impl(move |a| match &a[0] {
                Value::Double(d) => Ok(Value::Bool(op(*d))),
                other => Err(RuntimeError::no_such_overload(format!("({})", other.type_name()))),
            }),
        ));
    }

    let bitwise: &[(&str, &str, fn(i64, i64) -> i64, fn(u64, u64) -> u64)] = &[
        ("math.bitAnd", "bit_and", |a, b| a & b, |a, b| a & b),
        ("math.bitOr", "bit_or", |a, b| a | b, |a, b| a | b),
        ("math.bitXor", "bit_xor", |a, b| a ^ b, |a, b| a ^ b),
    ];
    for (name, id, int_op, uint_op) in bitwise {
        let (int_op, uint_op) = (*int_op, *uint_op);
        registry.add(
            FunctionDecl::new(name)
                .overload(Overload::global(&format!("math_{id}_int"), vec![Int, Int], Int).with_impl(
                    move |a| match (&a[0], &a[1]) {
                        (Value::Int(x), Value::Int(y)) => Ok(Value::Int(int_op(*x, *y))),
                        _ => Err(bitwise_mismatch(&a[0], &a[1])),
                    },
                ))
                .overload(
                    Overload::global(&format!("math_{id}_uint"), vec![Uint, Uint], Uint).with_impl(move |a| {
                        match (&a[0], &a[1]) {
                            (Value::Uint(x), Value::Uint(y)) => Ok(Value::Uint(uint_op(*x, *y))),
                            _ => Err(bitwise_mismatch(&a[0], &a[1])),
                        }
                    }),
                ),
        );
    }

    registry.add(
        FunctionDecl::new("math.bitNot")
            .overload(
                Overload::global("math_bit_not_int", vec![Int], Int).with_impl(|a| match &a[0] {
                    Value::Int(i) => Ok(Value::Int(!i)),
                    other => Err(RuntimeError::no_such_overload(format!("bitNot({})", other.type_name()))),
                }),
            )
            .overload(
                Overload::global("math_bit_not_uint", vec![Uint], Uint).with_impl(|a| match &a[0] {
                    Value::Uint(u) => Ok(Value::Uint(!u)),
                    other => Err(RuntimeError::no_such_overload(format!("bitNot({})", other.type_name()))),
                }),
            ),
    );

    registry.add(
        FunctionDecl::new("math.bitShiftLeft")
            .overload(
                Overload::global("math_bit_shift_left_int", vec![Int, Int], Int)
                    .with_impl(|a| shift_impl(&a[0], &a[1], true)),
            )
            .overload(
                Overload::global("math_bit_shift_left_uint", vec![Uint, Int], Uint)
                    .with_impl(|a| shift_impl(&a[0], &a[1], true)),
            ),
    );
    registry.add(
        FunctionDecl::new("math.bitShiftRight")
            .overload(
                Overload::global("math_bit_shift_right_int", vec![Int, Int], Int)
                    .with_impl(|a| shift_impl(&a[0], &a[1], false)),
            )
            .overload(
                Overload::global("math_bit_shift_right_uint", vec![Uint, Int], Uint)
                    .with_impl(|a| shift_impl(&a[0], &a[1], false)),
            ),
    );
}

fn bitwise_mismatch(a: &Value, b: &Value) -> RuntimeError {
    RuntimeError::no_such_overload(format!("({}, {})", a.type_name(), b.type_name()))
}

fn sqrt_impl(v: &Value) -> Result<Value, RuntimeError> {
    let d = match v {
        Value::Double(d) => *d,
        Value::Int(i) => *i as f64,
        Value::Uint(u) => *u as f64,
        other => {
            return Err(RuntimeError::no_such_overload(format!(
                "sqrt({})",
                other.type_name()
            )));
        }
    };
    Ok(Value::Double(d.sqrt()))
}

/// Shifts treat the operand as a 64-bit pattern: a shift of 64 or more
/// yields 0, and a negative shift count is an error.
fn shift_impl(value: &Value, by: &Value, left: bool) -> Result<Value, RuntimeError> {
    let Value::Int(shift) = by else {
        return Err(bitwise_mismatch(value, by));
    };
    if *shift < 0 {
        return Err(RuntimeError::invalid_argument("negative shift count"));
    }
    match value {
        Value::Int(i) => {
            if *shift >= 64 {
                return Ok(Value::Int(0));
            }
            let bits = *i as u64;
            let shifted = if left { bits << shift } else { bits >> shift };
            Ok(Value::Int(shifted as i64))
        }
        Value::Uint(u) => {
            if *shift >= 64 {
                return Ok(Value::Uint(0));
            }
            Ok(Value::Uint(if left { u << shift } else { u >> shift }))
        }
        other => Err(bitwise_mismatch(other, by)),
    }
}

/// Shared implementation of `math.@min` / `math.@max` over a non-empty
/// numeric list; a NaN argument wins immediately.
fn extreme(items: &[Value], keep: Ordering) -> Result<Value, RuntimeError> {
    let mut best: Option<&Value> = None;
    for item in items {
        if !matches!(item, Value::Int(_) | Value::Uint(_) | Value::Double(_)) {
            return Err(RuntimeError::invalid_argument(format!(
                "argument must be numeric, found {}",
                item.type_name()
            )));
        }
        if matches!(item, Value::Double(d) if d.is_nan()) {
            return Ok(item.clone());
        }
        best = Some(match best {
            None => item,
            Some(current) => match cel_compare(item, current)? {
                Some(ordering) if ordering == keep => item,
                _ => current,
            },
        });
    }
    best.cloned()
        .ok_or_else(|| RuntimeError::invalid_argument("requires at least one argument"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_and_greatest_mix_kinds() {
        let items = [Value::Int(3), Value::Uint(1), Value::Double(2.5)];
        assert!(matches!(extreme(&items, Ordering::Less).unwrap(), Value::Uint(1)));
        assert!(matches!(extreme(&items, Ordering::Greater).unwrap(), Value::Int(3)));
        let with_nan = [Value::Int(1), Value::Double(f64::NAN)];
        assert!(matches!(extreme(&with_nan, Ordering::Less).unwrap(), Value::Double(d) if d.is_nan()));
    }

    #[test]
    fn shift_semantics() {
        assert!(matches!(shift_impl(&Value::Int(1), &Value::Int(3), true).unwrap(), Value::Int(8)));
        assert!(matches!(
            shift_impl(&Value::Int(1), &Value::Int(64), true).unwrap(),
            Value::Int(0)
        ));
        assert!(matches!(
            shift_impl(&Value::Uint(16), &Value::Int(2), false).unwrap(),
            Value::Uint(4)
        ));
        assert!(shift_impl(&Value::Int(1), &Value::Int(-1), true).is_err());
        // Right shift of a negative int is logical, not arithmetic.
        assert!(matches!(
            shift_impl(&Value::Int(-1), &Value::Int(63), false).unwrap(),
            Value::Int(1)
        ));
    }
}
