//! Set predicates over lists under the `sets.` namespace.
//!
//! CEL has no set type; these functions treat lists as sets, using CEL
//! equality (so `1`, `1u`, and `1.0` are the same member).

use crate::{
    stdlib::{FunctionDecl, FunctionRegistry, Overload, want_list},
    types::CelType,
    value::{Value, cel_equals},
};

pub(crate) fn register(registry: &mut FunctionRegistry) {
    use CelType::Bool;
    let list_a = CelType::list_of(CelType::type_param("A"));

    registry.add(
        FunctionDecl::new("sets.contains").overload(
            Overload::global("sets_contains", vec![list_a.clone(), list_a.clone()], Bool)
                .with_type_params(&["A"])
                .with_impl(|a| {
                    let (outer, inner) = (want_list(&a[0])?, want_list(&a[1])?);
                    Ok(Value::Bool(inner.iter().all(|needle| {
                        outer.iter().any(|member| cel_equals(member, needle))
                    })))
                }),
        ),
    );

    registry.add(
        FunctionDecl::new("sets.equivalent").overload(
            Overload::global("sets_equivalent", vec![list_a.clone(), list_a.clone()], Bool)
                .with_type_params(&["A"])
                .with_impl(|a| {
                    let (left, right) = (want_list(&a[0])?, want_list(&a[1])?);
                    let covers = |from: &[Value], to: &[Value]| {
                        from.iter().all(|needle| to.iter().any(|member| cel_equals(member, needle)))
                    };
                    Ok(Value::Bool(covers(left, right) && covers(right, left)))
                }),
        ),
    );

    registry.add(
        FunctionDecl::new("sets.intersects").overload(
            Overload::global("sets_intersects", vec![list_a.clone(), list_a], Bool)
                .with_type_params(&["A"])
                .with_impl(|a| {
                    let (left, right) = (want_list(&a[0])?, want_list(&a[1])?);
                    Ok(Value::Bool(left.iter().any(|needle| {
                        right.iter().any(|member| cel_equals(member, needle))
                    })))
                }),
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stdlib::dispatch;

    fn registry() -> FunctionRegistry {
        let mut r = FunctionRegistry::empty();
        register(&mut r);
        r
    }

    #[test]
    fn numeric_kinds_are_equivalent_members() {
        let r = registry();
        let equivalent = &r.find("sets.equivalent").unwrap().overloads;
        let left = Value::list(vec![Value::Int(1), Value::Int(2)]);
        let right = Value::list(vec![Value::Uint(2), Value::Double(1.0)]);
        assert!(matches!(
            dispatch("sets.equivalent", equivalent, &[left, right]),
            Value::Bool(true)
        ));
    }

    #[test]
    fn intersects_and_contains() {
        let r = registry();
        let contains = &r.find("sets.contains").unwrap().overloads;
        let intersects = &r.find("sets.intersects").unwrap().overloads;
        let a = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let b = Value::list(vec![Value::Int(2), Value::Int(3)]);
        let c = Value::list(vec![Value::Int(9)]);
        assert!(matches!(
            dispatch("sets.contains", contains, &[a.clone(), b.clone()]),
            Value::Bool(true)
        ));
        assert!(matches!(
            dispatch("sets.contains", contains, &[b.clone(), a.clone()]),
            Value::Bool(false)
        ));
        assert!(matches!(
            dispatch("sets.intersects", intersects, &[a, c]),
            Value::Bool(false)
        ));
    }
}
