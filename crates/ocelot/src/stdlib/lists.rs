//! List functions: slicing, flattening, ordering, and `lists.range`.

use std::cmp::Ordering;

use crate::{
    error::RuntimeError,
    stdlib::{FunctionDecl, FunctionRegistry, Overload, want_int, want_list},
    types::CelType,
    value::{Value, cel_compare, cel_equals},
};

pub(crate) fn register(registry: &mut FunctionRegistry) {
    use CelType::{Dyn, Int};
    let list_a = CelType::list_of(CelType::type_param("A"));
    let list_dyn = CelType::list_of(Dyn);

    registry.add(
        FunctionDecl::new("slice").overload(
            Overload::member("list_slice", vec![list_a.clone(), Int, Int], list_a.clone())
                .with_type_params(&["A"])
                .with_impl(|a| slice_impl(want_list(&a[0])?, want_int(&a[1])?, want_int(&a[2])?)),
        ),
    );

    registry.add(
        FunctionDecl::new("flatten")
            .overload(
                Overload::member("list_flatten", vec![list_dyn.clone()], list_dyn.clone())
                    .with_impl(|a| flatten_impl(want_list(&a[0])?, 1)),
            )
            .overload(
                Overload::member("list_flatten_depth", vec![list_dyn.clone(), Int], list_dyn.clone()).with_impl(
                    |a| {
                        let depth = want_int(&a[1])?;
                        if depth < 0 {
                            return Err(RuntimeError::invalid_argument("flatten depth must not be negative"));
                        }
                        flatten_impl(want_list(&a[0])?, depth)
                    },
                ),
            ),
    );

    registry.add(
        FunctionDecl::new("reverse").overload(
            Overload::member("list_reverse", vec![list_a.clone()], list_a.clone())
                .with_type_params(&["A"])
                .with_impl(|a| {
                    let mut items = want_list(&a[0])?.to_vec();
                    items.reverse();
                    Ok(Value::list(items))
                }),
        ),
    );

    registry.add(
        FunctionDecl::new("distinct").overload(
            Overload::member("list_distinct", vec![list_a.clone()], list_a.clone())
                .with_type_params(&["A"])
                .with_impl(|a| {
                    let items = want_list(&a[0])?;
                    let mut out: Vec<Value> = Vec::with_capacity(items.len());
                    for item in items {
                        if !out.iter().any(|seen| cel_equals(seen, item)) {
                            out.push(item.clone());
                        }
                    }
                    Ok(Value::list(out))
                }),
        ),
    );

    registry.add(
        FunctionDecl::new("sort").overload(
            Overload::member("list_sort", vec![list_a.clone(), ], list_a.clone())
                .with_type_params(&["A"])
                .with_impl(|a| {
                    let mut items = want_list(&a[0])?.to_vec();
                    sort_values(&mut items)?;
                    Ok(Value::list(items))
                }),
        ),
    );

    registry.add(
        FunctionDecl::new("@sortByAssociatedKeys").overload(
            Overload::global("list_sort_by_associated_keys", vec![list_a.clone(), list_dyn], list_a)
                .with_type_params(&["A"])
                .with_impl(|a| {
                    let items = want_list(&a[0])?;
                    let keys = want_list(&a[1])?;
                    if items.len() != keys.len() {
                        return Err(RuntimeError::invalid_argument(format!(
                            "key list size {} does not match list size {}",
                            keys.len(),
                            items.len()
                        )));
                    }
                    let mut pairs: Vec<(Value, Value)> =
                        keys.iter().cloned().zip(items.iter().cloned()).collect();
                    sort_pairs(&mut pairs)?;
                    Ok(Value::list(pairs.into_iter().map(|(_, item)| item).collect()))
                }),
        ),
    );

    registry.add(
        FunctionDecl::new("lists.range").overload(
            Overload::global("lists_range", vec![Int], CelType::list_of(Int)).with_impl(|a| {
                let n = want_int(&a[0])?;
                Ok(Value::list((0..n.max(0)).map(Value::Int).collect()))
            }),
        ),
    );
}

fn slice_impl(items: &[Value], start: i64, end: i64) -> Result<Value, RuntimeError> {
    let len = items.len() as i64;
    if start < 0 || end < start || end > len {
        return Err(RuntimeError::invalid_argument(format!(
            "slice range [{start}, {end}) out of bounds (size {len})"
        )));
    }
    Ok(Value::list(items[start as usize..end as usize].to_vec()))
}

fn flatten_impl(items: &[Value], depth: i64) -> Result<Value, RuntimeError> {
    let mut out = Vec::with_capacity(items.len());
    flatten_into(items, depth, &mut out);
    Ok(Value::list(out))
}

fn flatten_into(items: &[Value], depth: i64, out: &mut Vec<Value>) {
    for item in items {
        match item {
            Value::List(nested) if depth > 0 => flatten_into(nested, depth - 1, out),
            other => out.push(other.clone()),
        }
    }
}

fn sort_values(items: &mut [Value]) -> Result<(), RuntimeError> {
    let mut failure: Option<RuntimeError> = None;
    items.sort_by(|a, b| match cel_compare(a, b) {
        Ok(Some(ordering)) => ordering,
        Ok(None) => Ordering::Equal,
        Err(err) => {
            failure.get_or_insert(err);
            Ordering::Equal
        }
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn sort_pairs(pairs: &mut [(Value, Value)]) -> Result<(), RuntimeError> {
    let mut failure: Option<RuntimeError> = None;
    pairs.sort_by(|(a, _), (b, _)| match cel_compare(a, b) {
        Ok(Some(ordering)) => ordering,
        Ok(None) => Ordering::Equal,
        Err(err) => {
            failure.get_or_insert(err);
            Ordering::Equal
        }
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().copied().map(Value::Int).collect()
    }

    #[test]
    fn flatten_depths() {
        let nested = vec![
            Value::Int(1),
            Value::list(vec![Value::Int(2), Value::list(ints(&[3, 4]))]),
        ];
        let Value::List(once) = flatten_impl(&nested, 1).unwrap() else {
            panic!("expected list");
        };
        assert_eq!(once.len(), 3);
        let Value::List(full) = flatten_impl(&nested, 2).unwrap() else {
            panic!("expected list");
        };
        assert_eq!(full.as_ref(), &ints(&[1, 2, 3, 4]));
    }

    #[test]
    fn sort_rejects_mixed_kinds() {
        let mut ok = ints(&[3, 1, 2]);
        sort_values(&mut ok).unwrap();
        assert_eq!(ok, ints(&[1, 2, 3]));

        let mut bad = vec![Value::Int(1), Value::from("x")];
        assert!(sort_values(&mut bad).is_err());
    }

    #[test]
    fn slice_bounds() {
        let items = ints(&[1, 2, 3, 4]);
        let Value::List(sliced) = slice_impl(&items, 1, 3).unwrap() else {
            panic!("expected list");
        };
        assert_eq!(sliced.as_ref(), &ints(&[2, 3]));
        assert!(slice_impl(&items, 3, 2).is_err());
        assert!(slice_impl(&items, 0, 5).is_err());
    }
}
