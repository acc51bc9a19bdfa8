use ocelot::{CelType, EmptyActivation, Env, ExprId, MapActivation, Value};
use pretty_assertions::assert_eq;

fn eval(source: &str) -> Value {
    Env::standard()
        .compile(source)
        .unwrap_or_else(|e| panic!("compile of {source:?} failed:\n{e}"))
        .eval(&EmptyActivation)
        .value
}

fn eval_unchecked(source: &str, activation: &MapActivation) -> Value {
    Env::builder()
        .disable_type_checking()
        .build()
        .compile(source)
        .unwrap_or_else(|e| panic!("compile of {source:?} failed:\n{e}"))
        .eval(activation)
        .value
}

#[test]
fn arithmetic_basics() {
    assert_eq!(eval("1 + 2 * 3"), Value::Int(7));
    assert_eq!(eval("(1 + 2) * 3"), Value::Int(9));
    assert_eq!(eval("10 % 3"), Value::Int(1));
    assert_eq!(eval("7u / 2u"), Value::Uint(3));
    assert_eq!(eval("1.5 + 2.25"), Value::Double(3.75));
    assert_eq!(eval("-(-3)"), Value::Int(3));
    assert_eq!(eval("'foo' + 'bar'"), Value::from("foobar"));
    assert_eq!(eval("b'ab' + b'cd'"), Value::bytes(b"abcd".to_vec()));
    assert_eq!(
        eval("[1, 2] + [3]"),
        Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
    );
}

#[test]
fn integer_overflow_detected() {
    let outcome = Env::standard()
        .compile("9223372036854775807 + 1")
        .unwrap()
        .eval(&EmptyActivation);
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("integer overflow"));

    let outcome = Env::standard()
        .compile("-9223372036854775808 - 1")
        .unwrap()
        .eval(&EmptyActivation);
    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("integer overflow"));

    let outcome = Env::standard()
        .compile("0u - 1u")
        .unwrap()
        .eval(&EmptyActivation);
    assert!(outcome.error.unwrap().contains("integer overflow"));
}

#[test]
fn division_by_zero_reports_operator_column() {
    let env = Env::builder()
        .variable("a", CelType::Int)
        .variable("b", CelType::Int)
        .build();
    let program = env.compile("a / b").unwrap();
    let outcome = program.eval_with([("a", Value::Int(1)), ("b", Value::Int(0))]);
    assert!(!outcome.success);
    let message = outcome.error.unwrap();
    assert!(message.contains("divide by zero"), "got {message}");
    // The `/` sits at line 1, column 3.
    assert!(message.starts_with("1:3:"), "got {message}");
}

#[test]
fn double_division_follows_ieee754() {
    assert_eq!(eval("1.0 / 0.0"), Value::Double(f64::INFINITY));
    assert_eq!(eval("-1.0 / 0.0"), Value::Double(f64::NEG_INFINITY));
    let Value::Double(nan) = eval("0.0 / 0.0") else {
        panic!("expected double");
    };
    assert!(nan.is_nan());
}

#[test]
fn nan_ordering_is_false() {
    assert_eq!(eval("0.0/0.0 < 1.0"), Value::Bool(false));
    assert_eq!(eval("0.0/0.0 > 1.0"), Value::Bool(false));
    assert_eq!(eval("0.0/0.0 == 0.0/0.0"), Value::Bool(false));
    assert_eq!(eval("0.0/0.0 != 0.0/0.0"), Value::Bool(true));
}

#[test]
fn cross_kind_numeric_comparison() {
    assert_eq!(eval("1 == 1u"), Value::Bool(true));
    assert_eq!(eval("1 < 2u"), Value::Bool(true));
    assert_eq!(eval("-1 < 0u"), Value::Bool(true));
    assert_eq!(eval("2.5 > 2"), Value::Bool(true));
    assert_eq!(eval("18446744073709551615u > 1"), Value::Bool(true));
    assert_eq!(eval("'a' < 'b'"), Value::Bool(true));
    assert_eq!(eval("b'a' < b'b'"), Value::Bool(true));
}

#[test]
fn short_circuit_laws() {
    // false && X == false and true || X == true, even when X errors.
    assert_eq!(eval("false && (1 / 0 == 0)"), Value::Bool(false));
    assert_eq!(eval("(1 / 0 == 0) && false"), Value::Bool(false));
    assert_eq!(eval("true || (1 / 0 == 0)"), Value::Bool(true));
    assert_eq!(eval("(1 / 0 == 0) || true"), Value::Bool(true));
    // The surviving branch's error propagates.
    let outcome = Env::standard().compile("true && (1 / 0 == 0)").unwrap().eval(&EmptyActivation);
    assert!(!outcome.success);
    // Idempotence on definite booleans.
    assert_eq!(eval("true && true"), Value::Bool(true));
    assert_eq!(eval("false || false"), Value::Bool(false));
}

#[test]
fn short_circuit_swallows_unknowns() {
    let activation = MapActivation::new().with("mystery", Value::unknown(ExprId::new(7)));
    assert_eq!(
        eval_unchecked("false && mystery", &activation),
        Value::Bool(false)
    );
    assert_eq!(eval_unchecked("true || mystery", &activation), Value::Bool(true));
    // A surviving unknown propagates with its attribute set intact.
    let Value::Unknown(set) = eval_unchecked("true && mystery", &activation) else {
        panic!("expected unknown");
    };
    assert_eq!(set.ids(), &[ExprId::new(7)]);
}

#[test]
fn unknowns_merge_in_logical_operators() {
    let activation = MapActivation::new()
        .with("a", Value::unknown(ExprId::new(3)))
        .with("b", Value::unknown(ExprId::new(9)));
    let Value::Unknown(set) = eval_unchecked("a && b", &activation) else {
        panic!("expected unknown");
    };
    assert_eq!(set.ids(), &[ExprId::new(3), ExprId::new(9)]);
}

#[test]
fn non_bool_on_surviving_branch_is_type_error() {
    let outcome = Env::builder()
        .disable_type_checking()
        .build()
        .compile("1 && true")
        .unwrap()
        .eval(&EmptyActivation);
    assert!(!outcome.success);
    // But an absorbing operand still wins.
    let activation = MapActivation::new();
    assert_eq!(eval_unchecked("1 && false", &activation), Value::Bool(false));
}

#[test]
fn ternary_branches_lazily() {
    assert_eq!(eval("true ? 1 : 1 / 0"), Value::Int(1));
    assert_eq!(eval("false ? 1 / 0 : 2"), Value::Int(2));
}

#[test]
fn scenario_membership_and_comparison() {
    let env = Env::builder()
        .variable("x", CelType::Int)
        .variable("items", CelType::list_of(CelType::Int))
        .build();
    let program = env.compile("x in items && x > 0").unwrap();
    let outcome = program.eval_with([
        ("x", Value::Int(3)),
        ("items", Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)])),
    ]);
    assert_eq!(outcome.value, Value::Bool(true));
}

#[test]
fn scenario_nested_ternary() {
    let env = Env::builder().variable("n", CelType::Int).build();
    let program = env.compile("n > 0 ? 'pos' : (n < 0 ? 'neg' : 'zero')").unwrap();
    assert_eq!(program.eval_with([("n", Value::Int(0))]).value, Value::from("zero"));
    assert_eq!(program.eval_with([("n", Value::Int(5))]).value, Value::from("pos"));
    assert_eq!(program.eval_with([("n", Value::Int(-5))]).value, Value::from("neg"));
}

#[test]
fn scenario_presence_guard() {
    let env = Env::builder()
        .variable("m", CelType::map_of(CelType::String, CelType::Int))
        .build();
    let program = env.compile("has(m.k) ? m.k : -1").unwrap();

    let mut with_key = ocelot::MapValue::new();
    with_key.insert(ocelot::MapKey::String("k".into()), Value::Int(7));
    assert_eq!(program.eval_with([("m", Value::map(with_key))]).value, Value::Int(7));

    let empty = ocelot::MapValue::new();
    assert_eq!(program.eval_with([("m", Value::map(empty))]).value, Value::Int(-1));
}

#[test]
fn scenario_exists_one() {
    assert_eq!(eval("[1,2,3].exists_one(x, x == 2)"), Value::Bool(true));
    assert_eq!(eval("[1,2,2].exists_one(x, x == 2)"), Value::Bool(false));
    assert_eq!(eval("[1,2,3].existsOne(x, x == 2)"), Value::Bool(true));
}

#[test]
fn scenario_string_functions() {
    assert_eq!(eval("'hello'.substring(1, 4)"), Value::from("ell"));
    assert_eq!(eval("'héllo'.charAt(1)"), Value::from("é"));
}

#[test]
fn comprehension_results_are_independent_of_range_values() {
    assert_eq!(eval("[1,2,3].all(x, true)"), Value::Bool(true));
    assert_eq!(eval("[1,2,3].exists(x, false)"), Value::Bool(false));
    assert_eq!(
        eval("[1,2,3].map(x, x * x)"),
        Value::list(vec![Value::Int(1), Value::Int(4), Value::Int(9)])
    );
    assert_eq!(
        eval("[1,2,3,4].filter(x, x % 2 == 0)"),
        Value::list(vec![Value::Int(2), Value::Int(4)])
    );
}

#[test]
fn comprehension_error_absorption() {
    // An erroring predicate is absorbed when a later element decides the
    // quantifier, and surfaces otherwise.
    assert_eq!(eval("[2, 0, 3].all(x, 6 / x == 3)"), Value::Bool(false));
    let outcome = Env::standard().compile("[2, 0].all(x, 4 / x != 3)").unwrap().eval(&EmptyActivation);
    assert!(!outcome.success);
    assert_eq!(eval("[0, 2].exists(x, 6 / x == 3)"), Value::Bool(true));
}

#[test]
fn two_variable_comprehensions() {
    assert_eq!(eval("[10, 20].all(i, v, v == (i + 1) * 10)"), Value::Bool(true));
    assert_eq!(eval("{'a': 1, 'b': 2}.exists(k, v, k == 'b' && v == 2)"), Value::Bool(true));
}

#[test]
fn map_comprehension_iterates_keys_in_insertion_order() {
    assert_eq!(
        eval("{'z': 1, 'a': 2}.map(k, k)"),
        Value::list(vec![Value::from("z"), Value::from("a")])
    );
}

#[test]
fn cel_bind_binds_once() {
    assert_eq!(eval("cel.bind(x, 40, x + 2)"), Value::Int(42));
    assert_eq!(eval("cel.bind(xs, [1, 2], xs + xs)").to_string(), "[1, 2, 1, 2]");
}

#[test]
fn index_coercions() {
    assert_eq!(eval("[10, 20, 30][1]"), Value::Int(20));
    // uint and integral-double indexes are a runtime coercion; the checker
    // only admits int, so exercise them unchecked.
    let activation = MapActivation::new();
    assert_eq!(eval_unchecked("[10, 20, 30][1u]", &activation), Value::Int(20));
    assert_eq!(eval_unchecked("[10, 20, 30][2.0]", &activation), Value::Int(30));
    let Value::Error(err) = eval_unchecked("[10][0.5]", &activation) else {
        panic!("expected error");
    };
    assert!(err.message.contains("non-integral"));
    let outcome = Env::standard().compile("[10][3]").unwrap().eval(&EmptyActivation);
    assert!(outcome.error.unwrap().contains("out of range"));
}

#[test]
fn map_lookup_and_missing_key() {
    assert_eq!(eval("{'k': 7}['k']"), Value::Int(7));
    assert_eq!(eval("{1: 'a'}[1u]"), Value::from("a"));
    let outcome = Env::standard().compile("{'k': 7}['missing']").unwrap().eval(&EmptyActivation);
    assert!(outcome.error.unwrap().contains("no such key"));
}

#[test]
fn in_operator() {
    assert_eq!(eval("2 in [1, 2, 3]"), Value::Bool(true));
    assert_eq!(eval("'k' in {'k': 1}"), Value::Bool(true));
    assert_eq!(eval("'ell' in 'hello'"), Value::Bool(true));
    assert_eq!(eval("4 in [1, 2, 3]"), Value::Bool(false));
}

#[test]
fn repeated_map_literal_key_errors() {
    let outcome = Env::standard().compile("{1: 'a', 1u: 'b'}").unwrap().eval(&EmptyActivation);
    assert!(outcome.error.unwrap().contains("repeated key"));
}

#[test]
fn string_size_counts_characters() {
    assert_eq!(eval("size('héllo')"), Value::Int(5));
    assert_eq!(eval("'héllo'.size()"), Value::Int(5));
    assert_eq!(eval("size(b'h\\xc3\\xa9')"), Value::Int(3));
}

#[test]
fn type_values() {
    assert_eq!(eval("type(1) == int"), Value::Bool(true));
    assert_eq!(eval("type('a') == string"), Value::Bool(true));
    assert_eq!(eval("type(type(1)) == type"), Value::Bool(true));
    assert_eq!(eval("type(1) == type(2)"), Value::Bool(true));
    assert_eq!(eval("type(1) == uint"), Value::Bool(false));
}

#[test]
fn cost_is_structural() {
    let env = Env::standard();
    let cheap = env.compile("1 + 2").unwrap().cost();
    let pricey = env.compile("[1,2,3].map(x, x * x + 1)").unwrap().cost();
    assert!(cheap < pricey);
    assert_eq!(env.compile("1 + 2").unwrap().cost(), cheap);
}

#[test]
fn programs_are_reusable() {
    let env = Env::builder().variable("n", CelType::Int).build();
    let program = env.compile("n * n").unwrap();
    for i in 0..5i64 {
        assert_eq!(program.eval_with([("n", Value::Int(i))]).value, Value::Int(i * i));
    }
}
