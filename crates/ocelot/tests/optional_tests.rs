use ocelot::{EmptyActivation, Env, Value};
use pretty_assertions::assert_eq;

fn eval(source: &str) -> Value {
    Env::standard()
        .compile(source)
        .unwrap_or_else(|e| panic!("compile of {source:?} failed:\n{e}"))
        .eval(&EmptyActivation)
        .value
}

#[test]
fn construction_and_access() {
    assert_eq!(eval("optional.of(3).hasValue()"), Value::Bool(true));
    assert_eq!(eval("optional.of(3).value()"), Value::Int(3));
    assert_eq!(eval("optional.none().hasValue()"), Value::Bool(false));
    assert_eq!(eval("optional.ofNonZeroValue(0).hasValue()"), Value::Bool(false));
    assert_eq!(eval("optional.ofNonZeroValue('x').hasValue()"), Value::Bool(true));

    let outcome = Env::standard().compile("optional.none().value()").unwrap().eval(&EmptyActivation);
    assert!(outcome.error.unwrap().contains("optional.none() dereference"));
}

#[test]
fn or_chains() {
    assert_eq!(eval("optional.of(1).or(optional.of(2)).value()"), Value::Int(1));
    assert_eq!(eval("optional.none().or(optional.of(2)).value()"), Value::Int(2));
    assert_eq!(eval("optional.of(1).orValue(9)"), Value::Int(1));
    assert_eq!(eval("optional.none().orValue(9)"), Value::Int(9));
}

#[test]
fn or_does_not_evaluate_the_alternative_when_present() {
    // The right operand would raise if evaluated.
    assert_eq!(eval("optional.of(1).orValue(1 / 0)"), Value::Int(1));
    assert_eq!(eval("optional.of(1).or(optional.of(1 / 0)).value()"), Value::Int(1));
    // And it is evaluated when the receiver is empty.
    let outcome = Env::standard()
        .compile("optional.none().orValue(1 / 0)")
        .unwrap()
        .eval(&EmptyActivation);
    assert!(!outcome.success);
}

#[test]
fn list_construction_skips_empty_optionals() {
    assert_eq!(eval("[?optional.of(1), 2, ?optional.none()]").to_string(), "[1, 2]");
    assert_eq!(eval("size([?optional.none()])"), Value::Int(0));
    assert_eq!(eval("size([1, ?optional.none(), 2])"), Value::Int(2));
}

#[test]
fn map_construction_omits_empty_optional_values() {
    assert_eq!(eval("{'a': 1, ?'b': optional.none()}").to_string(), "{\"a\": 1}");
    assert_eq!(eval("{?'b': optional.of(2)}").to_string(), "{\"b\": 2}");
}

#[test]
fn opt_map_and_flat_map() {
    assert_eq!(eval("optional.of(4).optMap(x, x * 2).value()"), Value::Int(8));
    assert_eq!(eval("optional.none().optMap(x, x * 2).hasValue()"), Value::Bool(false));
    assert_eq!(
        eval("optional.of(4).optFlatMap(x, optional.of(x + 1)).value()"),
        Value::Int(5)
    );
    assert_eq!(
        eval("optional.of(4).optFlatMap(x, optional.none()).hasValue()"),
        Value::Bool(false)
    );
}

#[test]
fn optionals_display_forms() {
    assert_eq!(eval("optional.of(1)").to_string(), "optional.of(1)");
    assert_eq!(eval("optional.none()").to_string(), "optional.none");
}
