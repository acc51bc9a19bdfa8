use ocelot::{Env, JsonActivation, Value, value_to_json};
use pretty_assertions::assert_eq;

fn eval_json(source: &str, vars: &str) -> Value {
    let activation = JsonActivation::from_json_text(vars).unwrap();
    Env::builder()
        .disable_type_checking()
        .build()
        .compile(source)
        .unwrap_or_else(|e| panic!("compile of {source:?} failed:\n{e}"))
        .eval(&activation)
        .value
}

#[test]
fn json_variables_resolve_lazily() {
    assert_eq!(eval_json("n + 1", r#"{"n": 41}"#), Value::Int(42));
    assert_eq!(
        eval_json("user.name", r#"{"user": {"name": "ana"}}"#),
        Value::from("ana")
    );
    assert_eq!(
        eval_json("items.filter(i, i > 1)", r#"{"items": [1, 2, 3]}"#).to_string(),
        "[2, 3]"
    );
}

#[test]
fn json_objects_behave_as_maps() {
    assert_eq!(
        eval_json("has(cfg.debug) ? cfg.debug : false", r#"{"cfg": {"debug": true}}"#),
        Value::Bool(true)
    );
    assert_eq!(
        eval_json("has(cfg.debug) ? cfg.debug : false", r#"{"cfg": {}}"#),
        Value::Bool(false)
    );
    assert_eq!(eval_json("size(cfg)", r#"{"cfg": {"a": 1, "b": 2}}"#), Value::Int(2));
}

#[test]
fn results_serialize_back_to_json() {
    let value = eval_json("{'ok': n > 0, 'doubled': n * 2}", r#"{"n": 21}"#);
    let json = value_to_json(&value).unwrap();
    assert_eq!(json, serde_json::json!({"ok": true, "doubled": 42}));
}

#[test]
fn large_integers_become_uint() {
    assert_eq!(
        eval_json("big == 18446744073709551615u", r#"{"big": 18446744073709551615}"#),
        Value::Bool(true)
    );
}
