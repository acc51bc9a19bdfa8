use ocelot::{EmptyActivation, Env, Value};
use pretty_assertions::assert_eq;

fn eval(source: &str) -> Value {
    Env::standard()
        .compile(source)
        .unwrap_or_else(|e| panic!("compile of {source:?} failed:\n{e}"))
        .eval(&EmptyActivation)
        .value
}

fn eval_err(source: &str) -> String {
    let outcome = Env::standard()
        .compile(source)
        .unwrap_or_else(|e| panic!("compile of {source:?} failed:\n{e}"))
        .eval(&EmptyActivation);
    outcome.error.unwrap_or_else(|| panic!("{source:?} did not fail, got {}", outcome.value))
}

#[test]
fn string_predicates() {
    assert_eq!(eval("'hello'.contains('ell')"), Value::Bool(true));
    assert_eq!(eval("'hello'.startsWith('he')"), Value::Bool(true));
    assert_eq!(eval("'hello'.endsWith('lo')"), Value::Bool(true));
    assert_eq!(eval("'hello'.matches('^h.*o$')"), Value::Bool(true));
    assert_eq!(eval("matches('hello', 'e.l')"), Value::Bool(true));
    assert!(eval_err("'a'.matches('[')").contains("invalid regex"));
}

#[test]
fn string_transforms() {
    assert_eq!(eval("'a,b,,c'.split(',')").to_string(), r#"["a", "b", "", "c"]"#);
    assert_eq!(eval("'a,b,c'.split(',', 2)").to_string(), r#"["a", "b,c"]"#);
    assert_eq!(eval("['a', 'b'].join('-')"), Value::from("a-b"));
    assert_eq!(eval("['a', 'b'].join()"), Value::from("ab"));
    assert_eq!(eval("'aaa'.replace('a', 'b', 2)"), Value::from("bba"));
    assert_eq!(eval("'  x  '.trim()"), Value::from("x"));
    assert_eq!(eval("'Mixed'.lowerAscii()"), Value::from("mixed"));
    assert_eq!(eval("'Mixed'.upperAscii()"), Value::from("MIXED"));
    assert_eq!(eval("'abc'.reverse()"), Value::from("cba"));
    assert_eq!(eval("strings.quote('a\\nb')"), Value::from("\"a\\nb\""));
}

#[test]
fn string_search() {
    assert_eq!(eval("'banana'.indexOf('na')"), Value::Int(2));
    assert_eq!(eval("'banana'.indexOf('na', 3)"), Value::Int(4));
    assert_eq!(eval("'banana'.lastIndexOf('na')"), Value::Int(4));
    assert_eq!(eval("'banana'.indexOf('zz')"), Value::Int(-1));
}

#[test]
fn string_format() {
    assert_eq!(
        eval("'%s scored %d (%.1f%%)'.format(['ana', 9, 87.5])"),
        Value::from("ana scored 9 (87.5%)")
    );
    assert_eq!(eval("'%x|%X|%o|%b'.format([255, 255, 8, 5])"), Value::from("ff|FF|10|101"));
    assert!(eval_err("'%d'.format(['x'])").contains("format"));
}

#[test]
fn encoders_round_trip() {
    assert_eq!(eval("base64.encode(b'hello')"), Value::from("aGVsbG8="));
    assert_eq!(eval("base64.decode('aGVsbG8=')"), Value::bytes(b"hello".to_vec()));
    assert_eq!(eval("string(base64.decode(base64.encode(b'ok')))"), Value::from("ok"));
    assert!(eval_err("base64.decode('!!!')").contains("invalid base64"));
}

#[test]
fn list_functions() {
    assert_eq!(eval("[1, 2, 3, 4].slice(1, 3)").to_string(), "[2, 3]");
    assert_eq!(eval("[1, [2, [3]]].flatten()").to_string(), "[1, 2, [3]]");
    assert_eq!(eval("[1, [2, [3]]].flatten(2)").to_string(), "[1, 2, 3]");
    assert_eq!(eval("[3, 1, 2].sort()").to_string(), "[1, 2, 3]");
    assert_eq!(eval("[1, 2, 2, 3, 1].distinct()").to_string(), "[1, 2, 3]");
    assert_eq!(eval("[1, 2, 3].reverse()").to_string(), "[3, 2, 1]");
    assert_eq!(eval("lists.range(4)").to_string(), "[0, 1, 2, 3]");
    assert_eq!(eval("lists.range(-1)").to_string(), "[]");
}

#[test]
fn sort_by_key() {
    assert_eq!(
        eval("['alpha', 'bc', 'd'].sortBy(s, s.size())").to_string(),
        r#"["d", "bc", "alpha"]"#
    );
}

#[test]
fn math_extremes() {
    assert_eq!(eval("math.least(3, 1, 2)"), Value::Int(1));
    assert_eq!(eval("math.greatest(3, 1, 2)"), Value::Int(3));
    assert_eq!(eval("math.least(1u, 2.5, 3)"), Value::Uint(1));
    assert_eq!(eval("math.least(5)"), Value::Int(5));
}

#[test]
fn math_rounding_and_predicates() {
    assert_eq!(eval("math.ceil(1.2)"), Value::Double(2.0));
    assert_eq!(eval("math.floor(1.8)"), Value::Double(1.0));
    assert_eq!(eval("math.round(1.5)"), Value::Double(2.0));
    assert_eq!(eval("math.trunc(-1.9)"), Value::Double(-1.0));
    assert_eq!(eval("math.abs(-3)"), Value::Int(3));
    assert_eq!(eval("math.sign(-9)"), Value::Int(-1));
    assert_eq!(eval("math.sqrt(9.0)"), Value::Double(3.0));
    assert_eq!(eval("math.isInf(1.0 / 0.0)"), Value::Bool(true));
    assert_eq!(eval("math.isNaN(0.0 / 0.0)"), Value::Bool(true));
    assert_eq!(eval("math.isFinite(1.0)"), Value::Bool(true));
    assert!(eval_err("math.abs(-9223372036854775808)").contains("integer overflow"));
}

#[test]
fn math_bitwise() {
    assert_eq!(eval("math.bitAnd(12, 10)"), Value::Int(8));
    assert_eq!(eval("math.bitOr(12, 10)"), Value::Int(14));
    assert_eq!(eval("math.bitXor(12, 10)"), Value::Int(6));
    assert_eq!(eval("math.bitNot(0)"), Value::Int(-1));
    assert_eq!(eval("math.bitShiftLeft(1, 3)"), Value::Int(8));
    assert_eq!(eval("math.bitShiftRight(16, 2)"), Value::Int(4));
    assert_eq!(eval("math.bitShiftLeft(1, 64)"), Value::Int(0));
    assert_eq!(eval("math.bitShiftLeft(1u, 70)"), Value::Uint(0));
    assert!(eval_err("math.bitShiftLeft(1, -1)").contains("negative shift"));
}

#[test]
fn set_predicates() {
    assert_eq!(eval("sets.contains([1, 2, 3], [2, 3])"), Value::Bool(true));
    assert_eq!(eval("sets.contains([1, 2], [3])"), Value::Bool(false));
    assert_eq!(eval("sets.equivalent([1, 2, 2], [2u, 1.0])"), Value::Bool(true));
    assert_eq!(eval("sets.intersects([1, 2], [2, 3])"), Value::Bool(true));
    assert_eq!(eval("sets.intersects([1], [2])"), Value::Bool(false));
}

#[test]
fn timestamps_and_durations() {
    assert_eq!(eval("timestamp('2009-02-13T23:31:30Z').getFullYear()"), Value::Int(2009));
    assert_eq!(eval("timestamp('2009-02-13T23:31:30Z').getMonth()"), Value::Int(1));
    assert_eq!(eval("timestamp('2009-02-13T23:31:30Z').getDate()"), Value::Int(13));
    assert_eq!(eval("timestamp('2009-02-13T23:31:30Z').getDayOfMonth()"), Value::Int(12));
    assert_eq!(eval("timestamp('2009-02-13T23:31:30Z').getDayOfWeek()"), Value::Int(5));
    assert_eq!(eval("timestamp('2009-02-13T23:31:30Z').getHours()"), Value::Int(23));
    assert_eq!(eval("timestamp('2009-02-13T23:31:30Z').getHours('+01:00')"), Value::Int(0));
    assert_eq!(eval("duration('1h30m').getMinutes()"), Value::Int(90));
    assert_eq!(eval("duration('90s').getSeconds()"), Value::Int(90));
    assert_eq!(eval("timestamp(0)"), eval("timestamp('1970-01-01T00:00:00Z')"));
}

#[test]
fn time_arithmetic() {
    assert_eq!(
        eval("timestamp('2009-02-13T23:31:30Z') + duration('30s')"),
        eval("timestamp('2009-02-13T23:32:00Z')")
    );
    assert_eq!(
        eval("timestamp('2009-02-13T23:31:30Z') - timestamp('2009-02-13T23:30:00Z')"),
        eval("duration('90s')")
    );
    assert_eq!(eval("duration('1m') + duration('30s')"), eval("duration('90s')"));
    assert_eq!(eval("duration('1m') < duration('90s')"), Value::Bool(true));
    assert!(eval_err("timestamp('10000-01-01T00:00:00Z')").contains("timestamp"));
}

#[test]
fn conversions() {
    assert_eq!(eval("int('42')"), Value::Int(42));
    assert_eq!(eval("int(3.9)"), Value::Int(3));
    assert_eq!(eval("uint(7)"), Value::Uint(7));
    assert_eq!(eval("double('2.5')"), Value::Double(2.5));
    assert_eq!(eval("string(42)"), Value::from("42"));
    assert_eq!(eval("string(2.5)"), Value::from("2.5"));
    assert_eq!(eval("string(true)"), Value::from("true"));
    assert_eq!(eval("bytes('ab')"), Value::bytes(b"ab".to_vec()));
    assert_eq!(eval("bool('true')"), Value::Bool(true));
    assert_eq!(eval("dyn(1) + 1"), Value::Int(2));
    assert!(eval_err("int('nope')").contains("cannot convert"));
    assert!(eval_err("uint(-1)").contains("integer overflow"));
    assert!(eval_err("string(b'\\xff')").contains("UTF-8"));
}
