use std::sync::Arc;

use ocelot::{
    CelType, DeclaredStructProvider, EmptyActivation, Env, FieldInfo, FunctionDecl, LiteralValue, Overload, Value,
};
use pretty_assertions::assert_eq;

fn output_type(env: &Env, source: &str) -> CelType {
    let ast = env.parse(source).unwrap();
    env.check(&ast).unwrap_or_else(|e| panic!("check of {source:?} failed:\n{e}")).output_type
}

fn check_failure(env: &Env, source: &str) -> String {
    let ast = env.parse(source).unwrap();
    env.check(&ast).unwrap_err().to_string()
}

#[test]
fn literal_and_operator_types() {
    let env = Env::standard();
    assert_eq!(output_type(&env, "1 + 2"), CelType::Int);
    assert_eq!(output_type(&env, "1u + 2u"), CelType::Uint);
    assert_eq!(output_type(&env, "1.0 * 2.0"), CelType::Double);
    assert_eq!(output_type(&env, "'a' + 'b'"), CelType::String);
    assert_eq!(output_type(&env, "1 < 2"), CelType::Bool);
    assert_eq!(output_type(&env, "[1, 2]"), CelType::list_of(CelType::Int));
    assert_eq!(
        output_type(&env, "{'a': 1}"),
        CelType::map_of(CelType::String, CelType::Int)
    );
}

#[test]
fn mixed_aggregates_join_to_dyn() {
    let env = Env::standard();
    assert_eq!(output_type(&env, "[1, 'a']"), CelType::list_of(CelType::Dyn));
    assert_eq!(
        output_type(&env, "{'a': 1, 'b': 'x'}"),
        CelType::map_of(CelType::String, CelType::Dyn)
    );
}

#[test]
fn undeclared_reference_is_reported() {
    let env = Env::standard();
    let message = check_failure(&env, "nope + 1");
    assert!(message.contains("undeclared reference to 'nope'"), "got {message}");
    // Diagnostics carry positions.
    assert!(message.starts_with("1:1:"), "got {message}");
}

#[test]
fn no_matching_overload_names_argument_types() {
    let env = Env::standard();
    let message = check_failure(&env, "1 + 'a'");
    assert!(
        message.contains("no matching overload for '_+_' applied to (int, string)"),
        "got {message}"
    );
    let message = check_failure(&env, "1 < 'a'");
    assert!(message.contains("no matching overload"), "got {message}");
}

#[test]
fn heterogeneous_equality_is_permitted_for_numerics() {
    let env = Env::standard();
    assert_eq!(output_type(&env, "1 == 1u"), CelType::Bool);
    assert_eq!(output_type(&env, "1.0 != 2u"), CelType::Bool);
    // Non-numeric heterogeneous equality stays an error.
    let message = check_failure(&env, "1 == 'a'");
    assert!(message.contains("no matching overload"), "got {message}");
}

#[test]
fn parametric_overloads_substitute_consistently() {
    let env = Env::builder()
        .variable("xs", CelType::list_of(CelType::Uint))
        .build();
    assert_eq!(output_type(&env, "size(xs)"), CelType::Int);
    assert_eq!(output_type(&env, "xs[0]"), CelType::Uint);
    assert_eq!(output_type(&env, "[[1], [2, 3]][0]"), CelType::list_of(CelType::Int));
}

#[test]
fn container_resolution_prefers_the_longest_prefix() {
    let env = Env::builder()
        .container("acme.unit")
        .variable("acme.unit.x", CelType::Int)
        .variable("acme.y", CelType::String)
        .variable("y", CelType::Bool)
        .build();
    assert_eq!(output_type(&env, "x"), CelType::Int);
    // `acme.y` shadows the top-level `y` from inside container `acme.unit`.
    assert_eq!(output_type(&env, "y"), CelType::String);
    // A leading dot pins absolute resolution.
    assert_eq!(output_type(&env, ".y"), CelType::Bool);
}

#[test]
fn qualified_variables_resolve_through_selects() {
    let env = Env::builder()
        .variable("request.auth", CelType::map_of(CelType::String, CelType::String))
        .build();
    assert_eq!(
        output_type(&env, "request.auth"),
        CelType::map_of(CelType::String, CelType::String)
    );
    assert_eq!(output_type(&env, "request.auth.user"), CelType::String);
}

#[test]
fn constants_fold_into_the_plan() {
    let env = Env::builder()
        .constant("answer", CelType::Int, LiteralValue::Int(42))
        .build();
    assert_eq!(output_type(&env, "answer + 0"), CelType::Int);
    let outcome = env.compile("answer * 2").unwrap().eval(&EmptyActivation);
    assert_eq!(outcome.value, Value::Int(84));
}

#[test]
fn comprehension_variable_types_flow() {
    let env = Env::builder()
        .variable("xs", CelType::list_of(CelType::Int))
        .build();
    assert_eq!(output_type(&env, "xs.map(x, x + 1)"), CelType::list_of(CelType::Int));
    assert_eq!(output_type(&env, "xs.all(x, x > 0)"), CelType::Bool);
    let message = check_failure(&env, "xs.map(x, x + 'a')");
    assert!(message.contains("no matching overload"), "got {message}");
    // Non-iterable range.
    let message = check_failure(&env, "1.all(x, true)");
    assert!(message.contains("cannot be the range of a comprehension"), "got {message}");
}

#[test]
fn custom_functions_participate_in_resolution() {
    let env = Env::builder()
        .function(
            FunctionDecl::new("shout").overload(
                Overload::member("shout_string", vec![CelType::String], CelType::String).with_impl(|args| {
                    match &args[0] {
                        Value::String(s) => Ok(Value::string(s.to_uppercase())),
                        other => Err(ocelot::RuntimeError::type_mismatch(other.type_name())),
                    }
                }),
            ),
        )
        .build();
    assert_eq!(output_type(&env, "'abc'.shout()"), CelType::String);
    let outcome = env.compile("'abc'.shout()").unwrap().eval(&EmptyActivation);
    assert_eq!(outcome.value, Value::from("ABC"));
    let message = check_failure(&env, "1.shout()");
    assert!(message.contains("no matching overload"), "got {message}");
}

fn point_provider() -> Arc<DeclaredStructProvider> {
    let mut provider = DeclaredStructProvider::new();
    provider.declare_struct(
        "geo.Point",
        [
            ("x".to_owned(), FieldInfo::new(CelType::Int)),
            ("y".to_owned(), FieldInfo::new(CelType::Int)),
            ("label".to_owned(), FieldInfo::new(CelType::String)),
        ],
    );
    provider.declare_enum("geo.Axis", [("HORIZONTAL".to_owned(), 0), ("VERTICAL".to_owned(), 1)]);
    Arc::new(provider)
}

#[test]
fn struct_construction_checks_fields() {
    let env = Env::builder().type_provider(point_provider()).build();
    assert_eq!(
        output_type(&env, "geo.Point{x: 1, y: 2}"),
        CelType::Struct("geo.Point".to_owned())
    );
    assert_eq!(output_type(&env, "geo.Point{x: 1}.x"), CelType::Int);

    let message = check_failure(&env, "geo.Point{z: 1}");
    assert!(message.contains("undefined field 'z'"), "got {message}");
    let message = check_failure(&env, "geo.Point{x: 'one'}");
    assert!(message.contains("expected type 'int'"), "got {message}");
    let message = check_failure(&env, "geo.Missing{x: 1}");
    assert!(message.contains("undefined struct type"), "got {message}");
}

#[test]
fn struct_names_resolve_through_the_container() {
    let env = Env::builder()
        .type_provider(point_provider())
        .container("geo")
        .build();
    assert_eq!(output_type(&env, "Point{x: 1}"), CelType::Struct("geo.Point".to_owned()));
}

#[test]
fn enum_constants_resolve_to_opaque_values() {
    let env = Env::builder().type_provider(point_provider()).build();
    assert_eq!(
        output_type(&env, "geo.Axis.VERTICAL"),
        CelType::Opaque("geo.Axis".to_owned())
    );
    let outcome = env.compile("geo.Axis.VERTICAL == geo.Axis.VERTICAL").unwrap().eval(&EmptyActivation);
    assert_eq!(outcome.value, Value::Bool(true));
}

#[test]
fn enums_as_ints_flag_changes_representation() {
    let env = Env::builder().type_provider(point_provider()).enums_as_ints().build();
    assert_eq!(output_type(&env, "geo.Axis.VERTICAL"), CelType::Int);
    let outcome = env.compile("geo.Axis.VERTICAL + 1").unwrap().eval(&EmptyActivation);
    assert_eq!(outcome.value, Value::Int(2));
}

#[test]
fn field_selection_on_unsupported_type_is_an_error() {
    let env = Env::builder().variable("n", CelType::Int).build();
    let message = check_failure(&env, "n.field");
    assert!(message.contains("does not support field selection"), "got {message}");
}

#[test]
fn checked_ast_round_trips_through_postcard() {
    let env = Env::builder().variable("n", CelType::Int).build();
    let ast = env.parse("n + 1").unwrap();
    let checked = env.check(&ast).unwrap();
    let bytes = checked.dump().unwrap();
    let restored = ocelot::CheckedAst::load(&bytes).unwrap();
    assert_eq!(restored.output_type, CelType::Int);
    let program = env.plan_checked(&restored);
    assert_eq!(program.eval_with([("n", Value::Int(41))]).value, Value::Int(42));
}
