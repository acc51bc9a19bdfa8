use ocelot::{Ast, Env, ExprId, ExprKind, parse};
use pretty_assertions::assert_eq;

#[test]
fn every_node_id_is_unique_after_macro_expansion() {
    let sources = [
        "1 + 2 * 3",
        "[1, 2, 3].map(x, [x, x]).filter(xs, xs[0] > 1)",
        "has(a.b) && a.all(x, x.exists(y, y == 2))",
        "cel.bind(v, {'k': [1]}, v.k[0])",
        "optional.of(1).optMap(x, x + 1)",
    ];
    for source in sources {
        let ast = parse(source).unwrap_or_else(|e| panic!("parse of {source:?} failed: {e:?}"));
        let mut seen: Vec<ExprId> = Vec::new();
        ast.expr.visit(&mut |e| {
            assert!(!seen.contains(&e.id), "duplicate id {:?} in {source:?}", e.id);
            seen.push(e.id);
        });
    }
}

#[test]
fn positions_point_into_the_source() {
    let source = "items.all(x,\n  x > 0)";
    let ast = parse(source).unwrap();
    let mut checked_any = false;
    ast.expr.visit(&mut |e| {
        if let Some((start, end)) = ast.source_info.position(e.id) {
            assert!(start <= end);
            assert!((end as usize) <= source.len(), "span of {:?} escapes source", e.id);
            checked_any = true;
        }
    });
    assert!(checked_any);
    // The predicate's comparison sits on line 2.
    let ExprKind::Comprehension(c) = &ast.expr.kind else {
        panic!("expected comprehension");
    };
    // loop_step is `@result && (x > 0)`; dig out the predicate.
    let ExprKind::Call { args, .. } = &c.loop_step.kind else {
        panic!("expected call");
    };
    let predicate_location = ast.source_info.location(args[1].id).unwrap();
    assert_eq!(predicate_location.line, 2);
}

#[test]
fn macro_calls_round_trip_the_surface_form() {
    let ast = parse("[1].exists(x, x > 0)").unwrap();
    let original = ast.source_info.macro_call(ast.expr.id).expect("recorded");
    let ExprKind::Call { function, target, args } = &original.kind else {
        panic!("expected the pre-expansion call");
    };
    assert_eq!(function, "exists");
    assert!(target.is_some());
    assert_eq!(args.len(), 2);
}

#[test]
fn parse_errors_format_with_line_and_column() {
    let env = Env::standard();
    let err = env.parse("1 +\n* 2").unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("2:1:"), "got {message}");

    let err = env.parse("a.?b").unwrap_err();
    assert!(err.to_string().contains("optional field selection"), "got {err}");
}

#[test]
fn ast_round_trips_through_postcard() {
    let ast = parse("{'k': [1, 2u, 3.0]}.k").unwrap();
    let bytes = ast.dump().unwrap();
    let restored = Ast::load(&bytes).unwrap();
    assert_eq!(ast.expr, restored.expr);
    assert_eq!(ast.source_info.source(), restored.source_info.source());
    // A restored AST still compiles and evaluates.
    let env = Env::builder().disable_type_checking().build();
    let outcome = env.plan_unchecked(&restored).eval(&ocelot::EmptyActivation);
    assert_eq!(outcome.value.to_string(), "[1, 2u, 3.0]");
}

#[test]
fn max_id_covers_macro_records() {
    let ast = parse("[1].all(x, x > 0)").unwrap();
    let max = ast.max_id();
    ast.expr.visit(&mut |e| assert!(e.id <= max));
    for (id, original) in ast.source_info.macro_calls() {
        assert!(id <= max);
        original.visit(&mut |e| assert!(e.id <= max));
    }
}
