use std::borrow::Cow;

use ahash::AHashMap;

use crate::{
    ast::{ComprehensionExpr, Expr, ExprKind, IdGen, LiteralValue, MapEntry, SourceInfo, StructField},
    error::ParseError,
    parse::operators,
};

/// Reserved name of the comprehension accumulator variable.
///
/// User iteration variables may not shadow it; expansion fails with
/// `iteration variable overwrites accumulator variable`.
pub const ACCU_VAR: &str = "@result";

/// Hidden binding introduced by the `sortBy` lowering.
const SORT_BY_INPUT: &str = "@__sortBy_input__";

/// Iteration variable name for comprehensions that never iterate
/// (the `cel.bind` lowering).
const UNUSED_ITER_VAR: &str = "#unused";

/// Node builder handed to macro expanders.
///
/// Continues the parser's id sequence and records a source position (the
/// macro call site's span) for every synthesized node, so diagnostics inside
/// expansions still point at the original source.
pub struct ExprFactory<'a> {
    ids: &'a mut IdGen,
    info: &'a mut SourceInfo,
    span: (u32, u32),
}

impl<'a> ExprFactory<'a> {
    pub fn new(ids: &'a mut IdGen, info: &'a mut SourceInfo, span: (u32, u32)) -> Self {
        Self { ids, info, span }
    }

    pub fn expr(&mut self, kind: ExprKind) -> Expr {
        let id = self.ids.next_id();
        self.info.record_position(id, self.span.0, self.span.1);
        Expr::new(id, kind)
    }

    pub fn ident(&mut self, name: &str) -> Expr {
        self.expr(ExprKind::Ident(name.to_owned()))
    }

    pub fn accu_ident(&mut self) -> Expr {
        self.ident(ACCU_VAR)
    }

    pub fn bool_lit(&mut self, value: bool) -> Expr {
        self.expr(ExprKind::Literal(LiteralValue::Bool(value)))
    }

    pub fn int_lit(&mut self, value: i64) -> Expr {
        self.expr(ExprKind::Literal(LiteralValue::Int(value)))
    }

    pub fn empty_list(&mut self) -> Expr {
        self.expr(ExprKind::List {
            elements: Vec::new(),
            optional_indices: Vec::new(),
        })
    }

    pub fn list(&mut self, elements: Vec<Expr>) -> Expr {
        self.expr(ExprKind::List {
            elements,
            optional_indices: Vec::new(),
        })
    }

    pub fn global_call(&mut self, function: &str, args: Vec<Expr>) -> Expr {
        self.expr(ExprKind::Call {
            function: function.to_owned(),
            target: None,
            args,
        })
    }

    pub fn receiver_call(&mut self, function: &str, target: Expr, args: Vec<Expr>) -> Expr {
        self.expr(ExprKind::Call {
            function: function.to_owned(),
            target: Some(Box::new(target)),
            args,
        })
    }

    /// `cond ? then : otherwise` as its canonical call form.
    pub fn ternary(&mut self, cond: Expr, then: Expr, otherwise: Expr) -> Expr {
        self.global_call(operators::CONDITIONAL, vec![cond, then, otherwise])
    }

    pub fn not_strictly_false(&mut self, arg: Expr) -> Expr {
        self.global_call(operators::NOT_STRICTLY_FALSE, vec![arg])
    }

    pub fn comprehension(&mut self, body: ComprehensionExpr) -> Expr {
        self.expr(ExprKind::Comprehension(Box::new(body)))
    }

    /// Deep-copies a subtree, assigning fresh ids throughout.
    ///
    /// Needed when an expansion mentions a macro argument more than once:
    /// node ids must stay unique across the whole tree.
    pub fn copy_fresh(&mut self, expr: &Expr) -> Expr {
        let kind = match &expr.kind {
            ExprKind::Literal(lit) => ExprKind::Literal(lit.clone()),
            ExprKind::Ident(name) => ExprKind::Ident(name.clone()),
            ExprKind::Select {
                operand,
                field,
                test_only,
            } => ExprKind::Select {
                operand: Box::new(self.copy_fresh(operand)),
                field: field.clone(),
                test_only: *test_only,
            },
            ExprKind::Call { function, target, args } => ExprKind::Call {
                function: function.clone(),
                target: target.as_ref().map(|t| Box::new(self.copy_fresh(t))),
                args: args.iter().map(|a| self.copy_fresh(a)).collect(),
            },
            ExprKind::List {
                elements,
                optional_indices,
            } => ExprKind::List {
                elements: elements.iter().map(|e| self.copy_fresh(e)).collect(),
                optional_indices: optional_indices.clone(),
            },
            ExprKind::Map { entries } => ExprKind::Map {
                entries: entries
                    .iter()
                    .map(|entry| MapEntry {
                        entry_id: self.ids.next_id(),
                        key: self.copy_fresh(&entry.key),
                        value: self.copy_fresh(&entry.value),
                        optional: entry.optional,
                    })
                    .collect(),
            },
            ExprKind::Struct { type_name, fields } => ExprKind::Struct {
                type_name: type_name.clone(),
                fields: fields
                    .iter()
                    .map(|field| StructField {
                        field_id: self.ids.next_id(),
                        name: field.name.clone(),
                        value: self.copy_fresh(&field.value),
                        optional: field.optional,
                    })
                    .collect(),
            },
            ExprKind::Comprehension(c) => ExprKind::Comprehension(Box::new(ComprehensionExpr {
                iter_range: self.copy_fresh(&c.iter_range),
                iter_var: c.iter_var.clone(),
                iter_var2: c.iter_var2.clone(),
                accu_var: c.accu_var.clone(),
                accu_init: self.copy_fresh(&c.accu_init),
                loop_condition: self.copy_fresh(&c.loop_condition),
                loop_step: self.copy_fresh(&c.loop_step),
                result: self.copy_fresh(&c.result),
            })),
            ExprKind::Unspecified => ExprKind::Unspecified,
        };
        self.expr(kind)
    }

    fn macro_error(&self, msg: impl Into<Cow<'static, str>>) -> ParseError {
        ParseError::Macro {
            msg: msg.into(),
            offset: self.span.0,
        }
    }
}

/// Outcome of running one expander: the replacement expression, or `None`
/// when the macro refuses the call site and the literal call is kept.
pub type ExpandResult = Result<Option<Expr>, ParseError>;

/// A macro expander: `(factory, target, args) → replacement`.
pub type MacroExpander = fn(&mut ExprFactory<'_>, Option<Expr>, Vec<Expr>) -> ExpandResult;

/// Registry of macros keyed by `(name, receiver_style)` with per-entry
/// arity; `None` arity matches any argument count.
#[derive(Debug, Clone, Default)]
pub struct MacroRegistry {
    entries: AHashMap<(String, bool), Vec<(Option<usize>, MacroExpander)>>,
}

impl MacroRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in macro set.
    pub fn standard() -> Self {
        let mut registry = Self::default();
        registry.register("has", false, Some(1), expand_has);
        registry.register("all", true, Some(2), expand_all);
        registry.register("all", true, Some(3), expand_all_two_var);
        registry.register("exists", true, Some(2), expand_exists);
        registry.register("exists", true, Some(3), expand_exists_two_var);
        registry.register("exists_one", true, Some(2), expand_exists_one);
        registry.register("existsOne", true, Some(2), expand_exists_one);
        registry.register("map", true, Some(2), expand_map);
        registry.register("map", true, Some(3), expand_map_filtered);
        registry.register("filter", true, Some(2), expand_filter);
        registry.register("bind", true, Some(3), expand_bind);
        registry.register("least", true, None, expand_math_least);
        registry.register("greatest", true, None, expand_math_greatest);
        registry.register("optMap", true, Some(2), expand_opt_map);
        registry.register("optFlatMap", true, Some(2), expand_opt_flat_map);
        registry.register("sortBy", true, Some(2), expand_sort_by);
        registry
    }

    pub fn register(&mut self, name: &str, receiver_style: bool, arity: Option<usize>, expander: MacroExpander) {
        self.entries
            .entry((name.to_owned(), receiver_style))
            .or_default()
            .push((arity, expander));
    }

    /// Looks up an expander for a call shape; exact arity beats wildcard.
    pub fn find(&self, name: &str, receiver_style: bool, arity: usize) -> Option<MacroExpander> {
        let entries = self.entries.get(&(name.to_owned(), receiver_style))?;
        entries
            .iter()
            .find(|(a, _)| *a == Some(arity))
            .or_else(|| entries.iter().find(|(a, _)| a.is_none()))
            .map(|(_, expander)| *expander)
    }
}

/// Extracts the simple name of an iteration-variable argument, rejecting
/// anything that is not a plain identifier and the reserved accumulator.
fn iter_var_name(f: &ExprFactory<'_>, arg: &Expr) -> Result<String, ParseError> {
    let ExprKind::Ident(name) = &arg.kind else {
        return Err(f.macro_error("argument must be a simple name"));
    };
    if name == ACCU_VAR {
        return Err(f.macro_error("iteration variable overwrites accumulator variable"));
    }
    Ok(name.clone())
}

/// Joins a pure select chain back into a dotted name, e.g. `a.b.c`.
fn qualified_name(expr: &Expr) -> Option<String> {
    match &expr.kind {
        ExprKind::Ident(name) => Some(name.clone()),
        ExprKind::Select {
            operand,
            field,
            test_only: false,
        } => Some(format!("{}.{field}", qualified_name(operand)?)),
        _ => None,
    }
}

fn is_target_namespace(target: Option<&Expr>, namespace: &str) -> bool {
    target.is_some_and(|t| matches!(&t.kind, ExprKind::Ident(name) if name == namespace))
}

/// `has(x.y)` → a test-only select.
fn expand_has(f: &mut ExprFactory<'_>, _target: Option<Expr>, mut args: Vec<Expr>) -> ExpandResult {
    let arg = args.remove(0);
    match arg.kind {
        ExprKind::Select {
            operand,
            field,
            test_only: false,
        } => Ok(Some(f.expr(ExprKind::Select {
            operand,
            field,
            test_only: true,
        }))),
        _ => Err(f.macro_error("invalid argument to has() macro")),
    }
}

fn quantifier_comprehension(
    f: &mut ExprFactory<'_>,
    target: Expr,
    iter_var: String,
    iter_var2: Option<String>,
    predicate: Expr,
    kind: QuantifierKind,
) -> Expr {
    let (accu_init, loop_condition, loop_step) = match kind {
        QuantifierKind::All => {
            let init = f.bool_lit(true);
            let accu = f.accu_ident();
            let cond = f.not_strictly_false(accu);
            let accu = f.accu_ident();
            let step = f.global_call(operators::LOGICAL_AND, vec![accu, predicate]);
            (init, cond, step)
        }
        QuantifierKind::Exists => {
            let init = f.bool_lit(false);
            let accu = f.accu_ident();
            let negated = f.global_call(operators::LOGICAL_NOT, vec![accu]);
            let cond = f.not_strictly_false(negated);
            let accu = f.accu_ident();
            let step = f.global_call(operators::LOGICAL_OR, vec![accu, predicate]);
            (init, cond, step)
        }
    };
    let result = f.accu_ident();
    f.comprehension(ComprehensionExpr {
        iter_range: target,
        iter_var,
        iter_var2,
        accu_var: ACCU_VAR.to_owned(),
        accu_init,
        loop_condition,
        loop_step,
        result,
    })
}

enum QuantifierKind {
    All,
    Exists,
}

fn expand_all(f: &mut ExprFactory<'_>, target: Option<Expr>, mut args: Vec<Expr>) -> ExpandResult {
    let target = target.expect("receiver macro");
    let predicate = args.remove(1);
    let iter_var = iter_var_name(f, &args[0])?;
    Ok(Some(quantifier_comprehension(
        f,
        target,
        iter_var,
        None,
        predicate,
        QuantifierKind::All,
    )))
}

fn expand_all_two_var(f: &mut ExprFactory<'_>, target: Option<Expr>, mut args: Vec<Expr>) -> ExpandResult {
    let target = target.expect("receiver macro");
    let predicate = args.remove(2);
    let iter_var = iter_var_name(f, &args[0])?;
    let iter_var2 = iter_var_name(f, &args[1])?;
    if iter_var == iter_var2 {
        return Err(f.macro_error("duplicate iteration variable"));
    }
    Ok(Some(quantifier_comprehension(
        f,
        target,
        iter_var,
        Some(iter_var2),
        predicate,
        QuantifierKind::All,
    )))
}

fn expand_exists(f: &mut ExprFactory<'_>, target: Option<Expr>, mut args: Vec<Expr>) -> ExpandResult {
    let target = target.expect("receiver macro");
    let predicate = args.remove(1);
    let iter_var = iter_var_name(f, &args[0])?;
    Ok(Some(quantifier_comprehension(
        f,
        target,
        iter_var,
        None,
        predicate,
        QuantifierKind::Exists,
    )))
}

fn expand_exists_two_var(f: &mut ExprFactory<'_>, target: Option<Expr>, mut args: Vec<Expr>) -> ExpandResult {
    let target = target.expect("receiver macro");
    let predicate = args.remove(2);
    let iter_var = iter_var_name(f, &args[0])?;
    let iter_var2 = iter_var_name(f, &args[1])?;
    if iter_var == iter_var2 {
        return Err(f.macro_error("duplicate iteration variable"));
    }
    Ok(Some(quantifier_comprehension(
        f,
        target,
        iter_var,
        Some(iter_var2),
        predicate,
        QuantifierKind::Exists,
    )))
}

/// `r.exists_one(v, p)`: count matches, require exactly one.
fn expand_exists_one(f: &mut ExprFactory<'_>, target: Option<Expr>, mut args: Vec<Expr>) -> ExpandResult {
    let target = target.expect("receiver macro");
    let predicate = args.remove(1);
    let iter_var = iter_var_name(f, &args[0])?;
    let accu_init = f.int_lit(0);
    let loop_condition = f.bool_lit(true);
    let accu = f.accu_ident();
    let one = f.int_lit(1);
    let incremented = f.global_call(operators::ADD, vec![accu, one]);
    let accu = f.accu_ident();
    let loop_step = f.ternary(predicate, incremented, accu);
    let accu = f.accu_ident();
    let one = f.int_lit(1);
    let result = f.global_call(operators::EQUALS, vec![accu, one]);
    Ok(Some(f.comprehension(ComprehensionExpr {
        iter_range: target,
        iter_var,
        iter_var2: None,
        accu_var: ACCU_VAR.to_owned(),
        accu_init,
        loop_condition,
        loop_step,
        result,
    })))
}

fn map_comprehension(f: &mut ExprFactory<'_>, target: Expr, iter_var: String, transform: Expr, filter: Option<Expr>) -> Expr {
    let accu_init = f.empty_list();
    let loop_condition = f.bool_lit(true);
    let accu = f.accu_ident();
    let appended = f.list(vec![transform]);
    let extended = f.global_call(operators::ADD, vec![accu, appended]);
    let loop_step = match filter {
        Some(filter) => {
            let accu = f.accu_ident();
            f.ternary(filter, extended, accu)
        }
        None => extended,
    };
    let result = f.accu_ident();
    f.comprehension(ComprehensionExpr {
        iter_range: target,
        iter_var,
        iter_var2: None,
        accu_var: ACCU_VAR.to_owned(),
        accu_init,
        loop_condition,
        loop_step,
        result,
    })
}

fn expand_map(f: &mut ExprFactory<'_>, target: Option<Expr>, mut args: Vec<Expr>) -> ExpandResult {
    let target = target.expect("receiver macro");
    let transform = args.remove(1);
    let iter_var = iter_var_name(f, &args[0])?;
    Ok(Some(map_comprehension(f, target, iter_var, transform, None)))
}

fn expand_map_filtered(f: &mut ExprFactory<'_>, target: Option<Expr>, mut args: Vec<Expr>) -> ExpandResult {
    let target = target.expect("receiver macro");
    let transform = args.remove(2);
    let filter = args.remove(1);
    let iter_var = iter_var_name(f, &args[0])?;
    Ok(Some(map_comprehension(f, target, iter_var, transform, Some(filter))))
}

/// `r.filter(v, p)`: keep the elements satisfying the predicate.
fn expand_filter(f: &mut ExprFactory<'_>, target: Option<Expr>, mut args: Vec<Expr>) -> ExpandResult {
    let target = target.expect("receiver macro");
    let predicate = args.remove(1);
    let iter_var = iter_var_name(f, &args[0])?;
    let element = f.ident(&iter_var);
    Ok(Some(map_comprehension(f, target, iter_var, element, Some(predicate))))
}

/// `cel.bind(v, init, expr)`: a zero-iteration comprehension whose
/// accumulator is the user binding.
fn expand_bind(f: &mut ExprFactory<'_>, target: Option<Expr>, mut args: Vec<Expr>) -> ExpandResult {
    if !is_target_namespace(target.as_ref(), "cel") {
        return Ok(None);
    }
    let body = args.remove(2);
    let init = args.remove(1);
    let ExprKind::Ident(var_name) = &args[0].kind else {
        return Err(f.macro_error("cel.bind() variable name must be a simple identifier"));
    };
    let var_name = var_name.clone();
    let iter_range = f.empty_list();
    let loop_condition = f.bool_lit(false);
    let loop_step = f.ident(&var_name);
    Ok(Some(f.comprehension(ComprehensionExpr {
        iter_range,
        iter_var: UNUSED_ITER_VAR.to_owned(),
        iter_var2: None,
        accu_var: var_name,
        accu_init: init,
        loop_condition,
        loop_step,
        result: body,
    })))
}

fn expand_math_vararg(f: &mut ExprFactory<'_>, target: Option<Expr>, args: Vec<Expr>, function: &str) -> ExpandResult {
    if !is_target_namespace(target.as_ref(), "math") {
        return Ok(None);
    }
    if args.is_empty() {
        return Err(f.macro_error("requires at least one argument"));
    }
    let list = f.list(args);
    Ok(Some(f.global_call(function, vec![list])))
}

/// `math.least(a, b, …)` → `math.@min([a, b, …])`.
fn expand_math_least(f: &mut ExprFactory<'_>, target: Option<Expr>, args: Vec<Expr>) -> ExpandResult {
    expand_math_vararg(f, target, args, operators::MATH_MIN)
}

/// `math.greatest(a, b, …)` → `math.@max([a, b, …])`.
fn expand_math_greatest(f: &mut ExprFactory<'_>, target: Option<Expr>, args: Vec<Expr>) -> ExpandResult {
    expand_math_vararg(f, target, args, operators::MATH_MAX)
}

/// `opt.optMap(v, fn)` →
/// `opt.hasValue() ? optional.of(cel.bind(v, opt.value(), fn)) : optional.none()`.
fn expand_opt_map(f: &mut ExprFactory<'_>, target: Option<Expr>, mut args: Vec<Expr>) -> ExpandResult {
    let target = target.expect("receiver macro");
    let body = args.remove(1);
    let var_name = iter_var_name(f, &args[0])?;
    let target_copy = f.copy_fresh(&target);
    let has = f.receiver_call("hasValue", target, Vec::new());
    let value = f.receiver_call("value", target_copy, Vec::new());
    let bound = bind_comprehension(f, &var_name, value, body);
    let optional_ns = f.ident("optional");
    let some = f.receiver_call("of", optional_ns, vec![bound]);
    let optional_ns = f.ident("optional");
    let none = f.receiver_call("none", optional_ns, Vec::new());
    Ok(Some(f.ternary(has, some, none)))
}

/// `opt.optFlatMap(v, fn)` — as `optMap`, but `fn` already yields an optional.
fn expand_opt_flat_map(f: &mut ExprFactory<'_>, target: Option<Expr>, mut args: Vec<Expr>) -> ExpandResult {
    let target = target.expect("receiver macro");
    let body = args.remove(1);
    let var_name = iter_var_name(f, &args[0])?;
    let target_copy = f.copy_fresh(&target);
    let has = f.receiver_call("hasValue", target, Vec::new());
    let value = f.receiver_call("value", target_copy, Vec::new());
    let bound = bind_comprehension(f, &var_name, value, body);
    let optional_ns = f.ident("optional");
    let none = f.receiver_call("none", optional_ns, Vec::new());
    Ok(Some(f.ternary(has, bound, none)))
}

fn bind_comprehension(f: &mut ExprFactory<'_>, var_name: &str, init: Expr, body: Expr) -> Expr {
    let iter_range = f.empty_list();
    let loop_condition = f.bool_lit(false);
    let loop_step = f.ident(var_name);
    f.comprehension(ComprehensionExpr {
        iter_range,
        iter_var: UNUSED_ITER_VAR.to_owned(),
        iter_var2: None,
        accu_var: var_name.to_owned(),
        accu_init: init,
        loop_condition,
        loop_step,
        result: body,
    })
}

/// `list.sortBy(v, key)` →
/// `cel.bind(@__sortBy_input__, list,
///     @sortByAssociatedKeys(@__sortBy_input__, @__sortBy_input__.map(v, key)))`.
fn expand_sort_by(f: &mut ExprFactory<'_>, target: Option<Expr>, mut args: Vec<Expr>) -> ExpandResult {
    let target = target.expect("receiver macro");
    let key = args.remove(1);
    let iter_var = iter_var_name(f, &args[0])?;
    let input = f.ident(SORT_BY_INPUT);
    let keys = map_comprehension(f, input, iter_var, key, None);
    let input = f.ident(SORT_BY_INPUT);
    let sorted = f.global_call(operators::SORT_BY_ASSOCIATED_KEYS, vec![input, keys]);
    Ok(Some(bind_comprehension(f, SORT_BY_INPUT, target, sorted)))
}

/// Records the original call for an expansion and returns the replacement.
///
/// Kept separate from [`MacroRegistry::find`] so the parser drives the
/// refuse/keep protocol: `Ok(None)` keeps the literal call.
pub fn run_expander(
    expander: MacroExpander,
    f: &mut ExprFactory<'_>,
    original: &Expr,
    target: Option<Expr>,
    args: Vec<Expr>,
) -> ExpandResult {
    let expanded = expander(f, target, args)?;
    if let Some(expanded) = &expanded {
        f.info.record_macro_call(expanded.id, original.clone());
    }
    Ok(expanded)
}

/// Re-exported for the checker's namespaced-call resolution.
pub fn select_chain_name(expr: &Expr) -> Option<String> {
    qualified_name(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory_parts() -> (IdGen, SourceInfo) {
        (IdGen::new(), SourceInfo::new("test"))
    }

    fn ident(ids: &mut IdGen, name: &str) -> Expr {
        Expr::new(ids.next_id(), ExprKind::Ident(name.to_owned()))
    }

    #[test]
    fn all_expands_to_comprehension() {
        let (mut ids, mut info) = factory_parts();
        let target = ident(&mut ids, "items");
        let var = ident(&mut ids, "x");
        let pred = ident(&mut ids, "p");
        let mut f = ExprFactory::new(&mut ids, &mut info, (0, 4));
        let expanded = expand_all(&mut f, Some(target), vec![var, pred]).unwrap().unwrap();
        let ExprKind::Comprehension(c) = expanded.kind else {
            panic!("expected comprehension");
        };
        assert_eq!(c.iter_var, "x");
        assert_eq!(c.accu_var, ACCU_VAR);
        assert!(matches!(c.accu_init.kind, ExprKind::Literal(LiteralValue::Bool(true))));
    }

    #[test]
    fn accumulator_shadowing_is_rejected() {
        let (mut ids, mut info) = factory_parts();
        let target = ident(&mut ids, "items");
        let var = ident(&mut ids, ACCU_VAR);
        let pred = ident(&mut ids, "p");
        let mut f = ExprFactory::new(&mut ids, &mut info, (0, 4));
        let err = expand_all(&mut f, Some(target), vec![var, pred]).unwrap_err();
        assert!(err.message().contains("overwrites accumulator variable"));
    }

    #[test]
    fn bind_refuses_non_cel_namespace() {
        let (mut ids, mut info) = factory_parts();
        let target = ident(&mut ids, "owner");
        let var = ident(&mut ids, "v");
        let init = ident(&mut ids, "a");
        let body = ident(&mut ids, "v");
        let mut f = ExprFactory::new(&mut ids, &mut info, (0, 4));
        assert!(expand_bind(&mut f, Some(target), vec![var, init, body]).unwrap().is_none());
    }

    #[test]
    fn copy_fresh_renumbers_every_node() {
        let (mut ids, mut info) = factory_parts();
        let inner = ident(&mut ids, "a");
        let outer = Expr::new(
            ids.next_id(),
            ExprKind::Select {
                operand: Box::new(inner),
                field: "b".to_owned(),
                test_only: false,
            },
        );
        let mut f = ExprFactory::new(&mut ids, &mut info, (0, 1));
        let copy = f.copy_fresh(&outer);
        let mut original_ids = Vec::new();
        outer.visit(&mut |e| original_ids.push(e.id));
        copy.visit(&mut |e| assert!(!original_ids.contains(&e.id)));
    }
}
