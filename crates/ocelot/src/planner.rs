use std::sync::Arc;

use ahash::AHashMap;

use crate::{
    ast::{Ast, Expr, ExprId, ExprKind, LiteralValue},
    checker::{CheckedAst, ConstantValue, Reference},
    env::Env,
    interp::{BinaryOp, ComprehensionPlan, Conversion, Interpretable, PlannedEntry, Qualifier},
    parse::operators,
    stdlib::Overload,
    value::Value,
};

/// Lowers a checked AST into an evaluator tree.
pub fn plan(checked: &CheckedAst, env: &Env) -> Interpretable {
    Planner {
        env,
        ref_map: Some(&checked.ref_map),
    }
    .plan_expr(&checked.ast.expr)
}

/// Lowers an unchecked AST; references resolve by argument kinds at runtime.
pub fn plan_unchecked(ast: &Ast, env: &Env) -> Interpretable {
    Planner { env, ref_map: None }.plan_expr(&ast.expr)
}

struct Planner<'a> {
    env: &'a Env,
    ref_map: Option<&'a AHashMap<ExprId, Reference>>,
}

impl Planner<'_> {
    fn reference(&self, id: ExprId) -> Option<&Reference> {
        self.ref_map.and_then(|m| m.get(&id))
    }

    fn plan_expr(&self, expr: &Expr) -> Interpretable {
        match &expr.kind {
            ExprKind::Literal(lit) => Interpretable::Const(literal_value(lit)),
            ExprKind::Ident(name) => self.plan_ident(expr.id, name),
            ExprKind::Select {
                operand,
                field,
                test_only,
            } => self.plan_select(expr.id, operand, field, *test_only),
            ExprKind::Call { function, target, args } => self.plan_call(expr.id, function, target.as_deref(), args),
            ExprKind::List {
                elements,
                optional_indices,
            } => Interpretable::CreateList {
                elements: elements.iter().map(|e| self.plan_expr(e)).collect(),
                optional_indices: optional_indices.clone(),
                id: expr.id,
            },
            ExprKind::Map { entries } => Interpretable::CreateMap {
                entries: entries
                    .iter()
                    .map(|entry| PlannedEntry {
                        key: self.plan_expr(&entry.key),
                        value: self.plan_expr(&entry.value),
                        optional: entry.optional,
                    })
                    .collect(),
                id: expr.id,
            },
            ExprKind::Struct { type_name, fields } => Interpretable::CreateStruct {
                type_name: self.resolve_struct_name(type_name),
                fields: fields
                    .iter()
                    .map(|field| PlannedEntry {
                        key: field.name.clone(),
                        value: self.plan_expr(&field.value),
                        optional: field.optional,
                    })
                    .collect(),
                id: expr.id,
            },
            ExprKind::Comprehension(c) => self.plan_comprehension(expr.id, c),
            ExprKind::Unspecified => Interpretable::Const(Value::error(
                crate::error::RuntimeError::invalid_argument("unspecified expression").or_at(expr.id),
            )),
        }
    }

    fn plan_ident(&self, id: ExprId, name: &str) -> Interpretable {
        match self.reference(id) {
            Some(Reference::Variable {
                constant: Some(constant),
                ..
            }) => Interpretable::Const(self.constant_value(constant)),
            Some(Reference::Variable { name: resolved, .. }) => Interpretable::Ident {
                name: name.to_owned(),
                candidates: vec![resolved.clone()],
                id,
            },
            _ => Interpretable::Ident {
                name: name.to_owned(),
                candidates: self.env.resolution_candidates(name),
                id,
            },
        }
    }

    fn constant_value(&self, constant: &ConstantValue) -> Value {
        match constant {
            ConstantValue::Literal(lit) => literal_value(lit),
            ConstantValue::Enum { type_name, value } => {
                if self.env.enums_as_ints() {
                    Value::Int(i64::from(*value))
                } else {
                    Value::Enum(Arc::from(type_name.as_str()), i64::from(*value))
                }
            }
        }
    }

    fn plan_select(&self, id: ExprId, operand: &Expr, field: &str, test_only: bool) -> Interpretable {
        if test_only {
            return Interpretable::HasField {
                operand: Box::new(self.plan_expr(operand)),
                field: field.to_owned(),
                id,
            };
        }
        // The checker may have resolved the whole chain as one reference.
        match self.reference(id) {
            Some(Reference::Variable {
                constant: Some(constant),
                ..
            }) => {
                return Interpretable::Const(self.constant_value(constant));
            }
            Some(Reference::Variable { name: resolved, .. }) => {
                return Interpretable::Ident {
                    name: resolved.clone(),
                    candidates: vec![resolved.clone()],
                    id,
                };
            }
            _ => {}
        }
        let base = self.plan_expr(operand);
        extend_attr(base, Qualifier::Field {
            field: field.to_owned(),
            id,
        })
    }

    fn plan_call(&self, id: ExprId, function: &str, target: Option<&Expr>, args: &[Expr]) -> Interpretable {
        // The checker rewrites `ns.f(args)` to a global call on the
        // qualified name; without it, do the same here so namespaced
        // functions and enum conversions still resolve.
        let qualified;
        let (function, target) = match target {
            Some(t) if self.ref_map.is_none() => match self.qualified_function(function, t) {
                Some(name) => {
                    qualified = name;
                    (qualified.as_str(), None)
                }
                None => (function, Some(t)),
            },
            other => (function, other),
        };
        // Operator specialisations keep short-circuiting and type-aware
        // arithmetic out of the generic dispatch path.
        if target.is_none() {
            match (function, args.len()) {
                (operators::LOGICAL_AND, 2) => {
                    return Interpretable::And {
                        left: Box::new(self.plan_expr(&args[0])),
                        right: Box::new(self.plan_expr(&args[1])),
                        id,
                    };
                }
                (operators::LOGICAL_OR, 2) => {
                    return Interpretable::Or {
                        left: Box::new(self.plan_expr(&args[0])),
                        right: Box::new(self.plan_expr(&args[1])),
                        id,
                    };
                }
                (operators::LOGICAL_NOT, 1) => {
                    return Interpretable::Not {
                        operand: Box::new(self.plan_expr(&args[0])),
                        id,
                    };
                }
                (operators::NEGATE, 1) => {
                    return Interpretable::Neg {
                        operand: Box::new(self.plan_expr(&args[0])),
                        id,
                    };
                }
                (operators::NOT_STRICTLY_FALSE, 1) => {
                    return Interpretable::NotStrictlyFalse {
                        operand: Box::new(self.plan_expr(&args[0])),
                    };
                }
                (operators::CONDITIONAL, 3) => {
                    return Interpretable::Conditional {
                        condition: Box::new(self.plan_expr(&args[0])),
                        then: Box::new(self.plan_expr(&args[1])),
                        otherwise: Box::new(self.plan_expr(&args[2])),
                        id,
                    };
                }
                (operators::INDEX, 2) => {
                    let base = self.plan_expr(&args[0]);
                    let index = self.plan_expr(&args[1]);
                    return extend_attr(base, Qualifier::Index {
                        index,
                        id,
                    });
                }
                _ => {}
            }
            if args.len() == 2
                && let Some(op) = binary_op(function)
            {
                return Interpretable::Binary {
                    op,
                    left: Box::new(self.plan_expr(&args[0])),
                    right: Box::new(self.plan_expr(&args[1])),
                    id,
                };
            }
            if args.len() == 1
                && let Some(conversion) = self.conversion_target(function)
            {
                return Interpretable::TypeConversion {
                    conversion,
                    operand: Box::new(self.plan_expr(&args[0])),
                    id,
                };
            }
        }

        // optional.or / orValue must not evaluate the alternative when the
        // receiver holds a value.
        if let Some(target) = target
            && args.len() == 1
            && matches!(function, "or" | "orValue")
        {
            return Interpretable::OptionalOr {
                receiver: Box::new(self.plan_expr(target)),
                alternative: Box::new(self.plan_expr(&args[0])),
                with_value: function == "orValue",
                id,
            };
        }

        let mut planned_args = Vec::with_capacity(args.len() + 1);
        if let Some(target) = target {
            planned_args.push(self.plan_expr(target));
        }
        for arg in args {
            planned_args.push(self.plan_expr(arg));
        }
        Interpretable::Call {
            function: function.to_owned(),
            candidates: self.candidates(id, function, target.is_some()),
            args: planned_args,
            id,
        }
    }

    /// The ordered dispatch list: overloads the checker resolved first, then
    /// the rest of the function's declaration as a runtime fallback.
    fn candidates(&self, id: ExprId, function: &str, receiver_style: bool) -> Vec<Arc<Overload>> {
        let mut out: Vec<Arc<Overload>> = Vec::new();
        if let Some(Reference::Function { overload_ids }) = self.reference(id) {
            for overload_id in overload_ids {
                if let Some(overload) = self.env.functions().overload(overload_id) {
                    out.push(Arc::clone(overload));
                }
            }
        }
        if let Some(decl) = self.env.functions().find(function) {
            for overload in &decl.overloads {
                if overload.receiver_style == receiver_style && !out.iter().any(|o| o.id == overload.id) {
                    out.push(Arc::clone(overload));
                }
            }
        }
        out
    }

    /// Joins a pure select-chain target with the function name and resolves
    /// it against declared functions and provider enum types.
    fn qualified_function(&self, function: &str, target: &Expr) -> Option<String> {
        let chain = crate::macros::select_chain_name(target)?;
        let qualified = format!("{chain}.{function}");
        self.env
            .resolution_candidates(&qualified)
            .into_iter()
            .find(|candidate| {
                self.env.functions().contains(candidate) || self.env.provider().find_enum_type(candidate).is_some()
            })
    }

    fn conversion_target(&self, function: &str) -> Option<Conversion> {
        let conversion = match function {
            "int" => Conversion::Int,
            "uint" => Conversion::Uint,
            "double" => Conversion::Double,
            "string" => Conversion::String,
            "bytes" => Conversion::Bytes,
            "bool" => Conversion::Bool,
            "timestamp" => Conversion::Timestamp,
            "duration" => Conversion::Duration,
            "type" => Conversion::Type,
            "dyn" => Conversion::Dyn,
            other => {
                let resolved = self
                    .env
                    .resolution_candidates(other)
                    .into_iter()
                    .find(|candidate| self.env.provider().find_enum_type(candidate).is_some())?;
                Conversion::Enum(resolved)
            }
        };
        Some(conversion)
    }

    fn resolve_struct_name(&self, type_name: &str) -> String {
        // Checked ASTs arrive with the resolved name already recorded.
        self.env
            .resolution_candidates(type_name)
            .into_iter()
            .find(|candidate| self.env.provider().find_struct_type(candidate).is_some())
            .unwrap_or_else(|| type_name.trim_start_matches('.').to_owned())
    }

    fn plan_comprehension(&self, id: ExprId, c: &crate::ast::ComprehensionExpr) -> Interpretable {
        // A zero-iteration comprehension is a let binding (`cel.bind`).
        let is_bind = matches!(&c.iter_range.kind, ExprKind::List { elements, .. } if elements.is_empty())
            && matches!(&c.loop_condition.kind, ExprKind::Literal(LiteralValue::Bool(false)));
        if is_bind {
            return Interpretable::Block {
                var: c.accu_var.clone(),
                init: Box::new(self.plan_expr(&c.accu_init)),
                body: Box::new(self.plan_expr(&c.result)),
            };
        }
        Interpretable::Comprehension(Box::new(ComprehensionPlan {
            iter_range: self.plan_expr(&c.iter_range),
            iter_var: c.iter_var.clone(),
            iter_var2: c.iter_var2.clone(),
            accu_var: c.accu_var.clone(),
            accu_init: self.plan_expr(&c.accu_init),
            loop_condition: self.plan_expr(&c.loop_condition),
            loop_step: self.plan_expr(&c.loop_step),
            result: self.plan_expr(&c.result),
            id,
        }))
    }
}

fn literal_value(lit: &LiteralValue) -> Value {
    match lit {
        LiteralValue::Null => Value::Null,
        LiteralValue::Bool(b) => Value::Bool(*b),
        LiteralValue::Int(i) => Value::Int(*i),
        LiteralValue::Uint(u) => Value::Uint(*u),
        LiteralValue::Double(d) => Value::Double(*d),
        LiteralValue::String(s) => Value::from(s.as_str()),
        LiteralValue::Bytes(b) => Value::bytes(b.clone()),
    }
}

/// Folds a field or index access onto an existing attribute chain, starting
/// a new chain when the base is a plain identifier.
fn extend_attr(base: Interpretable, qualifier: Qualifier) -> Interpretable {
    match base {
        Interpretable::Attr { base, mut qualifiers } => {
            qualifiers.push(qualifier);
            Interpretable::Attr { base, qualifiers }
        }
        ident @ Interpretable::Ident { .. } => Interpretable::Attr {
            base: Box::new(ident),
            qualifiers: vec![qualifier],
        },
        other => match qualifier {
            Qualifier::Field { field, id } => Interpretable::Field {
                operand: Box::new(other),
                field,
                id,
            },
            Qualifier::Index { index, id } => Interpretable::Index {
                base: Box::new(other),
                index: Box::new(index),
                id,
            },
        },
    }
}

fn binary_op(function: &str) -> Option<BinaryOp> {
    Some(match function {
        operators::ADD => BinaryOp::Add,
        operators::SUBTRACT => BinaryOp::Sub,
        operators::MULTIPLY => BinaryOp::Mul,
        operators::DIVIDE => BinaryOp::Div,
        operators::MODULO => BinaryOp::Rem,
        operators::EQUALS => BinaryOp::Eq,
        operators::NOT_EQUALS => BinaryOp::Ne,
        operators::LESS => BinaryOp::Lt,
        operators::LESS_EQUALS => BinaryOp::Le,
        operators::GREATER => BinaryOp::Gt,
        operators::GREATER_EQUALS => BinaryOp::Ge,
        operators::IN => BinaryOp::In,
        _ => return None,
    })
}
