use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    ast::{Ast, Expr, ExprId, ExprKind, LiteralValue},
    env::Env,
    error::CheckError,
    macros,
    parse::operators,
    types::{CelType, Substitution, is_assignable, join},
};

/// Names that resolve to first-class type values.
pub const TYPE_NAMES: &[&str] = &[
    "bool",
    "bytes",
    "double",
    "duration",
    "dyn",
    "int",
    "list",
    "map",
    "null_type",
    "string",
    "timestamp",
    "type",
    "uint",
];

/// A compile-time constant recorded in a variable reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstantValue {
    Literal(LiteralValue),
    Enum { type_name: String, value: i32 },
}

/// What the checker resolved a node to.
///
/// Exactly one reference is recorded per resolved `Ident`, `Select`, and
/// `Call` node: either the fully-qualified variable (with the compile-time
/// value for constants) or the surviving function overloads in declaration
/// order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reference {
    Variable {
        name: String,
        constant: Option<ConstantValue>,
    },
    Function {
        overload_ids: Vec<String>,
    },
}

/// A checked AST: the (possibly rewritten) expression plus the annotation
/// tables the planner consumes.
///
/// The only rewrites are resolution artifacts: receiver calls on namespace
/// idents become global calls on the qualified name, and struct type names
/// are replaced by their fully-resolved form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckedAst {
    pub ast: Ast,
    pub output_type: CelType,
    pub type_map: AHashMap<ExprId, CelType>,
    pub ref_map: AHashMap<ExprId, Reference>,
}

impl CheckedAst {
    /// Serializes the checked AST (with its annotations) for caching.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

/// Result of a check pass. When `diagnostics` is non-empty the output type
/// is `*error*` and the checked AST must not be planned.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub checked: CheckedAst,
    pub diagnostics: Vec<CheckError>,
}

impl CheckResult {
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Type-checks an AST against an environment.
pub fn check(ast: &Ast, env: &Env) -> CheckResult {
    let mut checker = Checker {
        env,
        type_map: AHashMap::new(),
        ref_map: AHashMap::new(),
        diagnostics: Vec::new(),
        scopes: Vec::new(),
    };
    let mut expr = ast.expr.clone();
    let mut output_type = checker.check_expr(&mut expr);
    if !checker.diagnostics.is_empty() {
        output_type = CelType::Error;
    }
    CheckResult {
        checked: CheckedAst {
            ast: Ast {
                expr,
                source_info: ast.source_info.clone(),
            },
            output_type,
            type_map: checker.type_map,
            ref_map: checker.ref_map,
        },
        diagnostics: checker.diagnostics,
    }
}

struct Checker<'a> {
    env: &'a Env,
    type_map: AHashMap<ExprId, CelType>,
    ref_map: AHashMap<ExprId, Reference>,
    diagnostics: Vec<CheckError>,
    /// Comprehension bindings, innermost last.
    scopes: Vec<AHashMap<String, CelType>>,
}

impl Checker<'_> {
    fn error(&mut self, id: ExprId, message: impl Into<String>) -> CelType {
        self.diagnostics.push(CheckError::new(message, id));
        CelType::Error
    }

    fn record(&mut self, id: ExprId, ty: CelType) -> CelType {
        self.type_map.insert(id, ty.clone());
        ty
    }

    fn lookup_scope(&self, name: &str) -> Option<&CelType> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn check_expr(&mut self, expr: &mut Expr) -> CelType {
        let id = expr.id;
        let ty = match &mut expr.kind {
            ExprKind::Literal(lit) => literal_type(lit),
            ExprKind::Ident(_) => {
                let ExprKind::Ident(name) = &expr.kind else { unreachable!() };
                let name = name.clone();
                self.check_ident(id, &name)
            }
            ExprKind::Select { .. } => self.check_select(expr),
            ExprKind::Call { .. } => self.check_call(expr),
            ExprKind::List { .. } => self.check_list(expr),
            ExprKind::Map { .. } => self.check_map(expr),
            ExprKind::Struct { .. } => self.check_struct(expr),
            ExprKind::Comprehension(_) => self.check_comprehension(expr),
            ExprKind::Unspecified => CelType::Error,
        };
        self.record(id, ty)
    }

    fn check_ident(&mut self, id: ExprId, name: &str) -> CelType {
        if let Some(ty) = self.lookup_scope(name) {
            let ty = ty.clone();
            self.ref_map.insert(
                id,
                Reference::Variable {
                    name: name.to_owned(),
                    constant: None,
                },
            );
            return ty;
        }
        for candidate in self.env.resolution_candidates(name) {
            if let Some(reference) = self.resolve_name(&candidate) {
                let (ty, reference) = reference;
                self.ref_map.insert(id, reference);
                return ty;
            }
        }
        self.error(
            id,
            format!("undeclared reference to '{name}' (in container '{}')", self.env.container()),
        )
    }

    /// Resolves one fully-qualified candidate name against the environment:
    /// variables, constants, builtin type names, and provider types.
    fn resolve_name(&self, name: &str) -> Option<(CelType, Reference)> {
        if let Some(ty) = self.env.find_variable(name) {
            return Some((
                ty.clone(),
                Reference::Variable {
                    name: name.to_owned(),
                    constant: None,
                },
            ));
        }
        if let Some((ty, value)) = self.env.find_constant(name) {
            return Some((
                ty.clone(),
                Reference::Variable {
                    name: name.to_owned(),
                    constant: Some(ConstantValue::Literal(value.clone())),
                },
            ));
        }
        if TYPE_NAMES.contains(&name) {
            return Some((
                CelType::Type,
                Reference::Variable {
                    name: name.to_owned(),
                    constant: None,
                },
            ));
        }
        if self.env.provider().find_struct_type(name).is_some() || self.env.provider().find_enum_type(name).is_some() {
            return Some((
                CelType::Type,
                Reference::Variable {
                    name: name.to_owned(),
                    constant: None,
                },
            ));
        }
        // Trailing segment may be an enum constant of a provider enum.
        if let Some((enum_name, value_name)) = name.rsplit_once('.')
            && let Some(value) = self.env.provider().find_enum_value(enum_name, value_name)
        {
            let (ty, constant) = if self.env.enums_as_ints() {
                (CelType::Int, ConstantValue::Literal(LiteralValue::Int(i64::from(value))))
            } else {
                (
                    CelType::Opaque(enum_name.to_owned()),
                    ConstantValue::Enum {
                        type_name: enum_name.to_owned(),
                        value,
                    },
                )
            };
            return Some((
                ty,
                Reference::Variable {
                    name: name.to_owned(),
                    constant: Some(constant),
                },
            ));
        }
        None
    }

    fn check_select(&mut self, expr: &mut Expr) -> CelType {
        let id = expr.id;
        // A pure select chain may be a qualified name (enum constant,
        // dotted variable); absolute resolution wins over field selection.
        if let ExprKind::Select { test_only: false, .. } = &expr.kind
            && let Some(qualified) = macros::select_chain_name(expr)
            && self.lookup_scope(root_ident(expr)).is_none()
        {
            for candidate in self.env.resolution_candidates(&qualified) {
                if let Some((ty, reference)) = self.resolve_name(&candidate) {
                    self.ref_map.insert(id, reference);
                    return ty;
                }
            }
        }
        let ExprKind::Select {
            operand,
            field,
            test_only,
        } = &mut expr.kind
        else {
            unreachable!()
        };
        let test_only = *test_only;
        let field = field.clone();
        let operand_type = self.check_expr(operand);
        let result = match &operand_type {
            CelType::Map(_, value_ty) => value_ty.as_ref().clone(),
            CelType::Struct(struct_name) => match self.env.provider().find_field(struct_name, &field) {
                Some(info) => info.ty,
                None => {
                    return self.error(id, format!("undefined field '{field}' in struct '{struct_name}'"));
                }
            },
            CelType::Dyn | CelType::Error => CelType::Dyn,
            other => {
                return self.error(id, format!("type '{other}' does not support field selection"));
            }
        };
        if test_only { CelType::Bool } else { result }
    }

    fn check_call(&mut self, expr: &mut Expr) -> CelType {
        let id = expr.id;
        // Rewrite `ns.f(args)` into a global call on the qualified name when
        // such a function is declared (e.g. `sets.contains`, `optional.of`).
        let rewrite = {
            let ExprKind::Call { function, target, .. } = &expr.kind else {
                unreachable!()
            };
            target
                .as_deref()
                .and_then(macros::select_chain_name)
                .filter(|chain| self.lookup_scope(root_name(chain)).is_none())
                .and_then(|chain| {
                    let qualified = format!("{chain}.{function}");
                    self.env.resolution_candidates(&qualified).into_iter().find(|candidate| {
                        self.env.functions().contains(candidate)
                            || self.env.provider().find_enum_type(candidate).is_some()
                    })
                })
        };
        if let Some(qualified) = rewrite {
            let ExprKind::Call { function, target, .. } = &mut expr.kind else {
                unreachable!()
            };
            *function = qualified;
            *target = None;
        }

        let ExprKind::Call { function, target, args } = &mut expr.kind else {
            unreachable!()
        };
        let function = function.clone();
        let receiver_style = target.is_some();
        let mut arg_types = Vec::with_capacity(args.len() + 1);
        if let Some(target) = target {
            arg_types.push(self.check_expr(target));
        }
        for arg in args.iter_mut() {
            arg_types.push(self.check_expr(arg));
        }

        let Some(decl) = self.env.functions().find(&function) else {
            // A call on an enum type name is a conversion from int or from
            // the value name.
            if !receiver_style
                && arg_types.len() == 1
                && let Some(resolved) = self
                    .env
                    .resolution_candidates(&function)
                    .into_iter()
                    .find(|candidate| self.env.provider().find_enum_type(candidate).is_some())
            {
                let convertible = matches!(
                    arg_types[0],
                    CelType::Int | CelType::String | CelType::Dyn | CelType::Error
                ) || arg_types[0] == CelType::Opaque(resolved.clone());
                if !convertible {
                    return self.error(
                        id,
                        format!("no matching overload for '{resolved}' applied to ({})", arg_types[0]),
                    );
                }
                self.ref_map.insert(
                    id,
                    Reference::Function {
                        overload_ids: vec![format!("{resolved}_conversion")],
                    },
                );
                return if self.env.enums_as_ints() {
                    CelType::Int
                } else {
                    CelType::Opaque(resolved)
                };
            }
            return self.error(
                id,
                format!("undeclared reference to '{function}' (in container '{}')", self.env.container()),
            );
        };

        let mut surviving_ids = Vec::new();
        let mut result_type: Option<CelType> = None;
        for overload in &decl.overloads {
            if overload.receiver_style != receiver_style || overload.params.len() != arg_types.len() {
                continue;
            }
            let mut sub = Substitution::new();
            if overload
                .params
                .iter()
                .zip(&arg_types)
                .all(|(param, arg)| sub.unify(param, arg))
            {
                surviving_ids.push(overload.id.clone());
                let resolved = sub.resolve(&overload.result);
                result_type = Some(match result_type {
                    Some(current) => join(&current, &resolved),
                    None => resolved,
                });
            }
        }

        // Equality is total across numeric kinds (and against null) even
        // though the declared overload is homogeneous.
        if surviving_ids.is_empty()
            && matches!(function.as_str(), operators::EQUALS | operators::NOT_EQUALS)
            && (arg_types.iter().all(is_numeric) || arg_types.iter().any(|t| matches!(t, CelType::Null)))
        {
            surviving_ids.push(decl.overloads[0].id.clone());
            result_type = Some(CelType::Bool);
        }

        // Enum values convert to int.
        if surviving_ids.is_empty()
            && function == "int"
            && matches!(arg_types.as_slice(), [CelType::Opaque(_)])
        {
            surviving_ids.push("int64_to_int64".to_owned());
            result_type = Some(CelType::Int);
        }

        if surviving_ids.is_empty() {
            let rendered: Vec<String> = arg_types.iter().map(ToString::to_string).collect();
            return self.error(
                id,
                format!("no matching overload for '{function}' applied to ({})", rendered.join(", ")),
            );
        }
        self.ref_map.insert(
            id,
            Reference::Function {
                overload_ids: surviving_ids,
            },
        );
        result_type.expect("at least one overload survived")
    }

    fn check_list(&mut self, expr: &mut Expr) -> CelType {
        let ExprKind::List {
            elements,
            optional_indices,
        } = &mut expr.kind
        else {
            unreachable!()
        };
        let optional_indices = optional_indices.clone();
        let mut element_type: Option<CelType> = None;
        let mut optional_errors = Vec::new();
        for (i, element) in elements.iter_mut().enumerate() {
            let mut ty = self.check_expr(element);
            if optional_indices.contains(&(i as u32)) {
                ty = match ty {
                    CelType::Optional(inner) => *inner,
                    CelType::Dyn | CelType::Error => CelType::Dyn,
                    other => {
                        optional_errors.push((element.id, other));
                        CelType::Dyn
                    }
                };
            }
            element_type = Some(match element_type {
                Some(current) => join(&current, &ty),
                None => ty,
            });
        }
        for (element_id, ty) in optional_errors {
            self.error(element_id, format!("expected optional element, found '{ty}'"));
        }
        CelType::list_of(element_type.unwrap_or(CelType::Dyn))
    }

    fn check_map(&mut self, expr: &mut Expr) -> CelType {
        let ExprKind::Map { entries } = &mut expr.kind else {
            unreachable!()
        };
        let mut key_type: Option<CelType> = None;
        let mut value_type: Option<CelType> = None;
        let mut problems: Vec<(ExprId, String)> = Vec::new();
        for entry in entries.iter_mut() {
            let kt = self.check_expr(&mut entry.key);
            if !is_valid_key_type(&kt) {
                problems.push((entry.key.id, format!("unsupported map key type '{kt}'")));
            }
            let mut vt = self.check_expr(&mut entry.value);
            if entry.optional {
                vt = match vt {
                    CelType::Optional(inner) => *inner,
                    CelType::Dyn | CelType::Error => CelType::Dyn,
                    other => {
                        problems.push((entry.value.id, format!("expected optional value, found '{other}'")));
                        CelType::Dyn
                    }
                };
            }
            key_type = Some(match key_type {
                Some(current) => join(&current, &kt),
                None => kt,
            });
            value_type = Some(match value_type {
                Some(current) => join(&current, &vt),
                None => vt,
            });
        }
        for (problem_id, message) in problems {
            self.error(problem_id, message);
        }
        CelType::map_of(key_type.unwrap_or(CelType::Dyn), value_type.unwrap_or(CelType::Dyn))
    }

    fn check_struct(&mut self, expr: &mut Expr) -> CelType {
        let id = expr.id;
        let resolved = {
            let ExprKind::Struct { type_name, .. } = &expr.kind else {
                unreachable!()
            };
            self.env
                .resolution_candidates(type_name)
                .into_iter()
                .find(|candidate| self.env.provider().find_struct_type(candidate).is_some())
        };
        let ExprKind::Struct { type_name, fields } = &mut expr.kind else {
            unreachable!()
        };
        let Some(resolved_name) = resolved else {
            let name = type_name.clone();
            return self.error(id, format!("undefined struct type '{name}'"));
        };
        // Record the resolved name so the evaluator skips container logic.
        *type_name = resolved_name.clone();
        let mut problems: Vec<(ExprId, String)> = Vec::new();
        for field in fields.iter_mut() {
            let value_type = self.check_expr(&mut field.value);
            let Some(info) = self.env.provider().find_field(&resolved_name, &field.name) else {
                problems.push((
                    field.value.id,
                    format!("undefined field '{}' in struct '{resolved_name}'", field.name),
                ));
                continue;
            };
            let declared = if field.optional {
                CelType::optional_of(info.ty.clone())
            } else {
                info.ty.clone()
            };
            let wrapper_null = matches!(value_type, CelType::Null)
                && crate::provider::WRAPPER_TYPES.contains(&info.proto_type.as_str());
            if !wrapper_null && !is_assignable(&declared, &value_type) {
                problems.push((
                    field.value.id,
                    format!(
                        "expected type '{declared}' for field '{}', found '{value_type}'",
                        field.name
                    ),
                ));
            }
        }
        for (problem_id, message) in problems {
            self.error(problem_id, message);
        }
        self.ref_map.insert(
            id,
            Reference::Variable {
                name: resolved_name.clone(),
                constant: None,
            },
        );
        CelType::Struct(resolved_name)
    }

    fn check_comprehension(&mut self, expr: &mut Expr) -> CelType {
        let ExprKind::Comprehension(c) = &mut expr.kind else {
            unreachable!()
        };
        let range_type = self.check_expr(&mut c.iter_range);
        let (var1_type, var2_type) = match &range_type {
            CelType::List(element) => {
                if c.iter_var2.is_some() {
                    (CelType::Int, Some(element.as_ref().clone()))
                } else {
                    (element.as_ref().clone(), None)
                }
            }
            CelType::Map(key, value) => {
                if c.iter_var2.is_some() {
                    (key.as_ref().clone(), Some(value.as_ref().clone()))
                } else {
                    (key.as_ref().clone(), None)
                }
            }
            CelType::Dyn | CelType::Error => (CelType::Dyn, c.iter_var2.as_ref().map(|_| CelType::Dyn)),
            other => {
                let message = format!("expression of type '{other}' cannot be the range of a comprehension");
                let range_id = c.iter_range.id;
                self.diagnostics.push(CheckError::new(message, range_id));
                (CelType::Dyn, c.iter_var2.as_ref().map(|_| CelType::Dyn))
            }
        };

        let mut accu_type = self.check_expr(&mut c.accu_init);
        // The loop step refines the accumulator monotonically; one re-check
        // after a widening join reaches the fixed point (dyn absorbs).
        let diagnostics_before = self.diagnostics.len();
        for _ in 0..2 {
            // Re-checking after a widening join must not duplicate
            // first-pass diagnostics.
            self.diagnostics.truncate(diagnostics_before);
            let mut scope = AHashMap::new();
            scope.insert(c.accu_var.clone(), accu_type.clone());
            scope.insert(c.iter_var.clone(), var1_type.clone());
            if let (Some(var2), Some(var2_type)) = (&c.iter_var2, &var2_type) {
                scope.insert(var2.clone(), var2_type.clone());
            }
            self.scopes.push(scope);
            let condition_type = self.check_expr(&mut c.loop_condition);
            if !matches!(condition_type, CelType::Bool | CelType::Dyn | CelType::Error) {
                let condition_id = c.loop_condition.id;
                self.diagnostics
                    .push(CheckError::new("comprehension condition must be bool", condition_id));
            }
            let step_type = self.check_expr(&mut c.loop_step);
            self.scopes.pop();
            let widened = join(&accu_type, &step_type);
            if widened == accu_type {
                break;
            }
            accu_type = widened;
        }

        let mut scope = AHashMap::new();
        scope.insert(c.accu_var.clone(), accu_type);
        self.scopes.push(scope);
        let result_type = self.check_expr(&mut c.result);
        self.scopes.pop();
        result_type
    }
}

fn literal_type(lit: &LiteralValue) -> CelType {
    match lit {
        LiteralValue::Null => CelType::Null,
        LiteralValue::Bool(_) => CelType::Bool,
        LiteralValue::Int(_) => CelType::Int,
        LiteralValue::Uint(_) => CelType::Uint,
        LiteralValue::Double(_) => CelType::Double,
        LiteralValue::String(_) => CelType::String,
        LiteralValue::Bytes(_) => CelType::Bytes,
    }
}

fn is_numeric(ty: &CelType) -> bool {
    matches!(ty, CelType::Int | CelType::Uint | CelType::Double)
}

fn is_valid_key_type(ty: &CelType) -> bool {
    matches!(
        ty,
        CelType::Bool | CelType::Int | CelType::Uint | CelType::String | CelType::Dyn | CelType::Error | CelType::TypeParam(_)
    )
}

/// The leftmost identifier of a select chain, used to decide whether a
/// comprehension binding shadows qualified-name resolution.
fn root_ident(expr: &Expr) -> &str {
    match &expr.kind {
        ExprKind::Ident(name) => name,
        ExprKind::Select { operand, .. } => root_ident(operand),
        _ => "",
    }
}

fn root_name(chain: &str) -> &str {
    chain.split('.').next().unwrap_or(chain)
}
