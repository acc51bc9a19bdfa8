#![doc = include_str!("../../../README.md")]

mod activation;
mod adapter;
mod ast;
mod checker;
mod env;
mod error;
mod interp;
mod macros;
mod parse;
mod planner;
mod provider;
mod stdlib;
mod types;
mod value;

pub use crate::{
    activation::{Activation, EmptyActivation, JsonActivation, MapActivation, MutableActivation},
    adapter::{json_to_value, value_to_json},
    ast::{Ast, ComprehensionExpr, Expr, ExprId, ExprKind, LiteralValue, MapEntry, SourceInfo, StructField},
    checker::{CheckResult, CheckedAst, ConstantValue, Reference, check},
    env::{CompileError, Env, EnvBuilder, EvalOutcome, Program},
    error::{CheckError, ParseError, RuntimeError, RuntimeErrorKind, SourceLocation},
    interp::{EvalContext, Interpretable},
    macros::{ExprFactory, MacroExpander, MacroRegistry},
    parse::{parse, parse_with_macros},
    provider::{DeclaredStructProvider, FieldInfo, TypeProvider},
    stdlib::{CelFn, FunctionDecl, FunctionRegistry, Overload},
    types::CelType,
    value::{MapKey, MapValue, StructValue, UnknownSet, Value, cel_compare, cel_equals},
};
