use std::{
    fmt::{self, Display},
    sync::Arc,
};

use ahash::AHashMap;

use crate::{
    activation::{Activation, MapActivation},
    ast::{Ast, LiteralValue, SourceInfo},
    checker::{self, CheckedAst},
    error::{CheckError, ParseError, RuntimeError},
    interp::{EvalContext, Interpretable},
    macros::MacroRegistry,
    parse,
    planner,
    provider::{DeclaredStructProvider, TypeProvider},
    stdlib::{FunctionDecl, FunctionRegistry},
    types::CelType,
    value::Value,
};

/// A compilation failure: parse errors or checker diagnostics, formatted as
/// `line:column: message` lines.
#[derive(Debug, Clone)]
pub struct CompileError {
    issues: Vec<String>,
}

impl CompileError {
    fn from_parse(errors: &[ParseError], source: &str) -> Self {
        let info = SourceInfo::new(source);
        Self {
            issues: errors
                .iter()
                .map(|e| format!("{}: {e}", info.location_of_offset(e.offset())))
                .collect(),
        }
    }

    fn from_check(errors: &[CheckError], info: &SourceInfo) -> Self {
        Self {
            issues: errors
                .iter()
                .map(|e| match info.location(e.expr_id) {
                    Some(loc) => format!("{loc}: {e}"),
                    None => e.to_string(),
                })
                .collect(),
        }
    }

    pub fn issues(&self) -> &[String] {
        &self.issues
    }
}

impl Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {}

/// An immutable compilation environment: declarations, functions, macros,
/// the type provider, and resolution configuration.
///
/// Construct once with [`Env::builder`], then compile any number of
/// expressions. An `Env` (and any [`Program`] it produces) is safe to share
/// across threads for read-only evaluation.
#[derive(Debug, Clone)]
pub struct Env {
    variables: AHashMap<String, CelType>,
    constants: AHashMap<String, (CelType, LiteralValue)>,
    functions: FunctionRegistry,
    provider: Arc<dyn TypeProvider>,
    container: String,
    check_enabled: bool,
    enums_as_ints: bool,
    macros: Arc<MacroRegistry>,
}

impl Env {
    pub fn builder() -> EnvBuilder {
        EnvBuilder::default()
    }

    /// An environment with only the standard library and macros.
    pub fn standard() -> Self {
        Self::builder().build()
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn enums_as_ints(&self) -> bool {
        self.enums_as_ints
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn provider(&self) -> &dyn TypeProvider {
        self.provider.as_ref()
    }

    pub fn find_variable(&self, name: &str) -> Option<&CelType> {
        self.variables.get(name)
    }

    pub fn find_constant(&self, name: &str) -> Option<(&CelType, &LiteralValue)> {
        self.constants.get(name).map(|(ty, value)| (ty, value))
    }

    /// The qualified-name resolution order for a simple name under this
    /// environment's container: `a.b.name`, `a.name`, `name` for container
    /// `a.b`. A leading dot pins absolute resolution.
    pub fn resolution_candidates(&self, name: &str) -> Vec<String> {
        if let Some(absolute) = name.strip_prefix('.') {
            return vec![absolute.to_owned()];
        }
        let mut out = Vec::new();
        let mut prefix = self.container.as_str();
        while !prefix.is_empty() {
            out.push(format!("{prefix}.{name}"));
            prefix = match prefix.rfind('.') {
                Some(idx) => &prefix[..idx],
                None => "",
            };
        }
        out.push(name.to_owned());
        out
    }

    /// Parses an expression to an AST, expanding macros.
    pub fn parse(&self, source: &str) -> Result<Ast, CompileError> {
        parse::parse_with_macros(source, &self.macros).map_err(|errors| CompileError::from_parse(&errors, source))
    }

    /// Type-checks a parsed AST.
    pub fn check(&self, ast: &Ast) -> Result<CheckedAst, CompileError> {
        let result = checker::check(ast, self);
        if result.is_ok() {
            Ok(result.checked)
        } else {
            Err(CompileError::from_check(&result.diagnostics, &ast.source_info))
        }
    }

    /// Parses, checks (unless checking is disabled), and plans in one step.
    pub fn compile(&self, source: &str) -> Result<Program, CompileError> {
        let ast = self.parse(source)?;
        if self.check_enabled {
            let checked = self.check(&ast)?;
            Ok(self.plan_checked(&checked))
        } else {
            Ok(self.plan_unchecked(&ast))
        }
    }

    /// Plans a checked AST into an executable program.
    pub fn plan_checked(&self, checked: &CheckedAst) -> Program {
        Program {
            plan: Arc::new(planner::plan(checked, self)),
            source_info: Arc::new(checked.ast.source_info.clone()),
            provider: Arc::clone(&self.provider),
            enums_as_ints: self.enums_as_ints,
        }
    }

    /// Plans an AST without type checking; dispatch falls back to argument
    /// kinds at runtime.
    pub fn plan_unchecked(&self, ast: &Ast) -> Program {
        Program {
            plan: Arc::new(planner::plan_unchecked(ast, self)),
            source_info: Arc::new(ast.source_info.clone()),
            provider: Arc::clone(&self.provider),
            enums_as_ints: self.enums_as_ints,
        }
    }
}

/// Builder for [`Env`].
pub struct EnvBuilder {
    variables: AHashMap<String, CelType>,
    constants: AHashMap<String, (CelType, LiteralValue)>,
    functions: FunctionRegistry,
    provider: Arc<dyn TypeProvider>,
    container: String,
    check_enabled: bool,
    enums_as_ints: bool,
    macros: MacroRegistry,
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self {
            variables: AHashMap::new(),
            constants: AHashMap::new(),
            functions: FunctionRegistry::standard(),
            provider: Arc::new(DeclaredStructProvider::new()),
            container: String::new(),
            check_enabled: true,
            enums_as_ints: false,
            macros: MacroRegistry::standard(),
        }
    }
}

impl EnvBuilder {
    /// Declares a typed variable.
    #[must_use]
    pub fn variable(mut self, name: impl Into<String>, ty: CelType) -> Self {
        self.variables.insert(name.into(), ty);
        self
    }

    /// Declares a constant with its compile-time value.
    #[must_use]
    pub fn constant(mut self, name: impl Into<String>, ty: CelType, value: LiteralValue) -> Self {
        self.constants.insert(name.into(), (ty, value));
        self
    }

    /// Declares a function (or merges overloads into an existing one).
    #[must_use]
    pub fn function(mut self, decl: FunctionDecl) -> Self {
        self.functions.add(decl);
        self
    }

    /// Installs the struct/enum type provider.
    #[must_use]
    pub fn type_provider(mut self, provider: Arc<dyn TypeProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Sets the container prefix for qualified name resolution.
    #[must_use]
    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    /// Disables the type checker; programs are planned directly from the
    /// parsed AST.
    #[must_use]
    pub fn disable_type_checking(mut self) -> Self {
        self.check_enabled = false;
        self
    }

    /// Treats enum values as plain `int`s.
    #[must_use]
    pub fn enums_as_ints(mut self) -> Self {
        self.enums_as_ints = true;
        self
    }

    /// Registers an additional parse-time macro.
    #[must_use]
    pub fn macro_(mut self, name: &str, receiver_style: bool, arity: Option<usize>, expander: crate::macros::MacroExpander) -> Self {
        self.macros.register(name, receiver_style, arity, expander);
        self
    }

    pub fn build(self) -> Env {
        Env {
            variables: self.variables,
            constants: self.constants,
            functions: self.functions,
            provider: self.provider,
            container: self.container,
            check_enabled: self.check_enabled,
            enums_as_ints: self.enums_as_ints,
            macros: Arc::new(self.macros),
        }
    }
}

/// The outcome of one evaluation.
///
/// `value` always holds the produced value; when it is an error value,
/// `success` is false and `error` carries the formatted
/// `line:column: message` string.
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub value: Value,
    pub success: bool,
    pub error: Option<String>,
}

/// An executable expression: the planned evaluator tree plus everything
/// needed to run and to format failures.
///
/// Programs are immutable; concurrent evaluations need only distinct
/// activations.
#[derive(Debug, Clone)]
pub struct Program {
    plan: Arc<Interpretable>,
    source_info: Arc<SourceInfo>,
    provider: Arc<dyn TypeProvider>,
    enums_as_ints: bool,
}

impl Program {
    /// Evaluates against an activation.
    pub fn eval(&self, activation: &dyn Activation) -> EvalOutcome {
        let ctx = EvalContext {
            provider: self.provider.as_ref(),
            enums_as_ints: self.enums_as_ints,
        };
        let value = self.plan.eval(activation, &ctx);
        match &value {
            Value::Error(err) => {
                let error = Some(self.format_error(err));
                EvalOutcome {
                    value,
                    success: false,
                    error,
                }
            }
            _ => EvalOutcome {
                value,
                success: true,
                error: None,
            },
        }
    }

    /// Evaluates with variables given as `(name, value)` pairs.
    pub fn eval_with<'a>(&self, bindings: impl IntoIterator<Item = (&'a str, Value)>) -> EvalOutcome {
        let activation: MapActivation = bindings.into_iter().collect();
        self.eval(&activation)
    }

    /// Formats a runtime error as `line:column: message` when the
    /// originating node is known.
    pub fn format_error(&self, err: &RuntimeError) -> String {
        match err.expr_id.and_then(|id| self.source_info.location(id)) {
            Some(location) => format!("{location}: {err}"),
            None => err.to_string(),
        }
    }

    /// Static upper bound on evaluation cost, for hosts with budgets.
    pub fn cost(&self) -> u64 {
        self.plan.cost()
    }
}
