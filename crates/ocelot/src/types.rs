use std::fmt::{self, Display};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// The CEL type lattice.
///
/// A finite tagged union with structural equality. `Dyn` is compatible with
/// everything; `TypeParam` is a free variable appearing only in function
/// declarations and is bound per call site by unification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CelType {
    Dyn,
    Null,
    Bool,
    Int,
    Uint,
    Double,
    String,
    Bytes,
    Duration,
    Timestamp,
    /// The type of type values, e.g. `type(1) == int`.
    Type,
    /// Produced for expressions that failed to check.
    Error,
    List(Box<CelType>),
    Map(Box<CelType>, Box<CelType>),
    Optional(Box<CelType>),
    /// A free type parameter from a function declaration.
    TypeParam(String),
    /// A runtime-named opaque type (enums, host abstractions).
    Opaque(String),
    /// A struct (message) type known to the `TypeProvider`.
    Struct(String),
}

impl CelType {
    pub fn list_of(element: Self) -> Self {
        Self::List(Box::new(element))
    }

    pub fn map_of(key: Self, value: Self) -> Self {
        Self::Map(Box::new(key), Box::new(value))
    }

    pub fn optional_of(inner: Self) -> Self {
        Self::Optional(Box::new(inner))
    }

    pub fn type_param(name: impl Into<String>) -> Self {
        Self::TypeParam(name.into())
    }

    pub fn is_dyn(&self) -> bool {
        matches!(self, Self::Dyn)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// True if the type contains no free type parameters.
    pub fn is_ground(&self) -> bool {
        match self {
            Self::TypeParam(_) => false,
            Self::List(e) | Self::Optional(e) => e.is_ground(),
            Self::Map(k, v) => k.is_ground() && v.is_ground(),
            _ => true,
        }
    }
}

impl Display for CelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dyn => write!(f, "dyn"),
            Self::Null => write!(f, "null_type"),
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Uint => write!(f, "uint"),
            Self::Double => write!(f, "double"),
            Self::String => write!(f, "string"),
            Self::Bytes => write!(f, "bytes"),
            Self::Duration => write!(f, "duration"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::Type => write!(f, "type"),
            Self::Error => write!(f, "*error*"),
            Self::List(e) => write!(f, "list({e})"),
            Self::Map(k, v) => write!(f, "map({k}, {v})"),
            Self::Optional(t) => write!(f, "optional({t})"),
            Self::TypeParam(name) => write!(f, "{name}"),
            Self::Opaque(name) | Self::Struct(name) => write!(f, "{name}"),
        }
    }
}

/// A per-call-site binding of type parameter names to types.
///
/// Each overload candidate gets a fresh substitution; bindings must stay
/// consistent across every occurrence of a parameter within one call.
#[derive(Debug, Clone, Default)]
pub struct Substitution {
    bindings: AHashMap<String, CelType>,
}

impl Substitution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&CelType> {
        self.bindings.get(name)
    }

    /// Resolves a type under this substitution, chasing parameter bindings
    /// recursively. Unbound parameters resolve to `Dyn`.
    pub fn resolve(&self, ty: &CelType) -> CelType {
        match ty {
            CelType::TypeParam(name) => match self.bindings.get(name) {
                Some(bound) => self.resolve(bound),
                None => CelType::Dyn,
            },
            CelType::List(e) => CelType::list_of(self.resolve(e)),
            CelType::Map(k, v) => CelType::map_of(self.resolve(k), self.resolve(v)),
            CelType::Optional(t) => CelType::optional_of(self.resolve(t)),
            other => other.clone(),
        }
    }

    /// Unifies an argument type against a parameter type, extending the
    /// substitution on success.
    ///
    /// Rules: identical tags unify; `dyn` unifies with anything (the more
    /// specific side is kept for parameters); a type parameter binds once
    /// and must match on later occurrences; aggregates unify pairwise.
    pub fn unify(&mut self, param: &CelType, arg: &CelType) -> bool {
        match (param, arg) {
            (CelType::TypeParam(name), arg) => match self.bindings.get(name).cloned() {
                Some(bound) => self.unify(&bound, arg),
                None => {
                    self.bindings.insert(name.clone(), arg.clone());
                    true
                }
            },
            (param, CelType::TypeParam(name)) => match self.bindings.get(name).cloned() {
                Some(bound) => self.unify(param, &bound),
                None => {
                    self.bindings.insert(name.clone(), param.clone());
                    true
                }
            },
            (CelType::Dyn, _) | (_, CelType::Dyn) => true,
            (CelType::Error, _) | (_, CelType::Error) => true,
            (CelType::List(pe), CelType::List(ae)) => self.unify(pe, ae),
            (CelType::Map(pk, pv), CelType::Map(ak, av)) => self.unify(pk, ak) && self.unify(pv, av),
            (CelType::Optional(pt), CelType::Optional(at)) => self.unify(pt, at),
            (a, b) => a == b,
        }
    }
}

/// Least upper bound of two types: equal types join to themselves,
/// same-shape aggregates join structurally, and `dyn` absorbs the rest.
pub fn join(left: &CelType, right: &CelType) -> CelType {
    match (left, right) {
        (a, b) if a == b => a.clone(),
        (CelType::Dyn, _) | (_, CelType::Dyn) => CelType::Dyn,
        (CelType::Error, other) | (other, CelType::Error) => other.clone(),
        (CelType::List(a), CelType::List(b)) => CelType::list_of(join(a, b)),
        (CelType::Map(ak, av), CelType::Map(bk, bv)) => CelType::map_of(join(ak, bk), join(av, bv)),
        (CelType::Optional(a), CelType::Optional(b)) => CelType::optional_of(join(a, b)),
        _ => CelType::Dyn,
    }
}

/// Whether a value of `actual` may initialize a slot declared `declared`.
///
/// Beyond unification this admits `null` for struct, wrapper, and optional
/// slots, matching proto assignability.
pub fn is_assignable(declared: &CelType, actual: &CelType) -> bool {
    if matches!(actual, CelType::Null)
        && matches!(
            declared,
            CelType::Struct(_) | CelType::Optional(_) | CelType::Dyn | CelType::Null
        )
    {
        return true;
    }
    let mut sub = Substitution::new();
    sub.unify(declared, actual)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_param_binds_consistently() {
        let mut sub = Substitution::new();
        assert!(sub.unify(&CelType::type_param("T"), &CelType::Int));
        assert!(sub.unify(&CelType::type_param("T"), &CelType::Int));
        assert!(!sub.unify(&CelType::type_param("T"), &CelType::String));
    }

    #[test]
    fn list_unifies_pairwise() {
        let mut sub = Substitution::new();
        let param = CelType::list_of(CelType::type_param("E"));
        assert!(sub.unify(&param, &CelType::list_of(CelType::Uint)));
        assert_eq!(sub.resolve(&CelType::type_param("E")), CelType::Uint);
    }

    #[test]
    fn dyn_absorbs_in_join() {
        assert_eq!(join(&CelType::Int, &CelType::Int), CelType::Int);
        assert_eq!(join(&CelType::Int, &CelType::String), CelType::Dyn);
        assert_eq!(
            join(&CelType::list_of(CelType::Int), &CelType::list_of(CelType::Int)),
            CelType::list_of(CelType::Int)
        );
    }

    #[test]
    fn unbound_param_resolves_to_dyn() {
        let sub = Substitution::new();
        assert_eq!(sub.resolve(&CelType::type_param("T")), CelType::Dyn);
        assert_eq!(
            sub.resolve(&CelType::list_of(CelType::type_param("T"))),
            CelType::list_of(CelType::Dyn)
        );
    }

    #[test]
    fn null_assignable_to_message_slots() {
        assert!(is_assignable(&CelType::Struct("a.B".into()), &CelType::Null));
        assert!(!is_assignable(&CelType::Int, &CelType::Null));
    }
}
