use std::fmt::Debug;

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::types::CelType;

/// Well-known wrapper type names; wrapper-typed fields accept `null` and
/// coerce to their scalar forms.
pub const WRAPPER_TYPES: &[&str] = &[
    "google.protobuf.BoolValue",
    "google.protobuf.Int32Value",
    "google.protobuf.Int64Value",
    "google.protobuf.UInt32Value",
    "google.protobuf.UInt64Value",
    "google.protobuf.FloatValue",
    "google.protobuf.DoubleValue",
    "google.protobuf.StringValue",
    "google.protobuf.BytesValue",
];

/// What the checker and evaluator need to know about one struct field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    /// The field's CEL type.
    pub ty: CelType,
    /// Fully-qualified proto type name, e.g. `google.protobuf.Int32Value`.
    /// Drives wrapper coercion and range checks during struct creation.
    pub proto_type: String,
    /// True when the field belongs to a `oneof` group; such fields are never
    /// elided even when set to their default.
    pub is_oneof: bool,
    /// True when the field tracks explicit presence (proto3 `optional`,
    /// message fields, wrappers).
    pub has_presence: bool,
}

impl FieldInfo {
    pub fn new(ty: CelType) -> Self {
        Self {
            ty,
            proto_type: String::new(),
            is_oneof: false,
            has_presence: false,
        }
    }

    #[must_use]
    pub fn with_proto_type(mut self, proto_type: impl Into<String>) -> Self {
        self.proto_type = proto_type.into();
        self
    }

    #[must_use]
    pub fn oneof(mut self) -> Self {
        self.is_oneof = true;
        self
    }

    #[must_use]
    pub fn with_presence(mut self) -> Self {
        self.has_presence = true;
        self
    }
}

/// Capability describing user-declared struct and enum types.
///
/// The engine never introspects schemas itself; hosts targeting proto
/// descriptors implement this trait over their descriptor pool.
pub trait TypeProvider: Debug + Send + Sync {
    /// Resolves a struct type by fully-qualified name.
    fn find_struct_type(&self, name: &str) -> Option<CelType>;

    /// Resolves one field of a known struct type.
    fn find_field(&self, struct_name: &str, field: &str) -> Option<FieldInfo>;

    /// Resolves an enum type by fully-qualified name.
    fn find_enum_type(&self, name: &str) -> Option<CelType>;

    /// Resolves a named enum constant, e.g. (`acme.Severity`, `HIGH`).
    fn find_enum_value(&self, type_name: &str, value_name: &str) -> Option<i32>;
}

/// A provider over explicit declarations, with no schema behind it.
///
/// Used by tests and by hosts that declare their struct shapes directly
/// instead of supplying proto descriptors.
#[derive(Debug, Clone, Default)]
pub struct DeclaredStructProvider {
    structs: AHashMap<String, IndexMap<String, FieldInfo>>,
    enums: AHashMap<String, IndexMap<String, i32>>,
}

impl DeclaredStructProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a struct type with its fields, replacing any prior
    /// declaration of the same name.
    pub fn declare_struct(&mut self, name: impl Into<String>, fields: impl IntoIterator<Item = (String, FieldInfo)>) {
        self.structs.insert(name.into(), fields.into_iter().collect());
    }

    /// Declares an enum type with its named values.
    pub fn declare_enum(&mut self, name: impl Into<String>, values: impl IntoIterator<Item = (String, i32)>) {
        self.enums.insert(name.into(), values.into_iter().collect());
    }

    pub fn field_names(&self, struct_name: &str) -> Option<impl Iterator<Item = &str>> {
        self.structs.get(struct_name).map(|fields| fields.keys().map(String::as_str))
    }
}

impl TypeProvider for DeclaredStructProvider {
    fn find_struct_type(&self, name: &str) -> Option<CelType> {
        self.structs.contains_key(name).then(|| CelType::Struct(name.to_owned()))
    }

    fn find_field(&self, struct_name: &str, field: &str) -> Option<FieldInfo> {
        self.structs.get(struct_name)?.get(field).cloned()
    }

    fn find_enum_type(&self, name: &str) -> Option<CelType> {
        self.enums.contains_key(name).then(|| CelType::Opaque(name.to_owned()))
    }

    fn find_enum_value(&self, type_name: &str, value_name: &str) -> Option<i32> {
        self.enums.get(type_name)?.get(value_name).copied()
    }
}
