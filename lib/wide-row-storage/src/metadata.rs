//! Resolved per-type metadata.
//!
//! A [`TypeDescriptor`] is built once per persistent type (normally by the
//! `Persistent` derive) and cached in a [`DescriptorRegistry`]. Column
//! addresses and primary-key positions are resolved at build time so the
//! mapper never recomputes them per operation.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{CollectionKind, StorageError, TableSchema, Value};

/// Declared type of a persistent field, as seen by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
    /// Anything stored through the generic tagged encoding.
    Object,
    Collection(CollectionKind),
    Map,
}

impl FieldType {
    pub fn is_primitive(&self) -> bool {
        self.fixed_width().is_some()
    }

    /// Width in bytes of the fixed-width encoding, for primitives only.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            FieldType::Boolean | FieldType::Byte => Some(1),
            FieldType::Short => Some(2),
            FieldType::Char | FieldType::Int | FieldType::Float => Some(4),
            FieldType::Long | FieldType::Double => Some(8),
            _ => None,
        }
    }

    /// Container fields hold to-many relations when they carry a target.
    pub fn is_container(&self) -> bool {
        matches!(self, FieldType::Collection(_) | FieldType::Map)
    }

    /// Value a relation field reads back as when its column is absent.
    pub fn empty_value(&self) -> Value {
        match self {
            FieldType::Collection(kind) => Value::Collection(*kind, Vec::new()),
            FieldType::Map => Value::Map(Vec::new()),
            _ => Value::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RelationKind {
    #[default]
    None,
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

impl RelationKind {
    pub fn is_relation(&self) -> bool {
        !matches!(self, RelationKind::None)
    }
}

/// How the primary key is assigned when the object is first persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueStrategy {
    Sequence { initial_value: i64 },
    Uuid,
}

/// (family, qualifier) pair one field is stored under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnAddress {
    pub family: String,
    pub qualifier: String,
}

impl ColumnAddress {
    pub fn new(family: impl Into<String>, qualifier: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            qualifier: qualifier.into(),
        }
    }

    /// Resolve a field's column. The override is `family:qualifier`; an
    /// override without a colon only renames the qualifier.
    pub fn resolve(table: &str, field_name: &str, column_override: Option<&str>) -> Self {
        match column_override {
            Some(spec) => match spec.split_once(':') {
                Some((family, qualifier)) => Self::new(
                    if family.is_empty() { table } else { family },
                    if qualifier.is_empty() {
                        field_name
                    } else {
                        qualifier
                    },
                ),
                None => Self::new(table, spec),
            },
            None => Self::new(table, field_name),
        }
    }
}

impl fmt::Display for ColumnAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.qualifier)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub position: usize,
    pub field_type: FieldType,
    pub primary_key: bool,
    pub relation: RelationKind,
    /// Type name of the related object (map value type for map relations).
    pub target_type: Option<String>,
    /// Type name of related map keys, when the keys are persistent objects.
    pub key_target_type: Option<String>,
    pub cascade_delete: bool,
    pub column_override: Option<String>,
    pub value_strategy: Option<ValueStrategy>,
    pub column: ColumnAddress,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            column: ColumnAddress::new(String::new(), name.clone()),
            name,
            position: 0,
            field_type,
            primary_key: false,
            relation: RelationKind::None,
            target_type: None,
            key_target_type: None,
            cascade_delete: false,
            column_override: None,
            value_strategy: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn column(mut self, column_override: impl Into<String>) -> Self {
        self.column_override = Some(column_override.into());
        self
    }

    pub fn relation(mut self, kind: RelationKind) -> Self {
        self.relation = kind;
        self
    }

    pub fn target(mut self, target_type: impl Into<String>) -> Self {
        self.target_type = Some(target_type.into());
        self
    }

    pub fn key_target(mut self, key_target_type: impl Into<String>) -> Self {
        self.key_target_type = Some(key_target_type.into());
        self
    }

    pub fn cascade_delete(mut self) -> Self {
        self.cascade_delete = true;
        self
    }

    pub fn value_strategy(mut self, strategy: ValueStrategy) -> Self {
        self.value_strategy = Some(strategy);
        self
    }

    pub fn is_relation(&self) -> bool {
        self.relation.is_relation()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    pub name: String,
    pub table: String,
    pub fields: Vec<FieldDescriptor>,
    /// Named uniqueness constraints. The datastore cannot enforce them.
    pub unique_constraints: Vec<String>,
    /// Custom identity class, if the metadata declares one.
    pub identity_class: Option<String>,
}

impl TypeDescriptor {
    pub fn builder(name: impl Into<String>) -> TypeDescriptorBuilder {
        TypeDescriptorBuilder {
            name: name.into(),
            table: None,
            fields: Vec::new(),
            unique_constraints: Vec::new(),
            identity_class: None,
        }
    }

    pub fn field(&self, position: usize) -> Result<&FieldDescriptor, StorageError> {
        self.fields.get(position).ok_or_else(|| {
            StorageError::Usage(format!(
                "{} has no field at position {}",
                self.name, position
            ))
        })
    }

    pub fn field_named(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn primary_key_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.primary_key)
    }

    /// The single primary-key field.
    pub fn primary_key(&self) -> Result<&FieldDescriptor, StorageError> {
        let mut keys = self.primary_key_fields();
        match (keys.next(), keys.next()) {
            (Some(key), None) => Ok(key),
            (None, _) => Err(StorageError::Usage(format!(
                "No primary key defined for {}",
                self.name
            ))),
            (Some(_), Some(_)) => Err(StorageError::Usage(format!(
                "More than one primary key defined for {}",
                self.name
            ))),
        }
    }

    pub fn all_positions(&self) -> Vec<usize> {
        (0..self.fields.len()).collect()
    }

    /// Families the type writes to. The table-named family is always
    /// included since sequence counters live there.
    pub fn column_families(&self) -> BTreeSet<String> {
        std::iter::once(self.table.clone())
            .chain(self.fields.iter().map(|f| f.column.family.clone()))
            .collect()
    }

    pub fn table_schema(&self, include_families: bool) -> TableSchema {
        TableSchema {
            table: self.table.clone(),
            families: if include_families {
                self.column_families()
            } else {
                BTreeSet::new()
            },
        }
    }
}

pub struct TypeDescriptorBuilder {
    name: String,
    table: Option<String>,
    fields: Vec<FieldDescriptor>,
    unique_constraints: Vec<String>,
    identity_class: Option<String>,
}

impl TypeDescriptorBuilder {
    /// Table name; defaults to the type name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn unique_constraint(mut self, name: impl Into<String>) -> Self {
        self.unique_constraints.push(name.into());
        self
    }

    pub fn identity_class(mut self, name: impl Into<String>) -> Self {
        self.identity_class = Some(name.into());
        self
    }

    pub fn build(self) -> TypeDescriptor {
        let table = self.table.unwrap_or_else(|| self.name.clone());
        let fields = self
            .fields
            .into_iter()
            .enumerate()
            .map(|(position, mut field)| {
                field.position = position;
                field.column =
                    ColumnAddress::resolve(&table, &field.name, field.column_override.as_deref());
                field
            })
            .collect();

        TypeDescriptor {
            name: self.name,
            table,
            fields,
            unique_constraints: self.unique_constraints,
            identity_class: self.identity_class,
        }
    }
}

/// Read-mostly cache of descriptors keyed by type name.
#[derive(Default)]
pub struct DescriptorRegistry {
    descriptors: RwLock<HashMap<String, Arc<TypeDescriptor>>>,
}

impl DescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<TypeDescriptor>> {
        self.descriptors.read().get(type_name).cloned()
    }

    pub fn register(&self, descriptor: TypeDescriptor) -> Arc<TypeDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.descriptors
            .write()
            .insert(descriptor.name.clone(), descriptor.clone());
        descriptor
    }

    /// Return the cached descriptor, building it on first use.
    pub fn get_or_insert_with<F>(&self, type_name: &str, build: F) -> Arc<TypeDescriptor>
    where
        F: FnOnce() -> TypeDescriptor,
    {
        if let Some(descriptor) = self.get(type_name) {
            return descriptor;
        }
        self.descriptors
            .write()
            .entry(type_name.to_string())
            .or_insert_with(|| Arc::new(build()))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.descriptors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.read().is_empty()
    }
}

/// Static metadata and field access for a persistent type.
///
/// Generated by `#[derive(Persistent)]`:
///
/// ```text
/// #[derive(Persistent, Default)]
/// #[persistent(table = "people")]
/// pub struct Person {
///     #[primary_key]
///     pub key: String,
///     #[column(name = "details:full_name")]
///     pub name: String,
///     #[relation(many_to_one, target = "Team")]
///     pub team: Option<ObjectRef>,
///     #[column(skip)]
///     pub scratch: u32,
/// }
/// ```
///
/// Positions follow declaration order with skipped fields removed.
pub trait Persistable: Send + Sync + 'static {
    fn type_name() -> &'static str
    where
        Self: Sized;

    fn descriptor() -> TypeDescriptor
    where
        Self: Sized;

    fn field_value(&self, position: usize) -> Result<Value, StorageError>;

    fn set_field_value(&mut self, position: usize, value: Value) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> TypeDescriptor {
        TypeDescriptor::builder("Person")
            .table("people")
            .field(FieldDescriptor::new("key", FieldType::String).primary_key())
            .field(FieldDescriptor::new("name", FieldType::String).column("details:full_name"))
            .field(FieldDescriptor::new("age", FieldType::Int).column("years"))
            .build()
    }

    #[test]
    fn columns_resolve_at_build() {
        let descriptor = person();
        assert_eq!(descriptor.fields[0].column, ColumnAddress::new("people", "key"));
        assert_eq!(
            descriptor.fields[1].column,
            ColumnAddress::new("details", "full_name")
        );
        assert_eq!(descriptor.fields[2].column, ColumnAddress::new("people", "years"));
        assert_eq!(descriptor.fields[2].position, 2);
    }

    #[test]
    fn table_defaults_to_type_name() {
        let descriptor = TypeDescriptor::builder("Widget")
            .field(FieldDescriptor::new("id", FieldType::Long).primary_key())
            .build();
        assert_eq!(descriptor.table, "Widget");
    }

    #[test]
    fn partial_override_keeps_defaults() {
        assert_eq!(
            ColumnAddress::resolve("t", "f", Some(":q")),
            ColumnAddress::new("t", "q")
        );
        assert_eq!(
            ColumnAddress::resolve("t", "f", Some("fam:")),
            ColumnAddress::new("fam", "f")
        );
    }

    #[test]
    fn primary_key_must_be_unique() {
        let none = TypeDescriptor::builder("A")
            .field(FieldDescriptor::new("x", FieldType::Int))
            .build();
        assert!(matches!(none.primary_key(), Err(StorageError::Usage(_))));

        let two = TypeDescriptor::builder("B")
            .field(FieldDescriptor::new("x", FieldType::Long).primary_key())
            .field(FieldDescriptor::new("y", FieldType::Long).primary_key())
            .build();
        assert!(matches!(two.primary_key(), Err(StorageError::Usage(_))));

        assert_eq!(person().primary_key().unwrap().name, "key");
    }

    #[test]
    fn schema_collects_distinct_families() {
        let schema = person().table_schema(true);
        assert_eq!(schema.table, "people");
        assert_eq!(
            schema.families.into_iter().collect::<Vec<_>>(),
            vec!["details".to_string(), "people".to_string()]
        );

        let elsewhere = TypeDescriptor::builder("Note")
            .table("notes")
            .field(FieldDescriptor::new("id", FieldType::Long).primary_key().column("body:id"))
            .build();
        assert!(elsewhere.table_schema(true).families.contains("notes"));
        assert!(elsewhere.table_schema(false).families.is_empty());
    }

    #[test]
    fn registry_builds_once() {
        let registry = DescriptorRegistry::new();
        let first = registry.get_or_insert_with("Person", person);
        let second = registry.get_or_insert_with("Person", || unreachable!());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }
}
