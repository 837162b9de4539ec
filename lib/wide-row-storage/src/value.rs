//! Dynamic field values exchanged between persistent objects and the mapper.
//!
//! Every persistent field is read from and written to its owning object as a
//! [`Value`]. Rust field types convert through [`FieldValue`], which the
//! `Persistent` derive uses for the generated accessors.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::Hash;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{FieldType, StorageError};

/// Handle to a live persistent object owned by the execution context.
///
/// Only relationship fields carry object references, and they are always
/// resolved to identifiers before anything is written to a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub type_name: String,
    pub handle: u64,
}

impl ObjectRef {
    pub fn new(type_name: impl Into<String>, handle: u64) -> Self {
        Self {
            type_name: type_name.into(),
            handle,
        }
    }
}

/// Concrete container a collection field is declared as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    List,
    LinkedList,
    HashSet,
    SortedSet,
    LinkedSet,
}

impl CollectionKind {
    pub fn is_set(&self) -> bool {
        matches!(
            self,
            CollectionKind::HashSet | CollectionKind::SortedSet | CollectionKind::LinkedSet
        )
    }

    /// Rebuild `items` with this container's semantics: sorted sets are
    /// ordered and deduplicated, other sets drop repeats keeping first order.
    pub fn normalize(&self, items: Vec<Value>) -> Vec<Value> {
        match self {
            CollectionKind::List | CollectionKind::LinkedList => items,
            CollectionKind::SortedSet => {
                let mut items = items;
                items.sort_by(Value::total_cmp);
                items.dedup_by(|a, b| a.total_cmp(b) == Ordering::Equal);
                items
            }
            CollectionKind::HashSet | CollectionKind::LinkedSet => {
                let mut unique: Vec<Value> = Vec::with_capacity(items.len());
                for item in items {
                    if !unique.iter().any(|u| u.total_cmp(&item) == Ordering::Equal) {
                        unique.push(item);
                    }
                }
                unique
            }
        }
    }
}

/// A field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(i8),
    Char(char),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Date(DateTime<Utc>),
    Enum { type_name: String, variant: String },
    Collection(CollectionKind, Vec<Value>),
    Map(Vec<(Value, Value)>),
    Object(ObjectRef),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(r) => Some(r),
            _ => None,
        }
    }

    /// Build a map value with entries in deterministic key order.
    pub fn sorted_map(entries: Vec<(Value, Value)>) -> Value {
        let mut entries = entries;
        entries.sort_by(|a, b| a.0.total_cmp(&b.0));
        Value::Map(entries)
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Byte(_) => 2,
            Value::Char(_) => 3,
            Value::Short(_) => 4,
            Value::Int(_) => 5,
            Value::Long(_) => 6,
            Value::Float(_) => 7,
            Value::Double(_) => 8,
            Value::String(_) => 9,
            Value::Date(_) => 10,
            Value::Enum { .. } => 11,
            Value::Collection(..) => 12,
            Value::Map(_) => 13,
            Value::Object(_) => 14,
        }
    }

    /// Total order over values: variants order by kind first, floats by
    /// `total_cmp`, containers lexicographically.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Byte(a), Value::Byte(b)) => a.cmp(b),
            (Value::Char(a), Value::Char(b)) => a.cmp(b),
            (Value::Short(a), Value::Short(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Long(a), Value::Long(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (
                Value::Enum {
                    type_name: ta,
                    variant: va,
                },
                Value::Enum {
                    type_name: tb,
                    variant: vb,
                },
            ) => (ta, va).cmp(&(tb, vb)),
            (Value::Collection(_, a), Value::Collection(_, b)) => cmp_slices(a, b),
            (Value::Map(a), Value::Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.total_cmp(kb).then_with(|| va.total_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Object(a), Value::Object(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Byte(_) => "byte",
            Value::Char(_) => "char",
            Value::Short(_) => "short",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Date(_) => "date",
            Value::Enum { .. } => "enum",
            Value::Collection(..) => "collection",
            Value::Map(_) => "map",
            Value::Object(_) => "object",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Long(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<ObjectRef> for Value {
    fn from(r: ObjectRef) -> Self {
        Value::Object(r)
    }
}

fn cmp_slices(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = x.total_cmp(y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn mismatch<T>(expected: &str, found: &Value) -> Result<T, StorageError> {
    Err(StorageError::UnsupportedType(format!(
        "expected {} value, found {}",
        expected,
        found.describe()
    )))
}

/// Conversion between a Rust field type and [`Value`].
///
/// `from_value(Value::Null)` yields the type's default: a column that was
/// never written reads back as "no value".
pub trait FieldValue: Sized {
    fn field_type() -> FieldType;
    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> Result<Self, StorageError>;
}

// Integer coercion wraps silently, like a cast.
macro_rules! integer_field_value {
    ($ty:ty, $variant:ident, $field_type:ident) => {
        impl FieldValue for $ty {
            fn field_type() -> FieldType {
                FieldType::$field_type
            }

            fn to_value(&self) -> Value {
                Value::$variant(*self)
            }

            fn from_value(value: Value) -> Result<Self, StorageError> {
                match value {
                    Value::Null => Ok(<$ty>::default()),
                    Value::Byte(n) => Ok(n as $ty),
                    Value::Short(n) => Ok(n as $ty),
                    Value::Int(n) => Ok(n as $ty),
                    Value::Long(n) => Ok(n as $ty),
                    other => mismatch(stringify!($ty), &other),
                }
            }
        }
    };
}

integer_field_value!(i8, Byte, Byte);
integer_field_value!(i16, Short, Short);
integer_field_value!(i32, Int, Int);
integer_field_value!(i64, Long, Long);

impl FieldValue for bool {
    fn field_type() -> FieldType {
        FieldType::Boolean
    }

    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self, StorageError> {
        match value {
            Value::Null => Ok(false),
            Value::Bool(b) => Ok(b),
            other => mismatch("bool", &other),
        }
    }
}

impl FieldValue for char {
    fn field_type() -> FieldType {
        FieldType::Char
    }

    fn to_value(&self) -> Value {
        Value::Char(*self)
    }

    fn from_value(value: Value) -> Result<Self, StorageError> {
        match value {
            Value::Null => Ok(char::default()),
            Value::Char(c) => Ok(c),
            other => mismatch("char", &other),
        }
    }
}

impl FieldValue for f32 {
    fn field_type() -> FieldType {
        FieldType::Float
    }

    fn to_value(&self) -> Value {
        Value::Float(*self)
    }

    fn from_value(value: Value) -> Result<Self, StorageError> {
        match value {
            Value::Null => Ok(0.0),
            Value::Float(f) => Ok(f),
            Value::Double(d) => Ok(d as f32),
            other => mismatch("f32", &other),
        }
    }
}

impl FieldValue for f64 {
    fn field_type() -> FieldType {
        FieldType::Double
    }

    fn to_value(&self) -> Value {
        Value::Double(*self)
    }

    fn from_value(value: Value) -> Result<Self, StorageError> {
        match value {
            Value::Null => Ok(0.0),
            Value::Double(d) => Ok(d),
            Value::Float(f) => Ok(f as f64),
            other => mismatch("f64", &other),
        }
    }
}

impl FieldValue for String {
    fn field_type() -> FieldType {
        FieldType::String
    }

    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, StorageError> {
        match value {
            Value::Null => Ok(String::new()),
            Value::String(s) => Ok(s),
            other => mismatch("string", &other),
        }
    }
}

impl FieldValue for DateTime<Utc> {
    fn field_type() -> FieldType {
        FieldType::Object
    }

    fn to_value(&self) -> Value {
        Value::Date(*self)
    }

    fn from_value(value: Value) -> Result<Self, StorageError> {
        match value {
            Value::Null => Ok(DateTime::<Utc>::default()),
            Value::Date(d) => Ok(d),
            other => mismatch("date", &other),
        }
    }
}

impl FieldValue for ObjectRef {
    fn field_type() -> FieldType {
        FieldType::Object
    }

    fn to_value(&self) -> Value {
        Value::Object(self.clone())
    }

    fn from_value(value: Value) -> Result<Self, StorageError> {
        match value {
            Value::Object(r) => Ok(r),
            other => mismatch("object reference", &other),
        }
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    /// Optional primitives are stored through the generic object encoding so an
    /// absent column stays distinguishable from zero.
    fn field_type() -> FieldType {
        match T::field_type() {
            inner if inner.is_primitive() => FieldType::Object,
            inner => inner,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Some(inner) => inner.to_value(),
            None => Value::Null,
        }
    }

    fn from_value(value: Value) -> Result<Self, StorageError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

fn collection_items(value: Value, expected: &str) -> Result<Vec<Value>, StorageError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Collection(_, items) => Ok(items),
        other => mismatch(expected, &other),
    }
}

impl<T: FieldValue> FieldValue for Vec<T> {
    fn field_type() -> FieldType {
        FieldType::Collection(CollectionKind::List)
    }

    fn to_value(&self) -> Value {
        Value::Collection(
            CollectionKind::List,
            self.iter().map(FieldValue::to_value).collect(),
        )
    }

    fn from_value(value: Value) -> Result<Self, StorageError> {
        collection_items(value, "list")?
            .into_iter()
            .map(T::from_value)
            .collect()
    }
}

impl<T: FieldValue> FieldValue for VecDeque<T> {
    fn field_type() -> FieldType {
        FieldType::Collection(CollectionKind::LinkedList)
    }

    fn to_value(&self) -> Value {
        Value::Collection(
            CollectionKind::LinkedList,
            self.iter().map(FieldValue::to_value).collect(),
        )
    }

    fn from_value(value: Value) -> Result<Self, StorageError> {
        collection_items(value, "linked list")?
            .into_iter()
            .map(T::from_value)
            .collect()
    }
}

impl<T: FieldValue + Ord> FieldValue for BTreeSet<T> {
    fn field_type() -> FieldType {
        FieldType::Collection(CollectionKind::SortedSet)
    }

    fn to_value(&self) -> Value {
        Value::Collection(
            CollectionKind::SortedSet,
            self.iter().map(FieldValue::to_value).collect(),
        )
    }

    fn from_value(value: Value) -> Result<Self, StorageError> {
        collection_items(value, "sorted set")?
            .into_iter()
            .map(T::from_value)
            .collect()
    }
}

impl<T: FieldValue + Eq + Hash> FieldValue for HashSet<T> {
    fn field_type() -> FieldType {
        FieldType::Collection(CollectionKind::HashSet)
    }

    fn to_value(&self) -> Value {
        Value::Collection(
            CollectionKind::HashSet,
            self.iter().map(FieldValue::to_value).collect(),
        )
    }

    fn from_value(value: Value) -> Result<Self, StorageError> {
        collection_items(value, "set")?
            .into_iter()
            .map(T::from_value)
            .collect()
    }
}

fn map_entries(value: Value) -> Result<Vec<(Value, Value)>, StorageError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Map(entries) => Ok(entries),
        other => mismatch("map", &other),
    }
}

impl<K: FieldValue + Ord, V: FieldValue> FieldValue for BTreeMap<K, V> {
    fn field_type() -> FieldType {
        FieldType::Map
    }

    fn to_value(&self) -> Value {
        Value::sorted_map(
            self.iter()
                .map(|(k, v)| (k.to_value(), v.to_value()))
                .collect(),
        )
    }

    fn from_value(value: Value) -> Result<Self, StorageError> {
        map_entries(value)?
            .into_iter()
            .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
            .collect()
    }
}

impl<K: FieldValue + Eq + Hash, V: FieldValue> FieldValue for HashMap<K, V> {
    fn field_type() -> FieldType {
        FieldType::Map
    }

    fn to_value(&self) -> Value {
        Value::sorted_map(
            self.iter()
                .map(|(k, v)| (k.to_value(), v.to_value()))
                .collect(),
        )
    }

    fn from_value(value: Value) -> Result<Self, StorageError> {
        map_entries(value)?
            .into_iter()
            .map(|(k, v)| Ok((K::from_value(k)?, V::from_value(v)?)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_set_normalization_orders_and_dedups() {
        let items = vec![Value::Int(3), Value::Int(1), Value::Int(3), Value::Int(2)];
        assert_eq!(
            CollectionKind::SortedSet.normalize(items),
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        );
    }

    #[test]
    fn linked_set_keeps_first_occurrence_order() {
        let items = vec![
            Value::String("b".into()),
            Value::String("a".into()),
            Value::String("b".into()),
        ];
        assert_eq!(
            CollectionKind::LinkedSet.normalize(items),
            vec![Value::String("b".into()), Value::String("a".into())]
        );
    }

    #[test]
    fn integer_coercion_wraps() {
        assert_eq!(i8::from_value(Value::Int(300)).unwrap(), 300i32 as i8);
        assert_eq!(i32::from_value(Value::Long(1 << 40)).unwrap(), 0);
    }

    #[test]
    fn null_reads_back_as_default() {
        assert_eq!(i32::from_value(Value::Null).unwrap(), 0);
        assert!(!bool::from_value(Value::Null).unwrap());
        assert_eq!(Option::<String>::from_value(Value::Null).unwrap(), None);
        assert!(Vec::<i64>::from_value(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn optional_primitive_uses_object_encoding() {
        assert_eq!(Option::<i32>::field_type(), FieldType::Object);
        assert_eq!(Option::<String>::field_type(), FieldType::String);
        assert_eq!(
            Option::<Vec<i32>>::field_type(),
            FieldType::Collection(CollectionKind::List)
        );
    }

    #[test]
    fn hash_map_value_is_key_ordered() {
        let mut map = HashMap::new();
        map.insert("b".to_string(), 2i32);
        map.insert("a".to_string(), 1i32);
        assert_eq!(
            map.to_value(),
            Value::Map(vec![
                (Value::String("a".into()), Value::Int(1)),
                (Value::String("b".into()), Value::Int(2)),
            ])
        );
    }

    #[test]
    fn mismatched_variant_is_unsupported() {
        let err = i32::from_value(Value::String("x".into())).unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedType(_)));
    }
}
