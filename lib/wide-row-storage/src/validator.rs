//! Metadata checks run once per persistent type.
//!
//! Primary-key shape and key/strategy mismatches always fail. Uniqueness
//! constraints and custom identity classes cannot be honoured by a
//! column-family store; they are reported according to
//! [`IgnorableMetadataBehavior`].

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::{
    DescriptorRegistry, FieldType, IgnorableMetadataBehavior, StorageError, TypeDescriptor,
    ValueStrategy,
};

/// Cloneable record of a failed validation, kept in the cache.
#[derive(Debug, Clone)]
enum Failure {
    Usage(String),
    Validation {
        field: Option<String>,
        message: String,
    },
}

impl Failure {
    fn validation(field: Option<&str>, message: impl Into<String>) -> Self {
        Failure::Validation {
            field: field.map(str::to_string),
            message: message.into(),
        }
    }

    fn to_error(&self, type_name: &str) -> StorageError {
        match self {
            Failure::Usage(message) => StorageError::Usage(message.clone()),
            Failure::Validation { field, message } => {
                StorageError::validation(type_name, field.as_deref(), message.clone())
            }
        }
    }
}

pub struct MetadataValidator {
    behavior: IgnorableMetadataBehavior,
    validated: Mutex<HashMap<String, Option<Failure>>>,
}

impl MetadataValidator {
    pub fn new(behavior: IgnorableMetadataBehavior) -> Self {
        Self {
            behavior,
            validated: Mutex::new(HashMap::new()),
        }
    }

    /// Validate `descriptor`, reusing the cached result for its type.
    pub fn validate(
        &self,
        descriptor: &TypeDescriptor,
        registry: &DescriptorRegistry,
    ) -> Result<(), StorageError> {
        if let Some(cached) = self.validated.lock().get(&descriptor.name) {
            return match cached {
                Some(failure) => Err(failure.to_error(&descriptor.name)),
                None => Ok(()),
            };
        }

        info!(type_name = %descriptor.name, "validating metadata");
        let outcome = self.check(descriptor, registry).err();
        info!(type_name = %descriptor.name, valid = outcome.is_none(), "metadata validated");

        let result = match &outcome {
            Some(failure) => Err(failure.to_error(&descriptor.name)),
            None => Ok(()),
        };
        self.validated.lock().insert(descriptor.name.clone(), outcome);
        result
    }

    pub fn is_validated(&self, type_name: &str) -> bool {
        self.validated.lock().contains_key(type_name)
    }

    fn check(
        &self,
        descriptor: &TypeDescriptor,
        registry: &DescriptorRegistry,
    ) -> Result<(), Failure> {
        let key = descriptor
            .primary_key()
            .map_err(|e| match e {
                StorageError::Usage(message) => Failure::Usage(message),
                other => Failure::Usage(other.to_string()),
            })?;

        if !matches!(key.field_type, FieldType::String | FieldType::Long) {
            return Err(Failure::validation(
                Some(key.name.as_str()),
                format!(
                    "Unsupported primary key type {:?}; only String and Long keys are supported",
                    key.field_type
                ),
            ));
        }

        match (key.value_strategy, key.field_type) {
            (Some(ValueStrategy::Sequence { .. }), FieldType::String) => {
                return Err(Failure::validation(
                    Some(key.name.as_str()),
                    "Sequence value strategy cannot be used with a String primary key",
                ));
            }
            (Some(ValueStrategy::Sequence { initial_value }), _) if initial_value != 1 => {
                return Err(Failure::validation(
                    Some(key.name.as_str()),
                    format!(
                        "Sequence initial value must be 1, found {}",
                        initial_value
                    ),
                ));
            }
            (Some(ValueStrategy::Uuid), FieldType::Long) => {
                return Err(Failure::validation(
                    Some(key.name.as_str()),
                    "UUID value strategy requires a String primary key",
                ));
            }
            _ => {}
        }

        for field in descriptor.fields.iter().filter(|f| f.is_relation()) {
            if field.target_type.is_none() && field.key_target_type.is_none() {
                return Err(Failure::validation(
                    Some(field.name.as_str()),
                    "Relation field has no target type",
                ));
            }
            for target in [&field.target_type, &field.key_target_type]
                .into_iter()
                .flatten()
            {
                self.check_relation_target(descriptor, &field.name, target, registry)?;
            }
        }

        if !descriptor.unique_constraints.is_empty() {
            self.ignorable(
                descriptor,
                format!(
                    "Unique constraints {:?} are not enforced by the datastore",
                    descriptor.unique_constraints
                ),
            )?;
        }
        if let Some(identity_class) = &descriptor.identity_class {
            self.ignorable(
                descriptor,
                format!("Custom identity class {} is ignored", identity_class),
            )?;
        }
        Ok(())
    }

    fn check_relation_target(
        &self,
        descriptor: &TypeDescriptor,
        field: &str,
        target: &str,
        registry: &DescriptorRegistry,
    ) -> Result<(), Failure> {
        // Self-references validate against the type being checked.
        let target_key = if target == descriptor.name {
            descriptor.primary_key().ok().map(|k| k.field_type)
        } else {
            match registry.get(target) {
                Some(related) => related.primary_key().ok().map(|k| k.field_type),
                None => {
                    warn!(
                        type_name = %descriptor.name,
                        field,
                        target,
                        "relation target is not registered; skipping key check"
                    );
                    return Ok(());
                }
            }
        };

        match target_key {
            Some(FieldType::String | FieldType::Long) => Ok(()),
            other => Err(Failure::validation(
                Some(field),
                format!(
                    "Related type {} has unsupported primary key type {:?}",
                    target, other
                ),
            )),
        }
    }

    fn ignorable(&self, descriptor: &TypeDescriptor, message: String) -> Result<(), Failure> {
        match self.behavior {
            IgnorableMetadataBehavior::None => Ok(()),
            IgnorableMetadataBehavior::Warn => {
                warn!(type_name = %descriptor.name, "{}", message);
                Ok(())
            }
            IgnorableMetadataBehavior::Error => Err(Failure::validation(None, message)),
        }
    }
}
