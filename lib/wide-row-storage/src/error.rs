use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum StorageError {
    /// Programmer error: double release, bad primary key shape, writes to read-only types.
    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Error in meta-data for {}: {message}", qualified(.type_name, .field))]
    Validation {
        type_name: String,
        field: Option<String>,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Object with id {0} already exists")]
    DuplicateIdentity(String),

    #[error("Datastore error: {message}")]
    Datastore {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Could not decode column {column}: {source}")]
    Decode {
        column: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

fn qualified(type_name: &str, field: &Option<String>) -> String {
    match field {
        Some(field) => format!("{}.{}", type_name, field),
        None => type_name.to_string(),
    }
}

impl StorageError {
    /// Wrap a datastore client failure, keeping the original error as the source.
    pub fn datastore<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StorageError::Datastore {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn datastore_message(message: impl Into<String>) -> Self {
        StorageError::Datastore {
            message: message.into(),
            source: None,
        }
    }

    pub fn decode<E>(column: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxedSource>,
    {
        StorageError::Decode {
            column: column.into(),
            source: source.into(),
        }
    }

    pub fn validation(
        type_name: impl Into<String>,
        field: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        StorageError::Validation {
            type_name: type_name.into(),
            field: field.map(str::to_string),
            message: message.into(),
        }
    }

    /// Fatal errors are bugs or metadata mismatches; retrying cannot help.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StorageError::Usage(_) | StorageError::Validation { .. }
        )
    }

    /// Control-flow signals the caller is expected to handle.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            StorageError::NotFound(_) | StorageError::DuplicateIdentity(_)
        )
    }
}
