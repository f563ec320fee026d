//! Object-type registry
//!
//! Per-object-type access rights, semantic type, external representation and
//! uninitialized default, loaded once from a JSON document:
//!
//! ```json
//! { "analogInput": { "access": "R", "bacnet_type": "REAL",
//!                    "datalayer_type": "float32", "uninitialized_default": 0.0 } }
//! ```
//!
//! Lookups ignore case and `-`/`_` separators in the object type name.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::types::fold_name;

/// Schema shipped with the crate
const BUILTIN_SCHEMA: &str = include_str!("../data/object_types.json");

/// Access right on an object's present value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    #[serde(rename = "R")]
    Read,
    #[serde(rename = "R/W")]
    ReadWrite,
}

/// Semantic type used to normalize present values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SemanticType {
    Boolean,
    Real,
    Integer,
    Unsigned,
    Enumerated,
    String,
    Unknown,
}

/// Type of the external endpoint a value is exposed through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalType {
    Bool8,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    String,
}

/// One object type's entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectTypeDefinition {
    pub access: Access,
    pub semantic_type: SemanticType,
    pub external_type: ExternalType,
    pub uninitialized_default: Option<serde_json::Value>,
}

/// Entry as written in the file; validated into [`ObjectTypeDefinition`]
#[derive(Debug, Deserialize)]
struct RawDefinition {
    access: String,
    #[serde(default = "default_semantic_type")]
    bacnet_type: String,
    #[serde(default = "default_external_type")]
    datalayer_type: String,
    #[serde(default)]
    uninitialized_default: serde_json::Value,
}

fn default_semantic_type() -> String {
    "UNKNOWN".to_string()
}

fn default_external_type() -> String {
    "string".to_string()
}

impl RawDefinition {
    fn validate(self, object_type: &str) -> Result<ObjectTypeDefinition, SchemaError> {
        let access = match self.access.as_str() {
            "R" => Access::Read,
            "R/W" => Access::ReadWrite,
            _ => {
                return Err(SchemaError::InvalidAccess {
                    object_type: object_type.to_string(),
                    access: self.access,
                })
            }
        };
        let semantic_type = serde_json::from_value(serde_json::Value::String(self.bacnet_type.clone()))
            .map_err(|_| SchemaError::UnknownType {
                object_type: object_type.to_string(),
                field: "bacnet_type",
                value: self.bacnet_type,
            })?;
        let external_type = serde_json::from_value(serde_json::Value::String(self.datalayer_type.clone()))
            .map_err(|_| SchemaError::UnknownType {
                object_type: object_type.to_string(),
                field: "datalayer_type",
                value: self.datalayer_type,
            })?;
        let uninitialized_default = match self.uninitialized_default {
            serde_json::Value::Null => None,
            value => Some(value),
        };

        Ok(ObjectTypeDefinition {
            access,
            semantic_type,
            external_type,
            uninitialized_default,
        })
    }
}

/// Read-mostly map from object type name to its definition
#[derive(Debug, Clone, Default)]
pub struct ObjectTypeRegistry {
    definitions: HashMap<String, ObjectTypeDefinition>,
}

impl ObjectTypeRegistry {
    /// Parse a schema document
    pub fn from_json_str(content: &str) -> Result<Self, SchemaError> {
        let raw: HashMap<String, RawDefinition> = serde_json::from_str(content)?;
        let definitions = raw
            .into_iter()
            .map(|(name, definition)| {
                let definition = definition.validate(&name)?;
                Ok((fold_name(&name), definition))
            })
            .collect::<Result<HashMap<_, _>, SchemaError>>()?;

        tracing::debug!("Loaded {} object type definitions", definitions.len());
        Ok(Self { definitions })
    }

    /// Load a schema file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    /// The schema shipped with the crate
    pub fn builtin() -> Result<Self, SchemaError> {
        Self::from_json_str(BUILTIN_SCHEMA)
    }

    pub fn get(&self, object_type: &str) -> Option<&ObjectTypeDefinition> {
        self.definitions.get(&fold_name(object_type))
    }

    pub fn semantic_type(&self, object_type: &str) -> SemanticType {
        self.get(object_type)
            .map(|d| d.semantic_type)
            .unwrap_or(SemanticType::Unknown)
    }

    /// Whether the object type's present value may be written; unknown types are read-only
    pub fn is_writable(&self, object_type: &str) -> bool {
        self.get(object_type)
            .map(|d| d.access == Access::ReadWrite)
            .unwrap_or(false)
    }

    /// External type for the object type, `string` when unknown
    pub fn external_type(&self, object_type: &str) -> ExternalType {
        self.get(object_type)
            .map(|d| d.external_type)
            .unwrap_or(ExternalType::String)
    }

    pub fn uninitialized_default(&self, object_type: &str) -> Option<&serde_json::Value> {
        self.get(object_type)?.uninitialized_default.as_ref()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
