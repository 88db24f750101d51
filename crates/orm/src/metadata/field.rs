//! Field metadata

use std::fmt;

use serde::{Deserialize, Serialize};

/// Semantic type of a mapped field
///
/// Anything that is not one of the primitive names refers to another entity
/// and is stored as a foreign key holding that entity's primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    Integer,
    Decimal,
    Boolean,
    Timestamp,
    String,
    /// Reference to the named entity
    Entity(String),
}

impl FieldType {
    pub fn entity(name: impl Into<String>) -> Self {
        FieldType::Entity(name.into())
    }

    /// Name of the referenced entity, if this is a complex type
    pub fn target(&self) -> Option<&str> {
        match self {
            FieldType::Entity(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FieldType::Integer => "int",
            FieldType::Decimal => "decimal",
            FieldType::Boolean => "bool",
            FieldType::Timestamp => "DateTime",
            FieldType::String => "string",
            FieldType::Entity(name) => name,
        }
    }
}

impl From<String> for FieldType {
    fn from(name: String) -> Self {
        match name.to_lowercase().as_str() {
            "int" | "integer" | "long" => FieldType::Integer,
            "decimal" | "double" | "float" => FieldType::Decimal,
            "bool" | "boolean" => FieldType::Boolean,
            "datetime" | "timestamp" => FieldType::Timestamp,
            "string" | "text" => FieldType::String,
            _ => FieldType::Entity(name),
        }
    }
}

impl From<FieldType> for String {
    fn from(field_type: FieldType) -> Self {
        field_type.as_str().to_string()
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Propagation of session operations across an association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Cascade {
    #[default]
    None,
    Save,
    SaveDelete,
}

impl Cascade {
    pub fn saves(&self) -> bool {
        matches!(self, Cascade::Save | Cascade::SaveDelete)
    }

    pub fn deletes(&self) -> bool {
        matches!(self, Cascade::SaveDelete)
    }
}

/// Describes one mapped property of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u8>,
    #[serde(default)]
    pub cascade: Cascade,
    /// Inverse side of a bidirectional association
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_field: Option<String>,
    /// One-to-many side; holds the entities whose `reference_field` points back
    #[serde(default)]
    pub collection: bool,
    /// Load the collection together with its owner
    #[serde(default)]
    pub eager: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip)]
    pub(crate) primary_key: bool,
}

impl FieldMetadata {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            mandatory: false,
            unique: false,
            max_length: None,
            precision: None,
            scale: None,
            cascade: Cascade::None,
            reference_field: None,
            collection: false,
            eager: false,
            description: None,
            primary_key: false,
        }
    }

    /// Foreign key to another entity
    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, FieldType::Entity(target.into()))
    }

    /// One-to-many association; `inverse` is the reference field on the target
    pub fn collection(
        name: impl Into<String>,
        target: impl Into<String>,
        inverse: impl Into<String>,
    ) -> Self {
        let mut field = Self::reference(name, target);
        field.collection = true;
        field.reference_field = Some(inverse.into());
        field
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    pub fn cascade(mut self, cascade: Cascade) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn reference_field(mut self, field: impl Into<String>) -> Self {
        self.reference_field = Some(field.into());
        self
    }

    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_complex_field_type(&self) -> bool {
        matches!(self.field_type, FieldType::Entity(_))
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    /// Stored as a column of the entity's own table
    pub fn is_column(&self) -> bool {
        !self.collection
    }

    /// Foreign key column
    pub fn is_reference(&self) -> bool {
        self.is_complex_field_type() && !self.collection
    }

    pub fn is_collection(&self) -> bool {
        self.collection
    }

    /// Name of the associated entity, for complex fields
    pub fn target(&self) -> Option<&str> {
        self.field_type.target()
    }
}
