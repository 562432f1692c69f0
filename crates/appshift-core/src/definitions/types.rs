//! Entity definition model.
//!
//! Field kinds are a closed set so reference scanning can match exhaustively.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Storage type of a scalar column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
    Date,
    Datetime,
    Json,
}

impl ColumnType {
    /// SQLite declared type used when creating the column.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer | ColumnType::Boolean => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text | ColumnType::Date | ColumnType::Datetime | ColumnType::Json => {
                "TEXT"
            }
        }
    }

    /// Best-effort inverse of [`ColumnType::sql_type`] for reconstruction.
    pub fn from_sql_type(declared: &str) -> Self {
        let declared = declared.to_ascii_uppercase();
        if declared.contains("INT") {
            ColumnType::Integer
        } else if declared.contains("REAL") || declared.contains("FLOA") || declared.contains("DOUB")
        {
            ColumnType::Real
        } else {
            ColumnType::Text
        }
    }
}

/// Kind of reference edge a field produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// Foreign-key-like link to one row of the target.
    Single,
    /// Embedded child rows of the target type.
    Collection,
    /// Target type read at runtime from a companion field.
    Dynamic,
}

/// What a field is, structurally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Scalar { column_type: ColumnType },
    SingleReference { target: String },
    CollectionReference { target: String },
    DynamicReference { type_field: String },
}

/// One declared field of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub fieldname: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl FieldDefinition {
    pub fn scalar(fieldname: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            fieldname: fieldname.into(),
            kind: FieldKind::Scalar { column_type },
            label: None,
        }
    }

    pub fn single(fieldname: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            fieldname: fieldname.into(),
            kind: FieldKind::SingleReference {
                target: target.into(),
            },
            label: None,
        }
    }

    pub fn collection(fieldname: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            fieldname: fieldname.into(),
            kind: FieldKind::CollectionReference {
                target: target.into(),
            },
            label: None,
        }
    }

    pub fn dynamic(fieldname: impl Into<String>, type_field: impl Into<String>) -> Self {
        Self {
            fieldname: fieldname.into(),
            kind: FieldKind::DynamicReference {
                type_field: type_field.into(),
            },
            label: None,
        }
    }

    /// Column backing this field, if any. Collections live in the child table.
    pub fn column_type(&self) -> Option<ColumnType> {
        match &self.kind {
            FieldKind::Scalar { column_type } => Some(*column_type),
            FieldKind::SingleReference { .. } | FieldKind::DynamicReference { .. } => {
                Some(ColumnType::Text)
            }
            FieldKind::CollectionReference { .. } => None,
        }
    }

    /// Statically known reference target, if the field is a fixed reference.
    pub fn reference_target(&self) -> Option<(ReferenceKind, &str)> {
        match &self.kind {
            FieldKind::SingleReference { target } => Some((ReferenceKind::Single, target)),
            FieldKind::CollectionReference { target } => {
                Some((ReferenceKind::Collection, target))
            }
            FieldKind::Scalar { .. } | FieldKind::DynamicReference { .. } => None,
        }
    }
}

/// A customization layered on top of an entity's declared definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CustomizationKind {
    AddedField {
        field: FieldDefinition,
    },
    PropertyOverride {
        fieldname: String,
        property: String,
        value: serde_json::Value,
    },
}

/// A stored customization record and the namespace that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customization {
    pub id: String,
    pub entity: String,
    pub namespace: Option<String>,
    pub kind: CustomizationKind,
}

/// The on-disk definition document, one per entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionDocument {
    pub name: String,
    pub module: String,
    #[serde(default)]
    pub is_custom: bool,
    #[serde(default)]
    pub is_tree: bool,
    #[serde(default)]
    pub is_embedded: bool,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

/// Where a definition document physically lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionLocation {
    pub namespace: String,
    pub module: String,
    /// Path of the definition document itself.
    pub path: PathBuf,
}

impl DefinitionLocation {
    /// Directory holding the document (`<ns>/<module>/<slug>`).
    pub fn entity_dir(&self) -> &Path {
        self.path.parent().unwrap_or(&self.path)
    }
}

/// Merged view of one record type: its definition document, live ownership
/// metadata and customization set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    pub namespace: Option<String>,
    pub module: Option<String>,
    pub is_custom: bool,
    pub is_tree: bool,
    pub is_embedded: bool,
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub customizations: Vec<Customization>,
}

impl EntityDefinition {
    /// Minimal definition used when authoring or reconstructing.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            module: None,
            is_custom: false,
            is_tree: false,
            is_embedded: false,
            fields: Vec::new(),
            customizations: Vec::new(),
        }
    }

    pub fn owned_by(mut self, namespace: impl Into<String>, module: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self.module = Some(module.into());
        self
    }

    pub fn with_field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn has_customizations(&self) -> bool {
        !self.customizations.is_empty()
    }

    /// Declared fields followed by fields added through customization.
    pub fn effective_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().chain(self.customizations.iter().filter_map(|c| match &c.kind {
            CustomizationKind::AddedField { field } => Some(field),
            CustomizationKind::PropertyOverride { .. } => None,
        }))
    }

    /// Whether the entity has a backing table of its own.
    pub fn has_table(&self) -> bool {
        !self.is_embedded
    }

    /// Build the document written to disk under `module`.
    pub fn to_document(&self, module: &str) -> DefinitionDocument {
        DefinitionDocument {
            name: self.name.clone(),
            module: module.to_string(),
            is_custom: self.is_custom,
            is_tree: self.is_tree,
            is_embedded: self.is_embedded,
            fields: self.fields.clone(),
        }
    }
}
