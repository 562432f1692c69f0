//! Entity definitions: the data model and the file-backed repository.
//!
//! # Architecture
//!
//! ```text
//! DefinitionRepository (apps/<ns>/<module>/<slug>/<slug>.json)
//!     │
//!     └── DefinitionIndex - name -> physical location + document
//!
//! EntityDefinition = DefinitionDocument + live ownership + customizations
//! ```

pub mod naming;
mod repository;
mod types;

pub use naming::{entity_for_table, entity_slug, nearest_module, quote_ident, table_name};
pub use repository::{
    DefinitionIndex, DefinitionRepository, DuplicateDefinition, UnreadableDefinition,
};
pub use types::{
    ColumnType, Customization, CustomizationKind, DefinitionDocument, DefinitionLocation,
    EntityDefinition, FieldDefinition, FieldKind, ReferenceKind,
};
