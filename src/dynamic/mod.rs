//! Schema-as-data
//!
//! Schemas and records described in YAML/JSON files rather than Rust types,
//! for use from the command line.
//!
//! ```yaml
//! name: orders
//! columns:
//!   - { field: no, name: Order No, sort: 1, needs_merge: true }
//!   - { field: status, name: Status, sort: 2, dict: order_status, combo_from_dict: true }
//! sub_collection:
//!   field: items
//!   name: Items
//!   sort: 3
//!   columns:
//!     - { field: sku, name: SKU }
//! dictionaries:
//!   order_status:
//!     - { value: "0", label: Open }
//!     - { value: "1", label: Shipped }
//! ```

mod record;

pub use record::{load_records, save_records, DynamicRecord};

use crate::dict::StaticDictionary;
use crate::error::{TabulaError, TabulaResult};
use crate::schema::{ColumnDescriptor, Schema, SubCollection};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// On-disk schema definition
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaFile {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub sub_collection: Option<SubCollection>,
    #[serde(default)]
    pub dictionaries: StaticDictionary,
}

/// A built schema together with the dictionaries declared beside it
#[derive(Debug, Clone)]
pub struct LoadedSchema {
    pub schema: Arc<Schema>,
    pub dictionaries: StaticDictionary,
}

impl SchemaFile {
    pub fn from_yaml_str(content: &str) -> TabulaResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_yaml_file(path: &Path) -> TabulaResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| TabulaError::Resource {
            target: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn build(self) -> TabulaResult<LoadedSchema> {
        let mut builder = Schema::builder(self.name).columns(self.columns);
        if let Some(sub) = self.sub_collection {
            builder = builder.sub_collection(sub);
        }
        Ok(LoadedSchema {
            schema: Arc::new(builder.build()?),
            dictionaries: self.dictionaries,
        })
    }
}

/// Read and build a schema file in one step
pub fn load_schema(path: &Path) -> TabulaResult<LoadedSchema> {
    SchemaFile::from_yaml_file(path)?.build()
}
