//! Schema descriptors
//!
//! A schema is the ordered list of column descriptors for one record type,
//! plus at most one nested sub-collection whose columns are flattened into
//! the sheet at the sub-collection's sort position.

mod record;

pub use record::{schema_of, split_path, FieldSink, FieldSource, Tabular};

use crate::codec::{BuiltinHandler, CellHandler};
use crate::error::{TabulaError, TabulaResult};
use crate::types::{Align, CellKind, FieldType, Rgb, RoundingMode};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

/// Which operations a column takes part in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Both,
    Export,
    Import,
}

impl Direction {
    fn admits(self, wanted: Direction) -> bool {
        self == Direction::Both || wanted == Direction::Both || self == wanted
    }
}

//==============================================================================
// Column Descriptor
//==============================================================================

/// Static metadata describing one exported/imported field
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnDescriptor {
    #[serde(rename = "field")]
    pub field_id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "sort")]
    pub sort_order: i32,
    pub direction: Direction,
    #[serde(rename = "kind")]
    pub cell_kind: CellKind,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub date_format: Option<String>,
    pub scale: Option<u32>,
    pub rounding: RoundingMode,
    #[serde(rename = "dict")]
    pub dictionary_type: Option<String>,
    pub expression: Option<String>,
    pub separator: String,
    pub align: Align,
    pub color: Rgb,
    pub background: Rgb,
    pub header_color: Rgb,
    pub header_background: Rgb,
    pub width: f64,
    /// Row height hint in points
    pub height: f64,
    pub needs_merge: bool,
    pub statistics: bool,
    pub prompt: Option<String>,
    pub combo: Vec<String>,
    pub combo_from_dict: bool,
    pub default_value: String,
    pub suffix: String,
    /// Dotted accessor into a nested property of the field
    pub target_attr: Option<String>,
    /// Built-in handler name, resolved when the schema is built
    #[serde(rename = "handler")]
    pub handler_name: Option<String>,
    #[serde(skip)]
    pub handler: Option<Arc<dyn CellHandler>>,
    pub handler_args: Vec<String>,
}

impl Default for ColumnDescriptor {
    fn default() -> Self {
        Self {
            field_id: String::new(),
            display_name: String::new(),
            sort_order: i32::MAX,
            direction: Direction::Both,
            cell_kind: CellKind::String,
            field_type: FieldType::Text,
            date_format: None,
            scale: None,
            rounding: RoundingMode::HalfEven,
            dictionary_type: None,
            expression: None,
            separator: ",".to_string(),
            align: Align::Center,
            color: Rgb::BLACK,
            background: Rgb::WHITE,
            header_color: Rgb::WHITE,
            header_background: Rgb::GREY_50,
            width: 16.0,
            height: 14.0,
            needs_merge: false,
            statistics: false,
            prompt: None,
            combo: Vec::new(),
            combo_from_dict: false,
            default_value: String::new(),
            suffix: String::new(),
            target_attr: None,
            handler_name: None,
            handler: None,
            handler_args: Vec::new(),
        }
    }
}

impl std::fmt::Debug for ColumnDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnDescriptor")
            .field("field_id", &self.field_id)
            .field("display_name", &self.display_name)
            .field("sort_order", &self.sort_order)
            .field("cell_kind", &self.cell_kind)
            .field("field_type", &self.field_type)
            .field("handler", &self.handler.is_some())
            .finish_non_exhaustive()
    }
}

impl ColumnDescriptor {
    pub fn new(field_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    /// Read/write path: `field_id` or `field_id.target_attr`
    pub fn path(&self) -> String {
        match &self.target_attr {
            Some(attr) if !attr.is_empty() => format!("{}.{}", self.field_id, attr),
            _ => self.field_id.clone(),
        }
    }

    #[must_use]
    pub fn sort(mut self, order: i32) -> Self {
        self.sort_order = order;
        self
    }

    #[must_use]
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    #[must_use]
    pub fn kind(mut self, kind: CellKind) -> Self {
        self.cell_kind = kind;
        self
    }

    #[must_use]
    pub fn field_type(mut self, field_type: FieldType) -> Self {
        self.field_type = field_type;
        self
    }

    #[must_use]
    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = Some(format.into());
        self
    }

    #[must_use]
    pub fn scale(mut self, scale: u32, rounding: RoundingMode) -> Self {
        self.scale = Some(scale);
        self.rounding = rounding;
        self
    }

    #[must_use]
    pub fn dictionary(mut self, dict_type: impl Into<String>) -> Self {
        self.dictionary_type = Some(dict_type.into());
        self
    }

    #[must_use]
    pub fn expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }

    #[must_use]
    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    #[must_use]
    pub fn align(mut self, align: Align) -> Self {
        self.align = align;
        self
    }

    #[must_use]
    pub fn colors(mut self, color: Rgb, background: Rgb) -> Self {
        self.color = color;
        self.background = background;
        self
    }

    #[must_use]
    pub fn header_colors(mut self, color: Rgb, background: Rgb) -> Self {
        self.header_color = color;
        self.header_background = background;
        self
    }

    #[must_use]
    pub fn width(mut self, width: f64) -> Self {
        self.width = width;
        self
    }

    #[must_use]
    pub fn height(mut self, height: f64) -> Self {
        self.height = height;
        self
    }

    #[must_use]
    pub fn merged(mut self) -> Self {
        self.needs_merge = true;
        self
    }

    #[must_use]
    pub fn statistics(mut self) -> Self {
        self.statistics = true;
        self
    }

    #[must_use]
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub fn combo<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.combo = values.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn combo_from_dict(mut self) -> Self {
        self.combo_from_dict = true;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = value.into();
        self
    }

    #[must_use]
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    #[must_use]
    pub fn target_attr(mut self, attr: impl Into<String>) -> Self {
        self.target_attr = Some(attr.into());
        self
    }

    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn CellHandler>, args: Vec<String>) -> Self {
        self.handler = Some(handler);
        self.handler_args = args;
        self
    }

    /// True when the column carries a finite allowed-value set or a prompt
    pub fn has_constraint(&self) -> bool {
        self.prompt.as_deref().is_some_and(|p| !p.is_empty())
            || !self.combo.is_empty()
            || self.combo_from_dict
    }
}

//==============================================================================
// Sub-Collection Descriptor
//==============================================================================

/// A nested, variable-length list of child records owned by the parent
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SubCollection {
    #[serde(rename = "field")]
    pub field_id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "sort")]
    pub sort_order: i32,
    pub header_color: Rgb,
    pub header_background: Rgb,
    pub columns: Vec<ColumnDescriptor>,
}

impl Default for SubCollection {
    fn default() -> Self {
        Self {
            field_id: String::new(),
            display_name: String::new(),
            sort_order: i32::MAX,
            header_color: Rgb::WHITE,
            header_background: Rgb::GREY_50,
            columns: Vec::new(),
        }
    }
}

impl SubCollection {
    pub fn new(field_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            field_id: field_id.into(),
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn sort(mut self, order: i32) -> Self {
        self.sort_order = order;
        self
    }

    #[must_use]
    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }
}

//==============================================================================
// Schema
//==============================================================================

/// Ordered column descriptors for one record type
#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    columns: Vec<ColumnDescriptor>,
    sub_collection: Option<SubCollection>,
    /// Number of parent columns emitted before the sub-collection's columns
    sub_position: usize,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            columns: Vec::new(),
            sub_collections: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parent columns in emission order
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// The sub-collection, only when it contributes at least one column
    pub fn sub_collection(&self) -> Option<&SubCollection> {
        self.sub_collection
            .as_ref()
            .filter(|sub| !sub.columns.is_empty())
    }

    pub fn sub_position(&self) -> usize {
        self.sub_position
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.sub_collection().is_none()
    }

    /// Total physical column count after flattening the sub-collection
    pub fn width(&self) -> usize {
        self.columns.len() + self.sub_collection().map_or(0, |s| s.columns.len())
    }

    /// Row height (points): the tallest declared hint across all columns
    pub fn row_height(&self) -> f64 {
        self.columns
            .iter()
            .chain(self.sub_collection().into_iter().flat_map(|s| s.columns.iter()))
            .map(|c| c.height)
            .fold(0.0, f64::max)
    }

    /// Drop columns by name. A name matches a column's `field_id` or its
    /// dotted path, or the sub-collection's `field_id`.
    pub fn hide_columns<S: AsRef<str>>(&self, names: &[S]) -> Schema {
        if names.is_empty() {
            return self.clone();
        }
        let hidden: HashSet<&str> = names.iter().map(AsRef::as_ref).collect();
        let keep = |c: &ColumnDescriptor| {
            !hidden.contains(c.field_id.as_str()) && !hidden.contains(c.path().as_str())
        };
        let sub_position = self.columns[..self.sub_position]
            .iter()
            .filter(|c| keep(c))
            .count();
        Schema {
            name: self.name.clone(),
            columns: self.columns.iter().filter(|c| keep(c)).cloned().collect(),
            sub_collection: self
                .sub_collection
                .clone()
                .filter(|s| !hidden.contains(s.field_id.as_str())),
            sub_position,
        }
    }

    /// Columns taking part in the given direction (export or import)
    pub fn view(&self, direction: Direction) -> Schema {
        let admits = |c: &ColumnDescriptor| c.direction.admits(direction);
        let sub_position = self.columns[..self.sub_position]
            .iter()
            .filter(|c| admits(c))
            .count();
        Schema {
            name: self.name.clone(),
            columns: self.columns.iter().filter(|c| admits(c)).cloned().collect(),
            sub_collection: self.sub_collection.clone().map(|mut s| {
                s.columns.retain(|c| admits(c));
                s
            }),
            sub_position,
        }
    }

    pub fn column(&self, field: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.field_id == field || c.path() == field)
    }
}

/// Collects descriptors and validates them into a [`Schema`]
#[derive(Debug)]
pub struct SchemaBuilder {
    name: String,
    columns: Vec<ColumnDescriptor>,
    sub_collections: Vec<SubCollection>,
}

impl SchemaBuilder {
    #[must_use]
    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn columns(mut self, columns: impl IntoIterator<Item = ColumnDescriptor>) -> Self {
        self.columns.extend(columns);
        self
    }

    #[must_use]
    pub fn sub_collection(mut self, sub: SubCollection) -> Self {
        self.sub_collections.push(sub);
        self
    }

    pub fn build(self) -> TabulaResult<Schema> {
        let SchemaBuilder {
            name,
            mut columns,
            sub_collections,
        } = self;

        validate_columns(&name, &columns)?;
        resolve_handlers(&name, &mut columns)?;
        // Stable: ties keep declaration order
        columns.sort_by_key(|c| c.sort_order);

        let mut subs = sub_collections.into_iter();
        let mut sub_collection = subs.next();
        for ignored in subs {
            warn!(
                schema = %name,
                field = %ignored.field_id,
                "Only one sub-collection per schema is supported; ignoring"
            );
        }

        if let Some(sub) = sub_collection.as_mut() {
            if sub.field_id.is_empty() {
                return Err(TabulaError::Schema(format!(
                    "Schema '{name}': sub-collection without a field id"
                )));
            }
            if columns.iter().any(|c| c.field_id == sub.field_id) {
                return Err(TabulaError::Schema(format!(
                    "Schema '{name}': field '{}' is declared both as a column and a sub-collection",
                    sub.field_id
                )));
            }
            let owner = format!("{name}.{}", sub.field_id);
            validate_columns(&owner, &sub.columns)?;
            resolve_handlers(&owner, &mut sub.columns)?;
            sub.columns.sort_by_key(|c| c.sort_order);
        }

        let sub_position = sub_collection.as_ref().map_or(columns.len(), |sub| {
            columns
                .iter()
                .take_while(|c| c.sort_order <= sub.sort_order)
                .count()
        });

        Ok(Schema {
            name,
            columns,
            sub_collection,
            sub_position,
        })
    }
}

fn resolve_handlers(owner: &str, columns: &mut [ColumnDescriptor]) -> TabulaResult<()> {
    for column in columns.iter_mut().filter(|c| c.handler.is_none()) {
        let Some(name) = column.handler_name.as_deref() else {
            continue;
        };
        let builtin = BuiltinHandler::from_name(name).ok_or_else(|| {
            TabulaError::Schema(format!(
                "Schema '{owner}': column '{}' names unknown handler '{name}'",
                column.field_id
            ))
        })?;
        column.handler = Some(builtin.into_handler());
    }
    Ok(())
}

fn validate_columns(owner: &str, columns: &[ColumnDescriptor]) -> TabulaResult<()> {
    let mut seen = HashSet::new();
    let mut labels = HashSet::new();
    for column in columns {
        if column.field_id.trim().is_empty() {
            return Err(TabulaError::Schema(format!(
                "Schema '{owner}': column '{}' has no field id",
                column.display_name
            )));
        }
        if column.display_name.trim().is_empty() {
            return Err(TabulaError::Schema(format!(
                "Schema '{owner}': column '{}' has no display name",
                column.field_id
            )));
        }
        if !seen.insert(column.path()) {
            return Err(TabulaError::Schema(format!(
                "Schema '{owner}': duplicate column '{}'",
                column.path()
            )));
        }
        // header cells bind back to columns by label
        if !labels.insert(column.display_name.trim()) {
            return Err(TabulaError::Schema(format!(
                "Schema '{owner}': duplicate column name '{}'",
                column.display_name.trim()
            )));
        }
        if column.scale.is_some() && column.field_type != crate::types::FieldType::Decimal {
            warn!(
                schema = %owner,
                field = %column.field_id,
                "scale is only applied to decimal fields"
            );
        }
    }
    Ok(())
}
