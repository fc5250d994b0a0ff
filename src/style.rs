//! Style catalog
//!
//! Styles are keyed structurally: two columns whose style-relevant
//! attributes match share one style record, and each distinct key reaches
//! the document exactly once per export.

use crate::document::{DocumentSink, StyleHandle, StyleSpec};
use crate::error::TabulaResult;
use crate::schema::ColumnDescriptor;
use crate::types::{Align, CellKind, Rgb};
use std::collections::HashMap;
use std::fmt;
use tracing::trace;

/// Structural identity of a style record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StyleKey {
    Title,
    Data,
    Header { color: Rgb, background: Rgb },
    DataColumn {
        align: Align,
        color: Rgb,
        background: Rgb,
        kind: CellKind,
    },
    Total,
}

impl StyleKey {
    pub fn header(column: &ColumnDescriptor) -> Self {
        StyleKey::Header {
            color: column.header_color,
            background: column.header_background,
        }
    }

    pub fn data(column: &ColumnDescriptor) -> Self {
        StyleKey::DataColumn {
            align: column.align,
            color: column.color,
            background: column.background,
            kind: column.cell_kind,
        }
    }
}

impl fmt::Display for StyleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StyleKey::Title => write!(f, "title"),
            StyleKey::Data => write!(f, "data"),
            StyleKey::Total => write!(f, "total"),
            StyleKey::Header { color, background } => {
                write!(f, "header_{}_{}", String::from(*color), String::from(*background))
            }
            StyleKey::DataColumn {
                align,
                color,
                background,
                kind,
            } => write!(
                f,
                "data_{align:?}_{}_{}_{kind:?}",
                String::from(*color),
                String::from(*background)
            ),
        }
    }
}

/// Fonts and sizes shared by every style of one export
#[derive(Debug, Clone)]
pub struct StyleTheme {
    pub font: String,
    pub title_size: f64,
    pub body_size: f64,
    pub border: Rgb,
}

impl Default for StyleTheme {
    fn default() -> Self {
        Self {
            font: "Arial".to_string(),
            title_size: 16.0,
            body_size: 10.0,
            border: Rgb::GREY_50,
        }
    }
}

impl StyleTheme {
    fn spec(&self, key: &StyleKey) -> StyleSpec {
        let base = StyleSpec {
            font_name: self.font.clone(),
            font_size: self.body_size,
            align: Align::Center,
            vertical_center: true,
            ..Default::default()
        };
        match *key {
            StyleKey::Title => StyleSpec {
                font_size: self.title_size,
                bold: true,
                ..base
            },
            StyleKey::Data => StyleSpec {
                border: Some(self.border),
                ..base
            },
            StyleKey::Total => StyleSpec {
                border: Some(self.border),
                num_format: Some("0.00".to_string()),
                ..base
            },
            StyleKey::Header { color, background } => StyleSpec {
                bold: true,
                font_color: Some(color),
                background: Some(background),
                border: Some(self.border),
                num_format: Some("@".to_string()),
                wrap: true,
                ..base
            },
            StyleKey::DataColumn {
                align,
                color,
                background,
                kind,
            } => StyleSpec {
                align,
                font_color: Some(color),
                background: Some(background),
                border: Some(self.border),
                num_format: (kind == CellKind::Text).then(|| "@".to_string()),
                wrap: true,
                ..base
            },
        }
    }
}

/// Memoized style handles for one export
#[derive(Debug)]
pub struct StyleCatalog {
    theme: StyleTheme,
    handles: HashMap<StyleKey, StyleHandle>,
}

impl StyleCatalog {
    /// Create the catalog and register the four base styles
    pub fn new(doc: &mut dyn DocumentSink, theme: StyleTheme) -> TabulaResult<Self> {
        let mut catalog = Self {
            theme,
            handles: HashMap::new(),
        };
        for key in [
            StyleKey::Title,
            StyleKey::Data,
            StyleKey::Header {
                color: Rgb::WHITE,
                background: Rgb::GREY_50,
            },
            StyleKey::Total,
        ] {
            catalog.resolve(doc, key)?;
        }
        Ok(catalog)
    }

    /// Handle for `key`, creating the style on first use
    pub fn resolve(&mut self, doc: &mut dyn DocumentSink, key: StyleKey) -> TabulaResult<StyleHandle> {
        if let Some(handle) = self.handles.get(&key) {
            return Ok(*handle);
        }
        let handle = doc.create_style(&self.theme.spec(&key))?;
        trace!(key = %key, handle = handle.0, "Style created");
        self.handles.insert(key, handle);
        Ok(handle)
    }

    /// Header and data styles for every column, resolved up front
    pub fn register_columns<'c>(
        &mut self,
        doc: &mut dyn DocumentSink,
        columns: impl IntoIterator<Item = &'c ColumnDescriptor>,
    ) -> TabulaResult<()> {
        for column in columns {
            self.resolve(doc, StyleKey::header(column))?;
            self.resolve(doc, StyleKey::data(column))?;
        }
        Ok(())
    }

    /// Lookup without creating; `None` for keys never resolved
    pub fn get(&self, key: &StyleKey) -> Option<StyleHandle> {
        self.handles.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
