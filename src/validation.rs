//! Validation constraint builder
//!
//! Columns with a finite allowed-value set get a dropdown. Short lists are
//! inlined into the constraint; long ones go to a hidden side sheet behind a
//! named range, since inline lists are capped by spreadsheet applications.

use crate::codec::expression;
use crate::dict::DictionaryCache;
use crate::document::{CellRange, DataConstraint, DataRule, DocumentSink, SheetId};
use crate::error::TabulaResult;
use crate::schema::ColumnDescriptor;
use crate::types::CellValue;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// How a column's constraint is expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    None,
    PromptOnly,
    Inline,
    HiddenSheet,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strategy::None => "-",
            Strategy::PromptOnly => "prompt",
            Strategy::Inline => "inline list",
            Strategy::HiddenSheet => "hidden sheet",
        };
        f.write_str(s)
    }
}

/// Thresholds above which a list moves to a side sheet
#[derive(Debug, Clone, Copy)]
pub struct ValidationPolicy {
    pub max_inline_count: usize,
    pub max_inline_chars: usize,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            max_inline_count: 15,
            max_inline_chars: 255,
        }
    }
}

impl ValidationPolicy {
    pub fn strategy(&self, values: &[String], prompt: Option<&str>) -> Strategy {
        if values.is_empty() {
            return if prompt.is_some_and(|p| !p.is_empty()) {
                Strategy::PromptOnly
            } else {
                Strategy::None
            };
        }
        let chars: usize = values.iter().map(|v| v.chars().count()).sum();
        if values.len() > self.max_inline_count || chars > self.max_inline_chars {
            Strategy::HiddenSheet
        } else {
            Strategy::Inline
        }
    }
}

/// Allowed values of a column: the explicit list, else the dictionary or
/// expression labels when `combo_from_dict` is set
pub fn allowed_values(column: &ColumnDescriptor, dicts: &mut DictionaryCache<'_>) -> Vec<String> {
    if !column.combo.is_empty() {
        return column.combo.clone();
    }
    if !column.combo_from_dict {
        return Vec::new();
    }
    match (&column.dictionary_type, &column.expression) {
        (Some(dict), _) if !dict.is_empty() => dicts.all_labels(dict),
        (_, Some(exp)) if !exp.is_empty() => expression::labels(exp),
        _ => Vec::new(),
    }
}

/// Declares constraints for one export. Side sheets are created once per
/// column and shared by every chunk sheet.
#[derive(Debug, Default)]
pub struct ValidationBuilder {
    policy: ValidationPolicy,
    named_lists: HashMap<u16, String>,
}

impl ValidationBuilder {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self {
            policy,
            named_lists: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    /// Declare the constraint for physical column `col` over `rows`
    pub fn apply(
        &mut self,
        doc: &mut dyn DocumentSink,
        sheet: SheetId,
        col: u16,
        values: &[String],
        prompt: Option<&str>,
        rows: (u32, u32),
    ) -> TabulaResult<Strategy> {
        let strategy = self.policy.strategy(values, prompt);
        let rule = match strategy {
            Strategy::None => return Ok(strategy),
            Strategy::PromptOnly => DataRule::Any,
            Strategy::Inline => DataRule::List(values.to_vec()),
            Strategy::HiddenSheet => DataRule::ListFormula(self.named_list(doc, col, values)?),
        };
        doc.add_data_validation(
            sheet,
            DataConstraint {
                rule,
                prompt: prompt.filter(|p| !p.is_empty()).map(str::to_string),
                range: CellRange::new(rows.0, rows.1, col, col),
            },
        )?;
        Ok(strategy)
    }

    fn named_list(
        &mut self,
        doc: &mut dyn DocumentSink,
        col: u16,
        values: &[String],
    ) -> TabulaResult<String> {
        if let Some(name) = self.named_lists.get(&col) {
            return Ok(name.clone());
        }
        let sheet_name = format!("combo_{col}_{col}");
        let range_name = format!("{sheet_name}_data");
        let side = doc.create_sheet(&sheet_name)?;
        for (row, value) in values.iter().enumerate() {
            doc.set_cell(side, row as u32, 0, CellValue::Text(value.clone()), None)?;
        }
        doc.create_named_range(
            &range_name,
            &format!("{sheet_name}!$A$1:$A${}", values.len()),
        )?;
        doc.hide_sheet(side)?;
        debug!(sheet = %sheet_name, values = values.len(), "Dropdown values moved to hidden sheet");
        self.named_lists.insert(col, range_name.clone());
        Ok(range_name)
    }
}
