//! Layout planner
//!
//! Computes where every row and merged region goes. The planner is pure: it
//! takes a [`LayoutState`] by value and hands back the next one together with
//! the placement of the row it just emitted. Steps requested out of order are
//! rejected with a layout error.
//!
//! Per sheet the phases run
//! `Init -> Title? -> SubHeader? -> Header -> DataRow(n)* -> Totals? -> SheetBoundary`,
//! then either `Init` on the next sheet or `Done`.

use crate::document::CellRange;
use crate::error::{TabulaError, TabulaResult};
use crate::schema::{ColumnDescriptor, Schema};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    TitleEmitted,
    SubHeaderEmitted,
    HeaderEmitted,
    /// Number of records emitted on the current sheet
    DataRow(usize),
    TotalsEmitted,
    SheetBoundary,
    Done,
}

/// First and last physical row of the current record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeSpan {
    pub first: u32,
    pub last: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutState {
    pub phase: Phase,
    pub sheet: usize,
    /// Next free row on the current sheet
    pub row: u32,
    pub span: MergeSpan,
}

impl LayoutState {
    pub fn start() -> Self {
        Self {
            phase: Phase::Init,
            sheet: 0,
            row: 0,
            span: MergeSpan::default(),
        }
    }

    pub fn records_on_sheet(&self) -> usize {
        match self.phase {
            Phase::DataRow(n) => n,
            _ => 0,
        }
    }
}

/// Where a physical column's value comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Index into `Schema::columns`
    Parent(usize),
    /// Index into the sub-collection's columns
    Child(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnSlot<'s> {
    pub index: u16,
    pub source: Source,
    pub column: &'s ColumnDescriptor,
}

/// A title row: one merged span across every physical column
#[derive(Debug, Clone, PartialEq)]
pub struct TitlePlacement {
    pub row: u32,
    pub merge: Option<CellRange>,
}

/// Sub-header row: parent names plus the sub-collection name spanning its columns
#[derive(Debug, Clone, PartialEq)]
pub struct SubHeaderPlacement {
    pub row: u32,
    /// Physical column holding the sub-collection's name
    pub label_col: u16,
    pub merge: Option<CellRange>,
}

/// Header row. With a sub-header above, parent headers merge upward.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderPlacement {
    pub row: u32,
    pub merges: Vec<CellRange>,
}

/// Rows taken by one record
#[derive(Debug, Clone, PartialEq)]
pub struct RecordPlacement {
    pub first_row: u32,
    pub last_row: u32,
    /// Vertical merges for parent columns flagged `needs_merge`
    pub merges: Vec<CellRange>,
}

impl RecordPlacement {
    pub fn rows(&self) -> Range<u32> {
        self.first_row..self.last_row + 1
    }
}

/// Layout of one schema, computed once per export
#[derive(Debug)]
pub struct LayoutPlanner<'s> {
    slots: Vec<ColumnSlot<'s>>,
    sub_range: Option<(u16, u16)>,
    has_title: bool,
    row_height: f64,
    max_rows: usize,
}

impl<'s> LayoutPlanner<'s> {
    pub fn new(schema: &'s Schema, has_title: bool, max_rows: usize) -> TabulaResult<Self> {
        if max_rows == 0 {
            return Err(TabulaError::Config(
                "max rows per sheet must be at least 1".to_string(),
            ));
        }
        let parents = schema.columns();
        let children = schema.sub_collection().map_or(&[][..], |s| s.columns.as_slice());
        let split = schema.sub_position().min(parents.len());

        let sources = (0..split)
            .map(Source::Parent)
            .chain((0..children.len()).map(Source::Child))
            .chain((split..parents.len()).map(Source::Parent));

        let mut slots = Vec::with_capacity(parents.len() + children.len());
        for (index, source) in sources.enumerate() {
            let index = u16::try_from(index)
                .map_err(|_| TabulaError::Layout("too many columns".to_string()))?;
            let column = match source {
                Source::Parent(i) => &parents[i],
                Source::Child(i) => &children[i],
            };
            slots.push(ColumnSlot {
                index,
                source,
                column,
            });
        }
        if slots.is_empty() {
            return Err(TabulaError::Schema(format!(
                "Schema '{}' has no columns to lay out",
                schema.name()
            )));
        }

        let sub_range = (!children.is_empty())
            .then(|| (split as u16, (split + children.len() - 1) as u16));

        Ok(Self {
            slots,
            sub_range,
            has_title,
            row_height: schema.row_height(),
            max_rows,
        })
    }

    pub fn slots(&self) -> &[ColumnSlot<'s>] {
        &self.slots
    }

    pub fn width(&self) -> u16 {
        self.slots.len() as u16
    }

    pub fn has_sub_collection(&self) -> bool {
        self.sub_range.is_some()
    }

    /// Row height in points, from the tallest column hint
    pub fn row_height(&self) -> f64 {
        self.row_height
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Record index ranges, one per sheet. No records still yields one sheet.
    pub fn chunks(&self, records: usize) -> Vec<Range<usize>> {
        if records == 0 {
            return vec![0..0];
        }
        (0..records)
            .step_by(self.max_rows)
            .map(|start| start..(start + self.max_rows).min(records))
            .collect()
    }

    /// `Users`, `Users1`, `Users2`, ...
    pub fn sheet_name(base: &str, index: usize) -> String {
        if index == 0 {
            base.to_string()
        } else {
            format!("{base}{index}")
        }
    }

    fn out_of_order(state: &LayoutState, step: &str) -> TabulaError {
        TabulaError::Layout(format!("cannot {step} in phase {:?}", state.phase))
    }

    pub fn emit_title(&self, state: LayoutState) -> TabulaResult<(LayoutState, TitlePlacement)> {
        if state.phase != Phase::Init || !self.has_title {
            return Err(Self::out_of_order(&state, "emit title"));
        }
        let row = state.row;
        let merge = (self.width() > 1).then(|| CellRange::new(row, row, 0, self.width() - 1));
        let next = LayoutState {
            phase: Phase::TitleEmitted,
            row: row + 1,
            ..state
        };
        Ok((next, TitlePlacement { row, merge }))
    }

    pub fn emit_sub_header(
        &self,
        state: LayoutState,
    ) -> TabulaResult<(LayoutState, SubHeaderPlacement)> {
        let ready = matches!(state.phase, Phase::Init | Phase::TitleEmitted);
        let Some((first, last)) = self.sub_range.filter(|_| ready) else {
            return Err(Self::out_of_order(&state, "emit sub-header"));
        };
        let row = state.row;
        let merge = (last > first).then(|| CellRange::new(row, row, first, last));
        let next = LayoutState {
            phase: Phase::SubHeaderEmitted,
            row: row + 1,
            ..state
        };
        Ok((
            next,
            SubHeaderPlacement {
                row,
                label_col: first,
                merge,
            },
        ))
    }

    pub fn emit_header(&self, state: LayoutState) -> TabulaResult<(LayoutState, HeaderPlacement)> {
        let ready = match state.phase {
            Phase::Init => !self.has_title && self.sub_range.is_none(),
            Phase::TitleEmitted => self.sub_range.is_none(),
            Phase::SubHeaderEmitted => true,
            _ => false,
        };
        if !ready {
            return Err(Self::out_of_order(&state, "emit header"));
        }
        let row = state.row;
        let merges = if state.phase == Phase::SubHeaderEmitted {
            self.slots
                .iter()
                .filter(|s| matches!(s.source, Source::Parent(_)))
                .map(|s| CellRange::new(row - 1, row, s.index, s.index))
                .collect()
        } else {
            Vec::new()
        };
        let next = LayoutState {
            phase: Phase::HeaderEmitted,
            row: row + 1,
            ..state
        };
        Ok((next, HeaderPlacement { row, merges }))
    }

    /// Place one record owning `children` sub-collection entries
    pub fn emit_record(
        &self,
        state: LayoutState,
        children: usize,
    ) -> TabulaResult<(LayoutState, RecordPlacement)> {
        let emitted = match state.phase {
            Phase::HeaderEmitted => 0,
            Phase::DataRow(n) => n,
            _ => return Err(Self::out_of_order(&state, "emit record")),
        };
        if emitted >= self.max_rows {
            return Err(TabulaError::Layout(format!(
                "sheet {} already holds {} records",
                state.sheet, self.max_rows
            )));
        }
        let rows = if self.sub_range.is_some() {
            children.max(1) as u32
        } else {
            1
        };
        let span = MergeSpan {
            first: state.row,
            last: state.row + rows - 1,
        };
        let merges = if rows > 1 {
            self.slots
                .iter()
                .filter(|s| matches!(s.source, Source::Parent(_)) && s.column.needs_merge)
                .map(|s| CellRange::new(span.first, span.last, s.index, s.index))
                .collect()
        } else {
            Vec::new()
        };
        let next = LayoutState {
            phase: Phase::DataRow(emitted + 1),
            row: span.last + 1,
            span,
            ..state
        };
        Ok((
            next,
            RecordPlacement {
                first_row: span.first,
                last_row: span.last,
                merges,
            },
        ))
    }

    pub fn emit_totals(&self, state: LayoutState) -> TabulaResult<(LayoutState, u32)> {
        if !matches!(state.phase, Phase::HeaderEmitted | Phase::DataRow(_)) {
            return Err(Self::out_of_order(&state, "emit totals"));
        }
        let row = state.row;
        Ok((
            LayoutState {
                phase: Phase::TotalsEmitted,
                row: row + 1,
                ..state
            },
            row,
        ))
    }

    /// Close the current sheet
    pub fn end_sheet(&self, state: LayoutState) -> TabulaResult<LayoutState> {
        if !matches!(
            state.phase,
            Phase::HeaderEmitted | Phase::DataRow(_) | Phase::TotalsEmitted
        ) {
            return Err(Self::out_of_order(&state, "end sheet"));
        }
        Ok(LayoutState {
            phase: Phase::SheetBoundary,
            ..state
        })
    }

    /// Move past a sheet boundary, to the next sheet or to `Done`
    pub fn next_sheet(&self, state: LayoutState, more: bool) -> TabulaResult<LayoutState> {
        if state.phase != Phase::SheetBoundary {
            return Err(Self::out_of_order(&state, "start next sheet"));
        }
        Ok(if more {
            LayoutState {
                phase: Phase::Init,
                sheet: state.sheet + 1,
                row: 0,
                span: MergeSpan::default(),
            }
        } else {
            LayoutState {
                phase: Phase::Done,
                ..state
            }
        })
    }
}
