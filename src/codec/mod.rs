//! Cell value codec
//!
//! Converts typed field values into cell values on export and back on
//! import, following each column's formatting metadata.

pub mod dates;
pub mod expression;
mod handler;

pub use handler::{BuiltinHandler, CellHandler};

use crate::dict::DictionaryCache;
use crate::document::ImageKind;
use crate::schema::ColumnDescriptor;
use crate::types::{format_double, CellKind, CellValue, FieldType, FieldValue};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::debug;

/// Characters that make a spreadsheet application evaluate a cell
pub const FORMULA_TRIGGERS: &[char] = &['=', '-', '+', '@'];

/// Non-printing prefix that keeps a triggering string literal
pub const NEUTRALIZER: char = '\t';

/// Result of encoding one field
#[derive(Debug, Clone, PartialEq)]
pub enum Encoded {
    Cell(CellValue),
    Picture(Vec<u8>, ImageKind),
}

impl Encoded {
    fn text(s: String) -> Self {
        if s.is_empty() {
            Encoded::Cell(CellValue::Empty)
        } else {
            Encoded::Cell(CellValue::Text(neutralize(s)))
        }
    }
}

/// Prefix strings that start with a formula trigger
pub fn neutralize(s: String) -> String {
    if s.starts_with(FORMULA_TRIGGERS) {
        let mut out = String::with_capacity(s.len() + 1);
        out.push(NEUTRALIZER);
        out.push_str(&s);
        out
    } else {
        s
    }
}

/// Undo [`neutralize`]
pub fn strip_neutralizer(s: &str) -> &str {
    match s.strip_prefix(NEUTRALIZER) {
        Some(rest) if rest.starts_with(FORMULA_TRIGGERS) => rest,
        _ => s,
    }
}

/// Encoder/decoder scoped to one export or import call
pub struct CellCodec<'a> {
    dicts: DictionaryCache<'a>,
}

impl<'a> CellCodec<'a> {
    pub fn new(dicts: DictionaryCache<'a>) -> Self {
        Self { dicts }
    }

    pub fn dictionaries(&mut self) -> &mut DictionaryCache<'a> {
        &mut self.dicts
    }

    //==========================================================================
    // Encode
    //==========================================================================

    /// Field value to cell value.
    ///
    /// Precedence: date format, expression table, dictionary, decimal scale,
    /// custom handler, then the column's cell kind.
    pub fn encode(&mut self, value: &FieldValue, column: &ColumnDescriptor) -> Encoded {
        if !value.is_null() {
            if let Some(pattern) = column.date_format.as_deref().filter(|p| !p.is_empty()) {
                return Encoded::text(format_date(value, pattern));
            }
            if let Some(exp) = column.expression.as_deref().filter(|e| !e.is_empty()) {
                let label = expression::convert_by_exp(&value.to_text(), exp, &column.separator);
                return Encoded::text(label);
            }
            if let Some(dict) = column.dictionary_type.as_deref().filter(|d| !d.is_empty()) {
                let label = self.dicts.label(dict, &value.to_text(), &column.separator);
                return Encoded::text(label);
            }
            if let Some(scale) = column.scale {
                if let Some(decimal) = as_decimal(value, column.field_type) {
                    let rounded = decimal.round_dp_with_strategy(scale, column.rounding.strategy());
                    if let Some(n) = rounded.to_f64() {
                        return Encoded::Cell(CellValue::Number(n));
                    }
                }
            }
        }
        if let Some(handler) = &column.handler {
            return Encoded::text(handler.format(value, &column.handler_args));
        }

        match column.cell_kind {
            CellKind::String | CellKind::Text => {
                let text = match value.to_text() {
                    t if t.is_empty() => column.default_value.clone(),
                    t => t + &column.suffix,
                };
                Encoded::text(text)
            }
            CellKind::Numeric => encode_numeric(value),
            CellKind::Image => encode_image(value),
        }
    }

    //==========================================================================
    // Decode
    //==========================================================================

    /// Cell value to field value for `column.field_type`.
    ///
    /// Expression and dictionary labels are mapped back to codes before the
    /// type conversion. Errors carry a short reason; the caller adds the row.
    pub fn decode(
        &mut self,
        cell: &CellValue,
        picture: Option<&[u8]>,
        column: &ColumnDescriptor,
    ) -> Result<FieldValue, String> {
        if column.cell_kind == CellKind::Image || column.field_type == FieldType::Image {
            return Ok(picture.map_or(FieldValue::Null, |b| FieldValue::Image(b.to_vec())));
        }
        if cell.is_blank() {
            return Ok(FieldValue::Null);
        }

        let mut cell = match cell {
            CellValue::Text(s) => CellValue::Text(strip_neutralizer(s).to_string()),
            other => other.clone(),
        };
        if !column.suffix.is_empty() {
            if let CellValue::Text(s) = &cell {
                if let Some(stripped) = s.strip_suffix(column.suffix.as_str()) {
                    cell = CellValue::Text(stripped.to_string());
                }
            }
        }

        if let Some(exp) = column.expression.as_deref().filter(|e| !e.is_empty()) {
            let code = expression::reverse_by_exp(&cell_text(&cell), exp, &column.separator);
            return convert(CellValue::Text(code), column);
        }
        if let Some(dict) = column.dictionary_type.as_deref().filter(|d| !d.is_empty()) {
            let code = self.dicts.code(dict, &cell_text(&cell), &column.separator);
            return convert(CellValue::Text(code), column);
        }
        if let Some(handler) = &column.handler {
            let parsed = handler.parse(&cell_text(&cell), &column.handler_args);
            return match parsed {
                FieldValue::Text(s) => convert(CellValue::Text(s), column),
                other => Ok(other),
            };
        }
        convert(cell, column)
    }
}

fn format_date(value: &FieldValue, pattern: &str) -> String {
    let dt = match value {
        FieldValue::Date(d) => Some(d.and_time(chrono::NaiveTime::MIN)),
        FieldValue::DateTime(dt) => Some(*dt),
        FieldValue::Text(s) => dates::parse_lenient(s, None),
        _ => None,
    };
    match dt {
        Some(dt) => dates::format_datetime(&dt, pattern),
        None => value.to_text(),
    }
}

fn as_decimal(value: &FieldValue, field_type: FieldType) -> Option<Decimal> {
    match value {
        FieldValue::Decimal(d) => Some(*d),
        FieldValue::Double(v) if field_type == FieldType::Decimal => Decimal::from_f64(*v),
        FieldValue::Text(s) if field_type == FieldType::Decimal => Decimal::from_str(s.trim()).ok(),
        FieldValue::Int(v) if field_type == FieldType::Decimal => Some(Decimal::from(*v)),
        FieldValue::Long(v) if field_type == FieldType::Decimal => Some(Decimal::from(*v)),
        _ => None,
    }
}

fn encode_numeric(value: &FieldValue) -> Encoded {
    match value {
        FieldValue::Null => Encoded::Cell(CellValue::Empty),
        FieldValue::Bool(b) => Encoded::Cell(CellValue::Bool(*b)),
        other => {
            let text = other.to_text();
            let parsed = if text.contains('.') {
                text.trim().parse::<f64>().ok()
            } else {
                text.trim().parse::<i64>().ok().map(|i| i as f64)
            };
            match parsed {
                Some(n) => Encoded::Cell(CellValue::Number(n)),
                None => Encoded::text(text),
            }
        }
    }
}

fn encode_image(value: &FieldValue) -> Encoded {
    let bytes = match value {
        FieldValue::Image(bytes) => Some(bytes.clone()),
        FieldValue::Text(path) if !path.trim().is_empty() => match std::fs::read(path.trim()) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!(path = %path, error = %e, "Image not readable; cell left empty");
                None
            }
        },
        _ => None,
    };
    match bytes {
        Some(bytes) if !bytes.is_empty() => {
            let kind = ImageKind::sniff(&bytes);
            Encoded::Picture(bytes, kind)
        }
        _ => Encoded::Cell(CellValue::Empty),
    }
}

/// Text view of a cell used for label lookups. Whole numbers drop `.0`.
fn cell_text(cell: &CellValue) -> String {
    match cell {
        CellValue::Number(n) => format_double(*n),
        CellValue::DateTime(dt) => datetime_text(dt),
        other => other.to_string(),
    }
}

fn datetime_text(dt: &chrono::NaiveDateTime) -> String {
    if dt.time() == chrono::NaiveTime::MIN {
        dt.format("%Y-%m-%d").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

fn is_integral_text(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Numeric cell as an i64, refusing fractions and values outside the range
fn whole_number(n: f64) -> Result<i64, String> {
    // 2^63 is exact in f64; anything at or above it overflows i64
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if n.fract() != 0.0 || !n.is_finite() {
        return Err(format!("'{n}' is not an integer"));
    }
    if n < -LIMIT || n >= LIMIT {
        return Err(format!("{n} is out of range for a long"));
    }
    Ok(n as i64)
}

/// Type-directed conversion of a cleaned cell
fn convert(cell: CellValue, column: &ColumnDescriptor) -> Result<FieldValue, String> {
    if cell.is_blank() {
        return Ok(FieldValue::Null);
    }
    match column.field_type {
        FieldType::Text => Ok(FieldValue::Text(match &cell {
            CellValue::Text(s) => match column.date_format.as_deref() {
                Some(p) if !p.is_empty() => dates::parse_lenient(s, Some(p))
                    .map_or_else(|| s.clone(), |dt| dates::format_datetime(&dt, p)),
                _ => s.strip_suffix(".0").unwrap_or(s).to_string(),
            },
            CellValue::DateTime(dt) => match column.date_format.as_deref() {
                Some(p) if !p.is_empty() => dates::format_datetime(dt, p),
                _ => datetime_text(dt),
            },
            other => cell_text(other),
        })),
        FieldType::Int => match &cell {
            CellValue::Number(n) => whole_number(*n).and_then(|v| {
                i32::try_from(v)
                    .map(FieldValue::Int)
                    .map_err(|_| format!("{n} is out of range for an integer"))
            }),
            other => {
                let text = cell_text(other);
                let text = text.trim();
                let text = text.strip_suffix(".0").unwrap_or(text);
                if is_integral_text(text) {
                    text.parse()
                        .map(FieldValue::Int)
                        .map_err(|e| format!("'{text}': {e}"))
                } else {
                    Err(format!("'{text}' is not an integer"))
                }
            }
        },
        FieldType::Long => match &cell {
            CellValue::Number(n) => whole_number(*n).map(FieldValue::Long),
            other => {
                let text = cell_text(other);
                let text = text.trim();
                let text = text.strip_suffix(".0").unwrap_or(text);
                if is_integral_text(text) {
                    text.parse()
                        .map(FieldValue::Long)
                        .map_err(|e| format!("'{text}': {e}"))
                } else {
                    Err(format!("'{text}' is not an integer"))
                }
            }
        },
        FieldType::Double => match &cell {
            CellValue::Number(n) => Ok(FieldValue::Double(*n)),
            other => {
                let text = cell_text(other);
                text.trim()
                    .parse()
                    .map(FieldValue::Double)
                    .map_err(|_| format!("'{text}' is not a number"))
            }
        },
        FieldType::Decimal => {
            let text = cell_text(&cell);
            Decimal::from_str(text.trim())
                .or_else(|_| Decimal::from_scientific(text.trim()))
                .map(FieldValue::Decimal)
                .map_err(|_| format!("'{text}' is not a decimal"))
        }
        FieldType::Bool => Ok(FieldValue::Bool(match &cell {
            CellValue::Bool(b) => *b,
            CellValue::Number(n) => *n != 0.0,
            other => parse_bool(&cell_text(other)),
        })),
        FieldType::Date | FieldType::DateTime => {
            let dt = match &cell {
                CellValue::DateTime(dt) => Some(*dt),
                CellValue::Number(n) => dates::from_serial(*n),
                other => dates::parse_lenient(&cell_text(other), column.date_format.as_deref()),
            };
            let dt = dt.ok_or_else(|| format!("'{}' is not a date", cell_text(&cell)))?;
            Ok(if column.field_type == FieldType::Date {
                FieldValue::Date(dt.date())
            } else {
                FieldValue::DateTime(dt)
            })
        }
        FieldType::Image => Ok(FieldValue::Null),
    }
}

/// Lenient boolean text. Unrecognized text reads as false.
pub fn parse_bool(text: &str) -> bool {
    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "y" | "ok" | "1" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::{NoDictionary, StaticDictionary};
    use crate::types::RoundingMode;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn encode(value: FieldValue, column: &ColumnDescriptor) -> Encoded {
        CellCodec::new(DictionaryCache::new(&NoDictionary)).encode(&value, column)
    }

    fn decode(cell: CellValue, column: &ColumnDescriptor) -> Result<FieldValue, String> {
        CellCodec::new(DictionaryCache::new(&NoDictionary)).decode(&cell, None, column)
    }

    fn text(s: &str) -> Encoded {
        Encoded::Cell(CellValue::Text(s.to_string()))
    }

    #[test]
    fn test_formula_string_is_neutralized() {
        let col = ColumnDescriptor::new("note", "Note");
        assert_eq!(encode("=SUM(A1:A2)".into(), &col), text("\t=SUM(A1:A2)"));
        assert_eq!(encode("+1".into(), &col), text("\t+1"));
        assert_eq!(encode("@cmd".into(), &col), text("\t@cmd"));
        assert_eq!(encode("plain".into(), &col), text("plain"));
    }

    #[test]
    fn test_neutralized_text_round_trips() {
        let col = ColumnDescriptor::new("note", "Note");
        let decoded = decode(CellValue::Text("\t=SUM(A1:A2)".into()), &col).unwrap();
        assert_eq!(decoded, FieldValue::Text("=SUM(A1:A2)".into()));
        // a leading tab not followed by a trigger is data
        let kept = decode(CellValue::Text("\tindent".into()), &col).unwrap();
        assert_eq!(kept, FieldValue::Text("\tindent".into()));
    }

    #[test]
    fn test_default_value_and_suffix() {
        let col = ColumnDescriptor::new("w", "Weight").suffix("kg").default_value("n/a");
        assert_eq!(encode(FieldValue::Int(70), &col), text("70kg"));
        assert_eq!(encode(FieldValue::Null, &col), text("n/a"));
        assert_eq!(
            decode(CellValue::Text("70kg".into()), &col).unwrap(),
            FieldValue::Text("70".into())
        );
    }

    #[test]
    fn test_date_format_takes_precedence() {
        let col = ColumnDescriptor::new("born", "Born")
            .date_format("yyyy/MM/dd")
            .expression("x=y");
        let d = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
        assert_eq!(encode(FieldValue::Date(d), &col), text("2020/01/02"));
    }

    #[test]
    fn test_expression_forward_and_reverse() {
        let col = ColumnDescriptor::new("sex", "Sex")
            .expression("0=Male,1=Female")
            .field_type(FieldType::Int);
        assert_eq!(encode(FieldValue::Int(1), &col), text("Female"));
        assert_eq!(
            decode(CellValue::Text("Female".into()), &col).unwrap(),
            FieldValue::Int(1)
        );
    }

    #[test]
    fn test_dictionary_label_cached() {
        let dict = StaticDictionary::new().with_entry("status", "A", "Active");
        let mut codec = CellCodec::new(DictionaryCache::new(&dict));
        let col = ColumnDescriptor::new("status", "Status").dictionary("status");
        for _ in 0..3 {
            assert_eq!(codec.encode(&"A".into(), &col), text("Active"));
        }
        assert_eq!(codec.dictionaries().queries(), 1);
        assert_eq!(
            codec.decode(&CellValue::Text("Active".into()), None, &col).unwrap(),
            FieldValue::Text("A".into())
        );
    }

    #[test]
    fn test_decimal_scale_rounds() {
        let col = ColumnDescriptor::new("price", "Price")
            .field_type(FieldType::Decimal)
            .scale(2, RoundingMode::HalfUp);
        let v = FieldValue::Decimal(Decimal::from_str("3.14159").unwrap());
        assert_eq!(encode(v, &col), Encoded::Cell(CellValue::Number(3.14)));
        let half = FieldValue::Decimal(Decimal::from_str("2.345").unwrap());
        assert_eq!(encode(half, &col), Encoded::Cell(CellValue::Number(2.35)));
    }

    #[test]
    fn test_handler_formats() {
        let col = ColumnDescriptor::new("phone", "Phone")
            .handler(BuiltinHandler::Mask.into_handler(), vec![]);
        assert_eq!(encode("13812345678".into(), &col), text("138****5678"));
        let upper = ColumnDescriptor::new("code", "Code")
            .handler(Arc::new(BuiltinHandler::Uppercase), vec![]);
        assert_eq!(encode("ab".into(), &upper), text("AB"));
    }

    #[test]
    fn test_numeric_cells() {
        let col = ColumnDescriptor::new("n", "N").kind(CellKind::Numeric);
        assert_eq!(encode(FieldValue::Int(5), &col), Encoded::Cell(CellValue::Number(5.0)));
        assert_eq!(encode(FieldValue::Double(5.0), &col), Encoded::Cell(CellValue::Number(5.0)));
        assert_eq!(encode("2.5".into(), &col), Encoded::Cell(CellValue::Number(2.5)));
        assert_eq!(encode(FieldValue::Null, &col), Encoded::Cell(CellValue::Empty));
        assert_eq!(encode("n/a".into(), &col), text("n/a"));
    }

    #[test]
    fn test_image_encoding() {
        let col = ColumnDescriptor::new("avatar", "Avatar").kind(CellKind::Image);
        let png = vec![0x89, b'P', b'N', b'G', 1, 2];
        assert_eq!(
            encode(FieldValue::Image(png.clone()), &col),
            Encoded::Picture(png, ImageKind::Png)
        );
        // unreadable path degrades to an empty cell
        assert_eq!(
            encode("/no/such/file.png".into(), &col),
            Encoded::Cell(CellValue::Empty)
        );
    }

    #[test]
    fn test_decode_numbers_by_type() {
        let text_col = ColumnDescriptor::new("code", "Code");
        assert_eq!(
            decode(CellValue::Number(42.0), &text_col).unwrap(),
            FieldValue::Text("42".into())
        );
        assert_eq!(
            decode(CellValue::Text("42.0".into()), &text_col).unwrap(),
            FieldValue::Text("42".into())
        );
        let int_col = ColumnDescriptor::new("age", "Age").field_type(FieldType::Int);
        assert_eq!(decode(CellValue::Number(30.0), &int_col).unwrap(), FieldValue::Int(30));
        assert_eq!(decode(CellValue::Text("-7".into()), &int_col).unwrap(), FieldValue::Int(-7));
        assert!(decode(CellValue::Text("thirty".into()), &int_col).is_err());
        assert!(decode(CellValue::Number(1.5), &int_col).is_err());
        let dec_col = ColumnDescriptor::new("p", "P").field_type(FieldType::Decimal);
        assert_eq!(
            decode(CellValue::Number(2.5), &dec_col).unwrap(),
            FieldValue::Decimal(Decimal::from_str("2.5").unwrap())
        );
    }

    #[test]
    fn test_decode_long_rejects_lossy_numbers() {
        let col = ColumnDescriptor::new("id", "ID").field_type(FieldType::Long);
        assert_eq!(
            decode(CellValue::Number(9_007_199_254_740_992.0), &col).unwrap(),
            FieldValue::Long(9_007_199_254_740_992)
        );
        assert_eq!(decode(CellValue::Number(-3.0), &col).unwrap(), FieldValue::Long(-3));
        assert!(decode(CellValue::Number(1.5), &col).is_err());
        assert!(decode(CellValue::Number(1e19), &col).is_err());
        assert!(decode(CellValue::Number(-1e19), &col).is_err());
        assert!(decode(CellValue::Number(f64::INFINITY), &col).is_err());

        let int_col = ColumnDescriptor::new("n", "N").field_type(FieldType::Int);
        let err = decode(CellValue::Number(3e9), &int_col).unwrap_err();
        assert!(err.contains("out of range"));
    }

    #[test]
    fn test_decode_dates() {
        let col = ColumnDescriptor::new("d", "D").field_type(FieldType::Date);
        let expected = FieldValue::Date(NaiveDate::from_ymd_opt(2023, 3, 15).unwrap());
        assert_eq!(decode(CellValue::Number(45000.0), &col).unwrap(), expected);
        assert_eq!(decode(CellValue::Text("2023/03/15".into()), &col).unwrap(), expected);
        assert!(decode(CellValue::Text("someday".into()), &col).is_err());
    }

    #[test]
    fn test_decode_bool_lenient() {
        let col = ColumnDescriptor::new("b", "B").field_type(FieldType::Bool);
        assert_eq!(decode(CellValue::Text("Yes".into()), &col).unwrap(), FieldValue::Bool(true));
        assert_eq!(decode(CellValue::Text("off".into()), &col).unwrap(), FieldValue::Bool(false));
        assert_eq!(decode(CellValue::Bool(true), &col).unwrap(), FieldValue::Bool(true));
    }

    #[test]
    fn test_decode_blank_is_null() {
        let col = ColumnDescriptor::new("age", "Age").field_type(FieldType::Int);
        assert_eq!(decode(CellValue::Empty, &col).unwrap(), FieldValue::Null);
        assert_eq!(decode(CellValue::Text("  ".into()), &col).unwrap(), FieldValue::Null);
    }

    #[test]
    fn test_decode_image_from_picture() {
        let col = ColumnDescriptor::new("avatar", "Avatar").kind(CellKind::Image);
        let mut codec = CellCodec::new(DictionaryCache::new(&NoDictionary));
        assert_eq!(
            codec.decode(&CellValue::Empty, Some(&[1, 2]), &col).unwrap(),
            FieldValue::Image(vec![1, 2])
        );
        assert_eq!(codec.decode(&CellValue::Empty, None, &col).unwrap(), FieldValue::Null);
    }
}
