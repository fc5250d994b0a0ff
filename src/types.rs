use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

//==============================================================================
// Field values (record side)
//==============================================================================

/// A typed value read from or assigned to a record field
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Null,
    Text(String),
    Int(i32),
    Long(i64),
    Double(f64),
    Decimal(Decimal),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    /// Raw picture bytes for image columns
    Image(Vec<u8>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Default textual form. Whole doubles print without a trailing `.0`.
    pub fn to_text(&self) -> String {
        match self {
            FieldValue::Null | FieldValue::Image(_) => String::new(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Int(v) => v.to_string(),
            FieldValue::Long(v) => v.to_string(),
            FieldValue::Double(v) => format_double(*v),
            FieldValue::Decimal(d) => d.to_string(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            FieldValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    /// Numeric view used by numeric cells and statistics
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(f64::from(*v)),
            FieldValue::Long(v) => Some(*v as f64),
            FieldValue::Double(v) => Some(*v),
            FieldValue::Decimal(d) => d.to_string().parse().ok(),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Int(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Long(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Double(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<Decimal> for FieldValue {
    fn from(value: Decimal) -> Self {
        FieldValue::Decimal(value)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Date(value)
    }
}

impl From<NaiveDateTime> for FieldValue {
    fn from(value: NaiveDateTime) -> Self {
        FieldValue::DateTime(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// Format a double, removing a trailing `.0` on whole values
pub fn format_double(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

//==============================================================================
// Cell values (document side)
//==============================================================================

/// The value stored in one spreadsheet cell
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// A date-formatted numeric cell, already converted to a calendar value
    DateTime(NaiveDateTime),
    Error(String),
}

impl CellValue {
    /// Blank cells and whitespace-only strings count as blank
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Number(n) => write!(f, "{}", format_double(*n)),
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            CellValue::Error(e) => write!(f, "#{e}"),
        }
    }
}

//==============================================================================
// Column metadata enums
//==============================================================================

/// Declared Rust-side type of a field, used to decode imported cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    #[serde(alias = "string")]
    Text,
    #[serde(alias = "integer")]
    Int,
    Long,
    #[serde(alias = "float", alias = "number")]
    Double,
    Decimal,
    #[serde(alias = "boolean")]
    Bool,
    Date,
    #[serde(alias = "date_time")]
    DateTime,
    Image,
}

/// How a column's cells are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    #[default]
    String,
    Numeric,
    Image,
    /// String cell with the text (`@`) number format
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Align {
    General,
    Left,
    #[default]
    Center,
    Right,
}

/// Rounding applied to decimal-with-scale columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    Up,
    Down,
    Ceiling,
    Floor,
    HalfUp,
    HalfDown,
    #[default]
    HalfEven,
}

impl RoundingMode {
    pub fn strategy(self) -> RoundingStrategy {
        match self {
            RoundingMode::Up => RoundingStrategy::AwayFromZero,
            RoundingMode::Down => RoundingStrategy::ToZero,
            RoundingMode::Ceiling => RoundingStrategy::ToPositiveInfinity,
            RoundingMode::Floor => RoundingStrategy::ToNegativeInfinity,
            RoundingMode::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            RoundingMode::HalfDown => RoundingStrategy::MidpointTowardZero,
            RoundingMode::HalfEven => RoundingStrategy::MidpointNearestEven,
        }
    }
}

/// 24-bit RGB colour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb(pub u32);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0x000000);
    pub const WHITE: Rgb = Rgb(0xFFFFFF);
    pub const GREY_25: Rgb = Rgb(0xC0C0C0);
    pub const GREY_50: Rgb = Rgb(0x808080);
    pub const RED: Rgb = Rgb(0xFF0000);
    pub const GREEN: Rgb = Rgb(0x008000);
    pub const BLUE: Rgb = Rgb(0x0000FF);
    pub const YELLOW: Rgb = Rgb(0xFFFF00);
}

impl FromStr for Rgb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(hex) = trimmed.strip_prefix('#') {
            if hex.len() != 6 {
                return Err(format!("Invalid colour '{s}': expected #RRGGBB"));
            }
            return u32::from_str_radix(hex, 16)
                .map(Rgb)
                .map_err(|_| format!("Invalid colour '{s}'"));
        }
        match trimmed.to_lowercase().replace(['_', '-', ' '], "").as_str() {
            "black" => Ok(Rgb::BLACK),
            "white" => Ok(Rgb::WHITE),
            "grey25" | "gray25" | "grey25percent" | "gray25percent" => Ok(Rgb::GREY_25),
            "grey50" | "gray50" | "grey50percent" | "gray50percent" => Ok(Rgb::GREY_50),
            "red" => Ok(Rgb::RED),
            "green" => Ok(Rgb::GREEN),
            "blue" => Ok(Rgb::BLUE),
            "yellow" => Ok(Rgb::YELLOW),
            _ => Err(format!("Unknown colour '{s}'")),
        }
    }
}

impl TryFrom<String> for Rgb {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rgb> for String {
    fn from(value: Rgb) -> Self {
        format!("#{:06X}", value.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_text_drops_trailing_zero() {
        assert_eq!(FieldValue::Double(5.0).to_text(), "5");
        assert_eq!(FieldValue::Double(2.5).to_text(), "2.5");
        assert_eq!(FieldValue::Int(-3).to_text(), "-3");
        assert_eq!(FieldValue::Null.to_text(), "");
    }

    #[test]
    fn test_to_text_dates() {
        let d = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        assert_eq!(FieldValue::Date(d).to_text(), "2025-03-09");
        let dt = d.and_hms_opt(8, 5, 0).unwrap();
        assert_eq!(FieldValue::DateTime(dt).to_text(), "2025-03-09 08:05:00");
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(FieldValue::Text(" 12.5 ".into()).as_f64(), Some(12.5));
        assert_eq!(FieldValue::Text("abc".into()).as_f64(), None);
        assert_eq!(FieldValue::Decimal(Decimal::new(150, 2)).as_f64(), Some(1.5));
        assert_eq!(FieldValue::Bool(true).as_f64(), None);
    }

    #[test]
    fn test_option_into_field_value() {
        let none: Option<i32> = None;
        assert_eq!(FieldValue::from(none), FieldValue::Null);
        assert_eq!(FieldValue::from(Some(4)), FieldValue::Int(4));
    }

    #[test]
    fn test_cell_blank() {
        assert!(CellValue::Empty.is_blank());
        assert!(CellValue::Text("   ".into()).is_blank());
        assert!(!CellValue::Number(0.0).is_blank());
        assert!(!CellValue::Bool(false).is_blank());
    }

    #[test]
    fn test_rgb_parse() {
        assert_eq!("#FF0000".parse::<Rgb>().unwrap(), Rgb::RED);
        assert_eq!("grey_50_percent".parse::<Rgb>().unwrap(), Rgb::GREY_50);
        assert!("#FFF".parse::<Rgb>().is_err());
        assert!("mauve".parse::<Rgb>().is_err());
        assert_eq!(String::from(Rgb::WHITE), "#FFFFFF");
    }

    #[test]
    fn test_rounding_strategy_mapping() {
        let d = Decimal::new(125, 2); // 1.25
        assert_eq!(
            d.round_dp_with_strategy(1, RoundingMode::HalfUp.strategy()),
            Decimal::new(13, 1)
        );
        assert_eq!(
            d.round_dp_with_strategy(1, RoundingMode::HalfEven.strategy()),
            Decimal::new(12, 1)
        );
        assert_eq!(
            d.round_dp_with_strategy(1, RoundingMode::Down.strategy()),
            Decimal::new(12, 1)
        );
    }
}
