//! Type conversion between wire strings and engine-native values
//!
//! Every cell and filter value crosses the capability boundary as a string.
//! This module classifies an engine's declared column type into a
//! [`TypeFamily`], parses strings into [`NativeValue`]s for binding, and
//! renders values back into their normalized wire form.

use crate::database::traits::PluginError;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;
use uuid::Uuid;

/// Coarse family of a declared column type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Integer,
    Float,
    Decimal,
    Boolean,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    Text,
}

impl TypeFamily {
    /// Classify an engine-native type name
    ///
    /// Matching ignores case, type parameters, `Nullable(..)` and
    /// `LowCardinality(..)` wrappers and the `unsigned`/`zerofill` modifiers.
    /// Anything unrecognized is text.
    pub fn classify(declared_type: &str) -> Self {
        let normalized = normalize_type_name(declared_type);
        let name = normalized.as_str();

        if name.ends_with("[]") || name.starts_with("array") {
            return TypeFamily::Text;
        }

        match name {
            "bool" | "boolean" => TypeFamily::Boolean,
            "real" | "float" | "double" | "double precision" | "float4" | "float8" | "float32"
            | "float64" => TypeFamily::Float,
            "numeric" | "decimal" | "money" | "int128" | "int256" | "uint128" | "uint256" => {
                TypeFamily::Decimal
            }
            "date" | "date32" => TypeFamily::Date,
            "time" | "time without time zone" => TypeFamily::Time,
            "timestamp" | "timestamp without time zone" | "datetime" | "datetime64" => {
                TypeFamily::Timestamp
            }
            "timestamptz" | "timestamp with time zone" => TypeFamily::TimestampTz,
            "uuid" => TypeFamily::Uuid,
            "json" | "jsonb" => TypeFamily::Json,
            _ if name.starts_with("decimal") => TypeFamily::Decimal,
            _ if is_integer_name(name) => TypeFamily::Integer,
            _ => TypeFamily::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TypeFamily::Integer => "integer",
            TypeFamily::Float => "float",
            TypeFamily::Decimal => "decimal",
            TypeFamily::Boolean => "boolean",
            TypeFamily::Date => "date",
            TypeFamily::Time => "time",
            TypeFamily::Timestamp => "timestamp",
            TypeFamily::TimestampTz => "timestamp with time zone",
            TypeFamily::Uuid => "uuid",
            TypeFamily::Json => "json",
            TypeFamily::Text => "text",
        }
    }
}

fn normalize_type_name(declared_type: &str) -> String {
    let mut name = declared_type.trim().to_ascii_lowercase();

    for wrapper in ["nullable(", "lowcardinality("] {
        while let Some(inner) = name.strip_prefix(wrapper).and_then(|rest| rest.strip_suffix(')')) {
            name = inner.trim().to_string();
        }
    }

    let mut stripped = String::with_capacity(name.len());
    let mut depth = 0usize;
    for character in name.chars() {
        match character {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => stripped.push(character),
            _ => {}
        }
    }

    stripped
        .split_whitespace()
        .filter(|word| *word != "unsigned" && *word != "zerofill")
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_integer_name(name: &str) -> bool {
    if name.contains("interval") || name.contains("point") {
        return false;
    }

    matches!(
        name,
        "smallserial" | "serial" | "bigserial" | "serial2" | "serial4" | "serial8" | "year"
    ) || name.starts_with("int")
        || name.starts_with("uint")
        || name.ends_with("int")
        || name.ends_with("integer")
}

/// A typed value ready to be bound to a native statement
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary-precision number kept in its canonical textual form
    Decimal(String),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Uuid(Uuid),
    Json(Value),
}

impl NativeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, NativeValue::Null)
    }
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

/// Parse a wire string as the given declared type
pub fn convert_value(column: &str, declared_type: &str, raw: &str) -> Result<NativeValue, PluginError> {
    let family = TypeFamily::classify(declared_type);
    parse_family(family, raw).ok_or_else(|| PluginError::Conversion {
        column: column.to_string(),
        attempted_type: declared_type.to_string(),
        raw_value: raw.to_string(),
    })
}

fn parse_family(family: TypeFamily, raw: &str) -> Option<NativeValue> {
    let trimmed = raw.trim();

    match family {
        TypeFamily::Text => Some(NativeValue::Text(raw.to_string())),
        TypeFamily::Integer => {
            let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
            match unsigned.parse::<i64>() {
                Ok(value) => Some(NativeValue::Int(value)),
                Err(_) => unsigned
                    .parse::<u64>()
                    .ok()
                    .map(|value| NativeValue::Decimal(value.to_string())),
            }
        }
        TypeFamily::Float => trimmed
            .parse::<f64>()
            .ok()
            .filter(|value| !value.is_nan() || trimmed.eq_ignore_ascii_case("nan"))
            .map(NativeValue::Float),
        TypeFamily::Decimal => parse_decimal(trimmed).map(NativeValue::Decimal),
        TypeFamily::Boolean => parse_bool(trimmed).map(NativeValue::Bool),
        TypeFamily::Date => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .ok()
            .map(NativeValue::Date),
        TypeFamily::Time => TIME_FORMATS
            .iter()
            .find_map(|format| NaiveTime::parse_from_str(trimmed, format).ok())
            .map(NativeValue::Time),
        TypeFamily::Timestamp => parse_timestamp(trimmed).map(NativeValue::Timestamp),
        TypeFamily::TimestampTz => parse_timestamp_tz(trimmed).map(NativeValue::TimestampTz),
        TypeFamily::Uuid => Uuid::parse_str(trimmed).ok().map(NativeValue::Uuid),
        TypeFamily::Json => serde_json::from_str(trimmed).ok().map(NativeValue::Json),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" | "on" => Some(true),
        "false" | "f" | "no" | "n" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Validate a decimal literal and strip redundant sign and zero padding
fn parse_decimal(raw: &str) -> Option<String> {
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.strip_prefix('+').unwrap_or(raw)),
    };

    let (integer_part, fraction_part) = match digits.split_once('.') {
        Some((integer_part, fraction_part)) => (integer_part, Some(fraction_part)),
        None => (digits, None),
    };

    let all_digits = |part: &str| part.chars().all(|character| character.is_ascii_digit());
    if !all_digits(integer_part) || !fraction_part.map(all_digits).unwrap_or(true) {
        return None;
    }
    if integer_part.is_empty() && fraction_part.map(str::is_empty).unwrap_or(true) {
        return None;
    }

    let integer_part = integer_part.trim_start_matches('0');
    let integer_part = if integer_part.is_empty() { "0" } else { integer_part };
    let fraction_part = fraction_part.map(|part| part.trim_end_matches('0')).unwrap_or("");

    let is_zero = integer_part == "0" && fraction_part.is_empty();
    let mut normalized = String::new();
    if negative && !is_zero {
        normalized.push('-');
    }
    normalized.push_str(integer_part);
    if !fraction_part.is_empty() {
        normalized.push('.');
        normalized.push_str(fraction_part);
    }
    Some(normalized)
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|value| value.naive_utc()))
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

fn parse_timestamp_tz(raw: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .or_else(|| DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z").ok())
        .or_else(|| parse_timestamp(raw).map(|naive| naive.and_utc().fixed_offset()))
}

/// Render a typed value in its normalized wire form; NULL is the empty string
pub fn to_wire_string(value: &NativeValue) -> String {
    match value {
        NativeValue::Null => String::new(),
        NativeValue::Bool(value) => value.to_string(),
        NativeValue::Int(value) => value.to_string(),
        NativeValue::Float(value) => value.to_string(),
        NativeValue::Decimal(value) => value.clone(),
        NativeValue::Text(value) => value.clone(),
        NativeValue::Date(value) => value.format("%Y-%m-%d").to_string(),
        NativeValue::Time(value) => value.format("%H:%M:%S%.f").to_string(),
        NativeValue::Timestamp(value) => value.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        NativeValue::TimestampTz(value) => value.to_rfc3339(),
        NativeValue::Uuid(value) => value.hyphenated().to_string(),
        NativeValue::Json(value) => value.to_string(),
    }
}

/// Best-effort typing for engines without declared column types
pub fn infer_value(raw: &str) -> NativeValue {
    let trimmed = raw.trim();

    if let Ok(value) = trimmed.parse::<i64>() {
        return NativeValue::Int(value);
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        if value.is_finite() {
            return NativeValue::Float(value);
        }
    }
    match trimmed {
        "true" => NativeValue::Bool(true),
        "false" => NativeValue::Bool(false),
        _ => NativeValue::Text(raw.to_string()),
    }
}

/// Normalize a cell read back from an engine
///
/// Cells that do not parse as their declared type are passed through
/// unchanged.
pub fn normalize_cell(declared_type: &str, raw: &str) -> String {
    match TypeFamily::classify(declared_type) {
        TypeFamily::Text | TypeFamily::Json => raw.to_string(),
        family => parse_family(family, raw)
            .map(|value| to_wire_string(&value))
            .unwrap_or_else(|| raw.to_string()),
    }
}
