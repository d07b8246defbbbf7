//! Decoding driver rows into [`Row`](crate::models::Row) maps.
//!
//! Column types are first sorted into a `TypeCategory`, then a per-database
//! decoder extracts the value. Binary columns come back base64 encoded.

use crate::models::{DatabaseType, Row as JsonRow};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    Uuid,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // Integer types
    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    // Boolean
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    // Float types
    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    // JSON types
    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    // UUID (PostgreSQL)
    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    // Binary types
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    // Default to text for everything else (varchar, text, char, date, time, etc.)
    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Encode binary column data as a base64 JSON string.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

/// Convert a driver row into a column-name keyed map.
pub trait RowToJson {
    fn to_json_map(&self) -> JsonRow;
}

macro_rules! impl_row_to_json {
    ($row:ty, $db:expr, $decoder:path) => {
        impl RowToJson for $row {
            fn to_json_map(&self) -> JsonRow {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let type_name = col.type_info().name();
                        let category = categorize_type(type_name, $db);
                        (col.name().to_string(), $decoder(self, idx, type_name, category))
                    })
                    .collect()
            }
        }
    };
}

impl_row_to_json!(MySqlRow, DatabaseType::MySQL, mysql::decode_column);
impl_row_to_json!(PgRow, DatabaseType::PostgreSQL, postgres::decode_column);
impl_row_to_json!(SqliteRow, DatabaseType::SQLite, sqlite::decode_column);

// =============================================================================
// Shared Decoders
// =============================================================================

/// Try each Rust type in order; the first one the driver accepts wins.
///
/// Yields `None` when no listed type is compatible with the column, and
/// `Some(Null)` for SQL NULL.
macro_rules! decode_first {
    ($row:expr, $idx:expr; $($ty:ty),+ $(,)?) => {{
        let mut value: Option<JsonValue> = None;
        $(
            if value.is_none() {
                if let Ok(v) = $row.try_get::<Option<$ty>, _>($idx) {
                    value = Some(v.map_or(JsonValue::Null, JsonValue::from));
                }
            }
        )+
        value
    }};
}

fn raw_decimal<'r, R>(row: &'r R, idx: usize) -> Option<JsonValue>
where
    R: Row,
    RawDecimal: Decode<'r, R::Database> + Type<R::Database>,
    usize: ColumnIndex<R>,
{
    match row.try_get::<Option<RawDecimal>, _>(idx) {
        Ok(v) => Some(v.map_or(JsonValue::Null, |d| JsonValue::String(d.0))),
        Err(e) => {
            tracing::error!(column = idx, error = %e, "Failed to decode decimal column");
            None
        }
    }
}

fn binary<'r, R>(row: &'r R, idx: usize) -> Option<JsonValue>
where
    R: Row,
    Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
    usize: ColumnIndex<R>,
{
    row.try_get::<Option<Vec<u8>>, _>(idx)
        .ok()
        .map(|v| v.map_or(JsonValue::Null, |bytes| decode_binary_value(&bytes)))
}

/// Text, parsed as JSON when the declared type says so.
fn text<'r, R>(row: &'r R, idx: usize, type_name: &str) -> Option<JsonValue>
where
    R: Row,
    String: Decode<'r, R::Database> + Type<R::Database>,
    usize: ColumnIndex<R>,
{
    let value = row.try_get::<Option<String>, _>(idx).ok()?;
    Some(match value {
        Some(s) if type_name.to_lowercase().contains("json") => {
            serde_json::from_str(&s).unwrap_or(JsonValue::String(s))
        }
        Some(s) => JsonValue::String(s),
        None => JsonValue::Null,
    })
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    pub fn decode_column(
        row: &MySqlRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> JsonValue {
        let value = match category {
            TypeCategory::Decimal => raw_decimal(row, idx),
            TypeCategory::Integer => {
                decode_first!(row, idx; i8, i16, i32, i64, u8, u16, u32, u64)
            }
            TypeCategory::Boolean => decode_first!(row, idx; bool),
            TypeCategory::Float => decode_first!(row, idx; f64, f32),
            TypeCategory::Binary => binary(row, idx),
            TypeCategory::Json => decode_first!(row, idx; JsonValue),
            TypeCategory::Uuid | TypeCategory::Unknown => text(row, idx, type_name),
        };
        value.unwrap_or(JsonValue::Null)
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> JsonValue {
        let value = match category {
            TypeCategory::Decimal => raw_decimal(row, idx),
            TypeCategory::Integer => decode_first!(row, idx; i16, i32, i64),
            TypeCategory::Boolean => decode_first!(row, idx; bool),
            TypeCategory::Float => decode_first!(row, idx; f64, f32),
            TypeCategory::Binary => binary(row, idx),
            TypeCategory::Json => decode_first!(row, idx; JsonValue),
            TypeCategory::Uuid | TypeCategory::Unknown => text(row, idx, type_name),
        };
        value.unwrap_or(JsonValue::Null)
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> JsonValue {
        let value = match category {
            TypeCategory::Integer => decode_first!(row, idx; i64, i32),
            TypeCategory::Boolean => decode_first!(row, idx; bool),
            TypeCategory::Float | TypeCategory::Decimal => decode_first!(row, idx; f64),
            TypeCategory::Binary => binary(row, idx),
            // Expression columns carry no declared type; fall back on the
            // stored value's own class.
            _ => text(row, idx, type_name)
                .or_else(|| decode_first!(row, idx; i64, f64))
                .or_else(|| binary(row, idx)),
        };
        value.unwrap_or(JsonValue::Null)
    }
}
