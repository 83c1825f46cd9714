//! Schema parser: IDL and JSON Schema sources -> DatabaseSchema

use super::{ColumnDef, DatabaseSchema, TableDef, ValueType};
use crate::{Result, StreamError};
use once_cell::sync::Lazy;
use regex::Regex;

static TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)table\s+(\w+)\s*\{([^}]*)\}").unwrap());
static FIELD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)(\w+)\s*:\s*([^;]+);").unwrap());
static ATTR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(([^)]+)\)").unwrap());

/// Parses schema sources into a [`DatabaseSchema`].
///
/// Two source forms are recognised: an IDL form
/// (`table Name { field: type (attrs); }`) and a JSON Schema form for
/// sources starting with `{`.
pub struct SchemaParser;

impl SchemaParser {
    pub fn parse(source: &str, db_name: &str) -> Result<DatabaseSchema> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(StreamError::SchemaParseError("empty schema source".into()));
        }
        if trimmed.starts_with('{') {
            Self::parse_json(trimmed, db_name)
        } else {
            Self::parse_idl(trimmed, db_name)
        }
    }

    /// Parse the IDL form.
    ///
    /// Field attributes: `id` (primary key), `required` (not nullable),
    /// `key` / `index` (indexed), `encrypted: N` (encrypted under field id N).
    pub fn parse_idl(idl: &str, db_name: &str) -> Result<DatabaseSchema> {
        let mut schema = DatabaseSchema::new(db_name);

        for table_cap in TABLE_RE.captures_iter(idl) {
            let mut table = TableDef::new(&table_cap[1]);

            for field_cap in FIELD_RE.captures_iter(&table_cap[2]) {
                let name = field_cap[1].to_string();
                let mut type_str = field_cap[2].trim().to_string();
                let mut col = ColumnDef::new(name, ValueType::String);

                if let Some(attr_cap) = ATTR_RE.captures(&type_str) {
                    let attrs = attr_cap[1].to_ascii_lowercase();
                    for attr in attrs.split(',') {
                        let attr = attr.trim();
                        if attr == "id" {
                            col.primary_key = true;
                            col.indexed = true;
                            col.nullable = false;
                        } else if attr == "required" {
                            col.nullable = false;
                        } else if attr == "key" || attr == "index" {
                            col.indexed = true;
                        } else if let Some(rest) = attr.strip_prefix("encrypted") {
                            let id = rest.trim_start_matches(':').trim();
                            col.encrypted = true;
                            col.field_id = id.parse().map_err(|_| {
                                StreamError::SchemaParseError(format!(
                                    "invalid field id in attribute '{}'",
                                    attr
                                ))
                            })?;
                        }
                    }
                    type_str = ATTR_RE.replace(&type_str, "").trim().to_string();
                }

                col.value_type = idl_type(&type_str);
                table = table.column(col);
            }

            schema.tables.push(table);
        }

        if schema.tables.is_empty() {
            return Err(StreamError::SchemaParseError(
                "no table definitions found".into(),
            ));
        }
        Ok(schema)
    }

    /// Parse the JSON Schema form: a single object with `name`/`title` and
    /// `properties` whose entries carry `type` and optionally `format`.
    pub fn parse_json(json: &str, db_name: &str) -> Result<DatabaseSchema> {
        let root: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| StreamError::SchemaParseError(e.to_string()))?;

        let table_name = root
            .get("name")
            .or_else(|| root.get("title"))
            .and_then(|v| v.as_str())
            .unwrap_or("default");
        let mut table = TableDef::new(table_name);

        if let Some(props) = root.get("properties").and_then(|v| v.as_object()) {
            for (field, prop) in props {
                let type_str = prop.get("type").and_then(|v| v.as_str()).unwrap_or("string");
                let format = prop.get("format").and_then(|v| v.as_str()).unwrap_or("");
                table = table.column(ColumnDef::new(field.clone(), json_type(type_str, format)));
            }
        }

        if table.columns.is_empty() {
            return Err(StreamError::SchemaParseError(
                "no properties found in JSON schema".into(),
            ));
        }
        Ok(DatabaseSchema::new(db_name).add_table(table))
    }
}

fn idl_type(raw: &str) -> ValueType {
    let t = raw.trim().to_ascii_lowercase();
    match t.as_str() {
        "bool" => ValueType::Bool,
        "byte" | "int8" => ValueType::Int8,
        "ubyte" | "uint8" => ValueType::UInt8,
        "short" | "int16" => ValueType::Int16,
        "ushort" | "uint16" => ValueType::UInt16,
        "int" | "int32" => ValueType::Int32,
        "uint" | "uint32" => ValueType::UInt32,
        "long" | "int64" => ValueType::Int64,
        "ulong" | "uint64" => ValueType::UInt64,
        "float" | "float32" => ValueType::Float32,
        "double" | "float64" => ValueType::Float64,
        "string" => ValueType::String,
        _ if t.contains("[ubyte]") || t.contains("[uint8]") || t.contains("[byte]") => {
            ValueType::Bytes
        }
        // Unknown types default to string
        _ => ValueType::String,
    }
}

fn json_type(t: &str, format: &str) -> ValueType {
    match t.to_ascii_lowercase().as_str() {
        "boolean" => ValueType::Bool,
        "integer" => match format {
            "int8" => ValueType::Int8,
            "int16" => ValueType::Int16,
            "int64" => ValueType::Int64,
            _ => ValueType::Int32,
        },
        "number" => match format {
            "float" => ValueType::Float32,
            _ => ValueType::Float64,
        },
        "string" => ValueType::String,
        "array" => ValueType::Bytes,
        _ => ValueType::String,
    }
}
