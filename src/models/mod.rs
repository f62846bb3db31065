use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field every record carries as its unique key
pub const ID_FIELD: &str = "id";

/// Wrapped SOL mint address
pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Project token mint address
pub const MXS_MINT: &str = "hxcxN81ma8m5PMzPuCyysaMJ9wqJenBr811DbX4moon";

/// One row from the remote store, keyed by `id`
///
/// The field map is opaque to this crate. Construction (including
/// deserialization) rejects anything that is not an object with an `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create a record holding only its id
    pub fn new(id: impl Into<Value>) -> Self {
        let mut fields = Map::new();
        fields.insert(ID_FIELD.to_string(), id.into());
        Self(fields)
    }

    /// Builder-style field setter
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    pub fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Object(fields) => Self::try_from(fields),
            other => Err(Error::Malformed(format!(
                "expected record object, got {}",
                other
            ))),
        }
    }

    pub fn id(&self) -> &Value {
        self.0.get(ID_FIELD).unwrap_or(&Value::Null)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// String value of a field, if present and a string
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl TryFrom<Map<String, Value>> for Record {
    type Error = Error;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        match fields.get(ID_FIELD) {
            None | Some(Value::Null) => Err(Error::Malformed("record has no id".to_string())),
            Some(_) => Ok(Self(fields)),
        }
    }
}

impl From<Record> for Map<String, Value> {
    fn from(record: Record) -> Self {
        record.0
    }
}

/// Kind of change reported by the live feed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A single change notification for one table
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub record: Record,
}

impl ChangeEvent {
    pub fn insert(record: Record) -> Self {
        Self { kind: ChangeKind::Insert, record }
    }

    pub fn update(record: Record) -> Self {
        Self { kind: ChangeKind::Update, record }
    }

    pub fn delete(record: Record) -> Self {
        Self { kind: ChangeKind::Delete, record }
    }
}

/// Represents a token the front end knows by name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Token {
    pub symbol: String,
    pub mint_address: String, // Solana mint address
    pub name: String,
}

impl Token {
    pub fn sol() -> Self {
        Self {
            symbol: "SOL".to_string(),
            mint_address: SOL_MINT.to_string(),
            name: "Wrapped SOL".to_string(),
        }
    }

    pub fn mxs() -> Self {
        Self {
            symbol: "MXS".to_string(),
            mint_address: MXS_MINT.to_string(),
            name: "Moonshot X".to_string(),
        }
    }

    /// Resolve a symbol ("SOL", "mxs") to a known token
    pub fn by_symbol(symbol: &str) -> Option<Self> {
        match symbol.to_uppercase().as_str() {
            "SOL" => Some(Self::sol()),
            "MXS" => Some(Self::mxs()),
            _ => None,
        }
    }
}

/// Cached price for one token
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceQuote {
    pub price: f64,
    pub fetched_at: DateTime<Utc>,
}

/// Where a returned price came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataSource {
    Jupiter,
    Cache,
    Fallback,
}

/// Price plus provenance, as handed to display code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub token: String,
    pub price: f64,
    pub source: DataSource,
    pub timestamp: DateTime<Utc>,
}
