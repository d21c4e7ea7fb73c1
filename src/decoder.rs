//! Binary event decoder
//!
//! Program events are emitted as log lines of the form
//! `Program data: <base64>`, where the payload is an 8-byte discriminator
//! followed by fixed-offset fields. One generic walker decodes every kind
//! against a static discriminator-keyed schema table; anything that does
//! not match decodes to `None` rather than an error, because foreign and
//! malformed lines are routine in a shared log stream.

use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;

/// Log-line prefix for program-emitted events.
pub const EVENT_LOG_PREFIX: &str = "Program data: ";

/// Fixed-width field types supported by event schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// 32-byte address, decoded to base58 text
    Pubkey,
    U64,
    I64,
    U32,
    I32,
    U16,
    Bool,
}

impl FieldType {
    fn width(&self) -> usize {
        match self {
            FieldType::Pubkey => 32,
            FieldType::U64 | FieldType::I64 => 8,
            FieldType::U32 | FieldType::I32 => 4,
            FieldType::U16 => 2,
            FieldType::Bool => 1,
        }
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Pubkey(String),
    U64(u64),
    I64(i64),
    U32(u32),
    I32(i32),
    U16(u16),
    Bool(bool),
}

impl FieldValue {
    pub fn as_pubkey(&self) -> Option<&str> {
        match self {
            FieldValue::Pubkey(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::U64(v) => Some(*v),
            FieldValue::U32(v) => Some(*v as u64),
            FieldValue::U16(v) => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::I64(v) => Some(*v),
            FieldValue::I32(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Pubkey(s) => Value::from(s.clone()),
            FieldValue::U64(v) => Value::from(*v),
            FieldValue::I64(v) => Value::from(*v),
            FieldValue::U32(v) => Value::from(*v),
            FieldValue::I32(v) => Value::from(*v),
            FieldValue::U16(v) => Value::from(*v),
            FieldValue::Bool(v) => Value::from(*v),
        }
    }
}

/// Schema descriptor for one event kind.
pub struct EventSchema {
    pub name: &'static str,
    pub discriminator: [u8; 8],
    /// Field name and type, in wire order.
    pub fields: &'static [(&'static str, FieldType)],
}

/// Static discriminator-keyed schema table for the program's events.
pub static EVENT_SCHEMAS: &[EventSchema] = &[
    EventSchema {
        name: "Swap",
        discriminator: [81, 108, 227, 190, 205, 208, 10, 196],
        fields: &[
            ("pool", FieldType::Pubkey),
            ("user", FieldType::Pubkey),
            ("amount_in", FieldType::U64),
            ("amount_out", FieldType::U64),
            ("fee", FieldType::U64),
            ("swap_for_base", FieldType::Bool),
            ("active_bin_id", FieldType::I32),
        ],
    },
    EventSchema {
        name: "LiquidityChanged",
        discriminator: [150, 229, 155, 99, 88, 181, 254, 61],
        fields: &[
            ("pool", FieldType::Pubkey),
            ("user", FieldType::Pubkey),
            ("position", FieldType::Pubkey),
            ("amount_base", FieldType::I64),
            ("amount_quote", FieldType::I64),
            ("active_bin_id", FieldType::I64),
        ],
    },
    EventSchema {
        name: "PoolCreated",
        discriminator: [202, 44, 41, 88, 104, 220, 157, 82],
        fields: &[
            ("pool", FieldType::Pubkey),
            ("base_mint", FieldType::Pubkey),
            ("quote_mint", FieldType::Pubkey),
            ("bin_step", FieldType::U16),
            ("initial_bin_id", FieldType::I32),
        ],
    },
    EventSchema {
        name: "FeesCollected",
        discriminator: [64, 19, 76, 155, 6, 240, 211, 97],
        fields: &[
            ("pool", FieldType::Pubkey),
            ("user", FieldType::Pubkey),
            ("fee_base", FieldType::U64),
            ("fee_quote", FieldType::U64),
        ],
    },
    EventSchema {
        name: "ParametersUpdated",
        discriminator: [17, 177, 109, 188, 241, 154, 109, 4],
        fields: &[
            ("pool", FieldType::Pubkey),
            ("admin", FieldType::Pubkey),
            ("base_fee_bps", FieldType::U16),
            ("paused", FieldType::Bool),
        ],
    },
];

/// A decoded program event: a kind name plus ordered named fields.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub name: &'static str,
    pub fields: Vec<(&'static str, FieldValue)>,
}

impl DecodedEvent {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// Pool address referenced by the event, when its schema carries one.
    pub fn pool(&self) -> Option<&str> {
        self.get("pool").and_then(|v| v.as_pubkey())
    }

    /// Fields as a JSON object, in declared order.
    pub fn fields_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (name, value) in &self.fields {
            map.insert((*name).to_string(), value.to_json());
        }
        Value::Object(map)
    }
}

/// Decode one event payload (discriminator + fields). Unknown
/// discriminator or short buffer yields `None`. Bytes past the schema's
/// fixed length are ignored.
pub fn decode_event_bytes(data: &[u8]) -> Option<DecodedEvent> {
    if data.len() < 8 {
        return None;
    }

    let schema = EVENT_SCHEMAS
        .iter()
        .find(|s| s.discriminator == data[..8])?;

    let mut offset = 8usize;
    let mut fields = Vec::with_capacity(schema.fields.len());

    for (name, ty) in schema.fields {
        let end = offset.checked_add(ty.width())?;
        let bytes = data.get(offset..end)?;
        let value = match ty {
            FieldType::Pubkey => FieldValue::Pubkey(bs58::encode(bytes).into_string()),
            FieldType::U64 => FieldValue::U64(u64::from_le_bytes(bytes.try_into().ok()?)),
            FieldType::I64 => FieldValue::I64(i64::from_le_bytes(bytes.try_into().ok()?)),
            FieldType::U32 => FieldValue::U32(u32::from_le_bytes(bytes.try_into().ok()?)),
            FieldType::I32 => FieldValue::I32(i32::from_le_bytes(bytes.try_into().ok()?)),
            FieldType::U16 => FieldValue::U16(u16::from_le_bytes(bytes.try_into().ok()?)),
            FieldType::Bool => FieldValue::Bool(bytes[0] != 0),
        };
        fields.push((*name, value));
        offset = end;
    }

    Some(DecodedEvent {
        name: schema.name,
        fields,
    })
}

/// Decode a single log line, `None` for anything that is not a
/// well-formed event of a known kind.
pub fn decode_log_line(line: &str) -> Option<DecodedEvent> {
    let payload = line.strip_prefix(EVENT_LOG_PREFIX)?;
    let data = general_purpose::STANDARD.decode(payload.trim()).ok()?;
    decode_event_bytes(&data)
}

/// Decode every event in a transaction's log lines, preserving order and
/// silently dropping non-matches.
pub fn decode_events_from_logs(logs: &[String]) -> Vec<DecodedEvent> {
    logs.iter()
        .filter_map(|line| decode_log_line(line))
        .collect()
}
