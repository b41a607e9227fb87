use aws_sdk_dynamodb::types::AttributeValue;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;

/// Nested study documents (captions, requests, findings) are stored as native
/// DynamoDB maps and lists. These helpers bridge them through serde_json so the
/// domain models stay plain serde structs.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to serialize value: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to deserialize attribute: {0}")]
    Deserialize(#[source] serde_json::Error),
    #[error("unsupported attribute type for {0}")]
    Unsupported(String),
}

pub fn json_to_attr(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(json_to_attr).collect()),
        Value::Object(fields) => AttributeValue::M(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), json_to_attr(v)))
                .collect(),
        ),
    }
}

pub fn attr_to_json(attr: &AttributeValue) -> Result<Value, CodecError> {
    Ok(match attr {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => parse_number(n)?,
        AttributeValue::L(items) => Value::Array(
            items
                .iter()
                .map(attr_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        AttributeValue::M(fields) => {
            let mut map = Map::new();
            for (k, v) in fields {
                map.insert(k.clone(), attr_to_json(v)?);
            }
            Value::Object(map)
        }
        AttributeValue::Ss(items) => {
            Value::Array(items.iter().cloned().map(Value::String).collect())
        }
        other => return Err(CodecError::Unsupported(format!("{:?}", other))),
    })
}

fn parse_number(raw: &str) -> Result<Value, CodecError> {
    if let Ok(i) = raw.parse::<i64>() {
        return Ok(Value::Number(i.into()));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| CodecError::Unsupported(format!("number {}", raw)))
}

/// Serialize any serde value into an attribute.
pub fn to_attr<T: Serialize>(value: &T) -> Result<AttributeValue, CodecError> {
    let json = serde_json::to_value(value).map_err(CodecError::Serialize)?;
    Ok(json_to_attr(&json))
}

/// Deserialize an attribute into any serde value.
pub fn from_attr<T: DeserializeOwned>(attr: &AttributeValue) -> Result<T, CodecError> {
    let json = attr_to_json(attr)?;
    serde_json::from_value(json).map_err(CodecError::Deserialize)
}

/// Read a whole item as a JSON object (keys included).
pub fn item_to_json(item: &HashMap<String, AttributeValue>) -> Result<Value, CodecError> {
    let mut map = Map::new();
    for (k, v) in item {
        map.insert(k.clone(), attr_to_json(v)?);
    }
    Ok(Value::Object(map))
}
