//! Request parameter extraction. Every failure is a `bad_params` reply.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;

use super::error::HandlerErr;
use crate::model::{parse_date, MonthKey};
use crate::money::Money;

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Absent, null and blank strings all read as `None`.
pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn get_u8(params: &serde_json::Value, key: &str) -> Result<u8, HandlerErr> {
    let raw = params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    u8::try_from(raw)
        .map_err(|_| HandlerErr::bad_params(format!("{} is out of range, got {}", key, raw)))
}

pub fn get_optional_u8(params: &serde_json::Value, key: &str) -> Result<Option<u8>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(_) => get_u8(params, key).map(Some),
    }
}

pub fn get_usize_or(params: &serde_json::Value, key: &str, default: usize) -> Result<usize, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(v) => v
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a non-negative integer", key))),
    }
}

pub fn get_date(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = get_required_str(params, key)?;
    Ok(parse_date(&raw)?)
}

pub fn get_optional_date(params: &serde_json::Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match get_optional_str(params, key) {
        None => Ok(None),
        Some(raw) => Ok(Some(parse_date(&raw)?)),
    }
}

pub fn get_month(params: &serde_json::Value, key: &str) -> Result<MonthKey, HandlerErr> {
    let raw = get_required_str(params, key)?;
    Ok(raw.parse::<MonthKey>()?)
}

pub fn get_optional_month(params: &serde_json::Value, key: &str) -> Result<Option<MonthKey>, HandlerErr> {
    match get_optional_str(params, key) {
        None => Ok(None),
        Some(raw) => Ok(Some(raw.parse::<MonthKey>()?)),
    }
}

/// Accepts a JSON number or a decimal string.
pub fn get_money(params: &serde_json::Value, key: &str) -> Result<Money, HandlerErr> {
    let v = params
        .get(key)
        .filter(|v| !v.is_null())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    serde_json::from_value::<Money>(v.clone())
        .map_err(|e| HandlerErr::bad_params(format!("{}: {}", key, e)))
}

/// Deserializes one field into `T`.
pub fn get_field<T: DeserializeOwned>(params: &serde_json::Value, key: &str) -> Result<T, HandlerErr> {
    let v = params
        .get(key)
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    serde_json::from_value(v.clone()).map_err(|e| HandlerErr::bad_params(format!("{}: {}", key, e)))
}

/// Deserializes the whole params object into `T`.
pub fn parse_params<T: DeserializeOwned>(params: &serde_json::Value) -> Result<T, HandlerErr> {
    serde_json::from_value(params.clone()).map_err(|e| HandlerErr::bad_params(e.to_string()))
}
