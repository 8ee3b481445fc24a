/// Typed views over RESP replies
///
/// Every helper turns a backend `-ERR` reply into an operation error and
/// rejects shapes that do not match the command that was sent.

use crate::core::resp::RespValue;
use crate::error::{TejidoError, TejidoResult};
use bytes::Bytes;
use std::collections::HashMap;

/// One page of a `ZSCAN` iteration
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPage {
    /// Cursor for the next call; `"0"` when the scan is complete
    pub cursor: String,
    /// `(member, score)` pairs
    pub entries: Vec<(String, f64)>,
}

impl ScanPage {
    pub fn is_finished(&self) -> bool {
        self.cursor == "0"
    }
}

fn unexpected(expected: &str, value: &RespValue) -> TejidoError {
    TejidoError::operation(format!("expected {} reply, got {:?}", expected, value))
}

fn utf8(data: Bytes) -> TejidoResult<String> {
    String::from_utf8(data.to_vec()).map_err(|e| TejidoError::operation(e.to_string()))
}

/// Lift an error reply into `Err`
pub fn check(value: RespValue) -> TejidoResult<RespValue> {
    match value {
        RespValue::Error(message) => Err(TejidoError::operation(message)),
        other => Ok(other),
    }
}

/// Status reply such as `OK`; bulk strings are accepted too
pub fn status(value: RespValue) -> TejidoResult<String> {
    match check(value)? {
        RespValue::SimpleString(s) => Ok(s),
        RespValue::BulkString(Some(data)) => utf8(data),
        other => Err(unexpected("status", &other)),
    }
}

/// Status reply that may be nil (conditional `SET`)
pub fn optional_status(value: RespValue) -> TejidoResult<Option<String>> {
    match check(value)? {
        RespValue::BulkString(None) | RespValue::Array(None) => Ok(None),
        other => status(other).map(Some),
    }
}

pub fn integer(value: RespValue) -> TejidoResult<i64> {
    match check(value)? {
        RespValue::Integer(n) => Ok(n),
        other => Err(unexpected("integer", &other)),
    }
}

/// Integer reply read as a flag (`1` is true)
pub fn boolean(value: RespValue) -> TejidoResult<bool> {
    integer(value).map(|n| n == 1)
}

pub fn bulk(value: RespValue) -> TejidoResult<Option<Bytes>> {
    match check(value)? {
        RespValue::BulkString(data) => Ok(data),
        RespValue::SimpleString(s) => Ok(Some(Bytes::from(s))),
        other => Err(unexpected("bulk", &other)),
    }
}

pub fn string(value: RespValue) -> TejidoResult<Option<String>> {
    bulk(value)?.map(utf8).transpose()
}

fn elements(value: RespValue) -> TejidoResult<Vec<RespValue>> {
    match check(value)? {
        RespValue::Array(Some(items)) => Ok(items),
        RespValue::Array(None) => Ok(Vec::new()),
        other => Err(unexpected("array", &other)),
    }
}

/// Array of strings; nil elements are dropped
pub fn string_list(value: RespValue) -> TejidoResult<Vec<String>> {
    let mut out = Vec::new();
    for item in elements(value)? {
        if let Some(s) = string(item)? {
            out.push(s);
        }
    }
    Ok(out)
}

/// Flat `field, value, field, value` array as a map
pub fn field_map(value: RespValue) -> TejidoResult<HashMap<String, Bytes>> {
    let items = elements(value)?;
    if items.len() % 2 != 0 {
        return Err(TejidoError::operation("odd number of elements in hash reply"));
    }
    let mut map = HashMap::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(field), Some(val)) = (iter.next(), iter.next()) {
        let field = string(field)?.ok_or_else(|| TejidoError::operation("nil hash field"))?;
        if let Some(val) = bulk(val)? {
            map.insert(field, val);
        }
    }
    Ok(map)
}

pub fn scan_page(value: RespValue) -> TejidoResult<ScanPage> {
    let mut items = elements(value)?.into_iter();
    let (Some(cursor), Some(entries), None) = (items.next(), items.next(), items.next()) else {
        return Err(TejidoError::operation("scan reply must have two elements"));
    };
    let cursor = string(cursor)?.ok_or_else(|| TejidoError::operation("nil scan cursor"))?;

    let flat = string_list(entries)?;
    if flat.len() % 2 != 0 {
        return Err(TejidoError::operation("odd number of elements in scan reply"));
    }
    let mut pairs = Vec::with_capacity(flat.len() / 2);
    for chunk in flat.chunks(2) {
        let score = chunk[1]
            .parse::<f64>()
            .map_err(|e| TejidoError::operation(format!("bad score {}: {}", chunk[1], e)))?;
        pairs.push((chunk[0].clone(), score));
    }
    Ok(ScanPage {
        cursor,
        entries: pairs,
    })
}

/// `SENTINEL get-master-addr-by-name` reply: `[host, port]` or nil
pub fn master_addr(value: RespValue) -> TejidoResult<Option<(String, u16)>> {
    let parts = string_list(value)?;
    match parts.as_slice() {
        [] => Ok(None),
        [host, port] => {
            let port = port
                .parse::<u16>()
                .map_err(|e| TejidoError::operation(format!("bad master port {}: {}", port, e)))?;
            Ok(Some((host.clone(), port)))
        }
        _ => Err(TejidoError::operation("malformed master address reply")),
    }
}
