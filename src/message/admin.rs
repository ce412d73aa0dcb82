//! Admin message schema for map creation and modification
//!
//! An admin message is a flat argument list of `@key` strings each followed
//! by that parameter's values. Recognized parameters are parsed into typed
//! fields with validation; malformed fields are skipped individually so the
//! rest of the message still applies. Unrecognized `@`-prefixed keys land in
//! the free-form property bag.

use std::collections::BTreeMap;

use tracing::warn;

use crate::constants::{MAX_EXPRESSION_LEN, MAX_VECTOR_LEN};
use crate::map::{BoundaryAction, Mode};
use crate::message::wire::WireArg;
use crate::value::{Value, ValueType};

/// Parsed admin message for the map control plane
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdminMessage {
    /// Source slot index this message addresses
    pub slot: Option<i32>,
    /// Declared source element type
    pub src_type: Option<ValueType>,
    /// Declared destination element type
    pub dst_type: Option<ValueType>,
    /// Declared source vector length
    pub src_length: Option<usize>,
    /// Declared destination vector length
    pub dst_length: Option<usize>,
    /// Source range minimum
    pub src_min: Option<Vec<Value>>,
    /// Source range maximum
    pub src_max: Option<Vec<Value>>,
    /// Destination range minimum
    pub dst_min: Option<Vec<Value>>,
    /// Destination range maximum
    pub dst_max: Option<Vec<Value>>,
    /// Map mute flag
    pub mute: Option<bool>,
    /// Calibration flag
    pub calibrating: Option<bool>,
    /// Action at the range minimum
    pub bound_min: Option<BoundaryAction>,
    /// Action at the range maximum
    pub bound_max: Option<BoundaryAction>,
    /// Expression string
    pub expression: Option<String>,
    /// Whether updates carry instance tags
    pub send_as_instance: Option<bool>,
    /// Device identifiers whose instance events propagate
    pub scope: Option<Vec<String>>,
    /// Requested transformation mode
    pub mode: Option<Mode>,
    /// Free-form properties, keyed without the `@` prefix
    pub extra: BTreeMap<String, Vec<WireArg>>,
}

impl AdminMessage {
    /// Parse an argument list into a message, skipping malformed fields
    pub fn from_args(args: &[WireArg]) -> Self {
        let mut msg = Self::default();
        for (key, values) in split_params(args) {
            msg.apply_param(key, values);
        }
        msg
    }

    /// Serialize back to a canonical argument list
    pub fn to_args(&self) -> Vec<WireArg> {
        let mut args = Vec::new();
        let push_key = |args: &mut Vec<WireArg>, key: &str| {
            args.push(WireArg::Str(format!("@{key}")));
        };

        if let Some(v) = self.slot {
            push_key(&mut args, "slot");
            args.push(WireArg::Int32(v));
        }
        if let Some(ty) = self.src_type {
            push_key(&mut args, "srcType");
            args.push(WireArg::Str(ty.wire_char().to_string()));
        }
        if let Some(ty) = self.dst_type {
            push_key(&mut args, "dstType");
            args.push(WireArg::Str(ty.wire_char().to_string()));
        }
        if let Some(len) = self.src_length {
            push_key(&mut args, "srcLength");
            args.push(WireArg::Int32(len as i32));
        }
        if let Some(len) = self.dst_length {
            push_key(&mut args, "dstLength");
            args.push(WireArg::Int32(len as i32));
        }
        for (key, field) in [
            ("srcMin", &self.src_min),
            ("srcMax", &self.src_max),
            ("dstMin", &self.dst_min),
            ("dstMax", &self.dst_max),
        ] {
            if let Some(values) = field {
                push_key(&mut args, key);
                for v in values {
                    args.push(value_to_arg(*v));
                }
            }
        }
        if let Some(v) = self.mute {
            push_key(&mut args, "mute");
            args.push(WireArg::Int32(v as i32));
        }
        if let Some(v) = self.calibrating {
            push_key(&mut args, "calibrating");
            args.push(WireArg::Int32(v as i32));
        }
        if let Some(b) = self.bound_min {
            push_key(&mut args, "boundMin");
            args.push(WireArg::Str(b.to_string()));
        }
        if let Some(b) = self.bound_max {
            push_key(&mut args, "boundMax");
            args.push(WireArg::Str(b.to_string()));
        }
        if let Some(e) = &self.expression {
            push_key(&mut args, "expression");
            args.push(WireArg::Str(e.clone()));
        }
        if let Some(v) = self.send_as_instance {
            push_key(&mut args, "sendAsInstance");
            args.push(WireArg::Int32(v as i32));
        }
        if let Some(scope) = &self.scope {
            push_key(&mut args, "scope");
            for device in scope {
                args.push(WireArg::Str(device.clone()));
            }
        }
        if let Some(mode) = self.mode {
            push_key(&mut args, "mode");
            args.push(WireArg::Str(mode.to_string()));
        }
        for (key, values) in &self.extra {
            push_key(&mut args, key);
            args.extend(values.iter().cloned());
        }
        args
    }

    fn apply_param(&mut self, key: &str, values: &[WireArg]) {
        match key {
            "slot" => self.slot = parse_int(key, values).map(|v| v as i32),
            "srcType" => self.src_type = parse_type(key, values),
            "dstType" => self.dst_type = parse_type(key, values),
            "srcLength" => self.src_length = parse_length(key, values),
            "dstLength" => self.dst_length = parse_length(key, values),
            "srcMin" => self.src_min = parse_numeric_vec(key, values),
            "srcMax" => self.src_max = parse_numeric_vec(key, values),
            "dstMin" => self.dst_min = parse_numeric_vec(key, values),
            "dstMax" => self.dst_max = parse_numeric_vec(key, values),
            "mute" => self.mute = parse_int(key, values).map(|v| v != 0),
            "calibrating" => self.calibrating = parse_int(key, values).map(|v| v != 0),
            "boundMin" => self.bound_min = parse_boundary(key, values),
            "boundMax" => self.bound_max = parse_boundary(key, values),
            "expression" => self.expression = parse_expression(key, values),
            "sendAsInstance" => self.send_as_instance = parse_int(key, values).map(|v| v != 0),
            "scope" => self.scope = parse_string_vec(key, values),
            "mode" => self.mode = parse_mode(key, values),
            _ => {
                self.extra.insert(key.to_string(), values.to_vec());
            }
        }
    }
}

/// Split a flat argument list into `(key, values)` runs
fn split_params(args: &[WireArg]) -> Vec<(&str, &[WireArg])> {
    let mut params = Vec::new();
    let mut key: Option<&str> = None;
    let mut start = 0;
    for (i, arg) in args.iter().enumerate() {
        if let WireArg::Str(s) = arg {
            if let Some(stripped) = s.strip_prefix('@') {
                if let Some(k) = key {
                    params.push((k, &args[start..i]));
                }
                key = Some(stripped);
                start = i + 1;
            }
        }
    }
    if let Some(k) = key {
        params.push((k, &args[start..]));
    }
    params
}

fn value_to_arg(v: Value) -> WireArg {
    match v {
        Value::Int32(x) => WireArg::Int32(x),
        Value::Float32(x) => WireArg::Float32(x),
        Value::Float64(x) => WireArg::Float64(x),
    }
}

fn parse_int(key: &str, values: &[WireArg]) -> Option<i64> {
    match values {
        [WireArg::Int32(v)] => Some(*v as i64),
        _ => {
            warn!(key, "expected a single integer, field skipped");
            None
        }
    }
}

fn parse_length(key: &str, values: &[WireArg]) -> Option<usize> {
    let v = parse_int(key, values)?;
    if v < 1 || v as usize > MAX_VECTOR_LEN {
        warn!(key, value = v, "vector length out of range, field skipped");
        return None;
    }
    Some(v as usize)
}

fn parse_type(key: &str, values: &[WireArg]) -> Option<ValueType> {
    if let [WireArg::Str(s)] = values {
        let mut chars = s.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if let Some(ty) = ValueType::from_wire_char(c) {
                return Some(ty);
            }
        }
    }
    warn!(key, "expected one of 'i', 'f', 'd', field skipped");
    None
}

fn parse_numeric_vec(key: &str, values: &[WireArg]) -> Option<Vec<Value>> {
    if values.is_empty() {
        warn!(key, "empty numeric array, field skipped");
        return None;
    }
    let mut out = Vec::with_capacity(values.len());
    for arg in values {
        match arg {
            WireArg::Int32(v) => out.push(Value::Int32(*v)),
            WireArg::Float32(v) => out.push(Value::Float32(*v)),
            WireArg::Float64(v) => out.push(Value::Float64(*v)),
            _ => {
                warn!(key, "non-numeric element in array, field skipped");
                return None;
            }
        }
    }
    Some(out)
}

fn parse_string_vec(key: &str, values: &[WireArg]) -> Option<Vec<String>> {
    let mut out = Vec::with_capacity(values.len());
    for arg in values {
        match arg {
            WireArg::Str(s) => out.push(s.clone()),
            _ => {
                warn!(key, "non-string element in array, field skipped");
                return None;
            }
        }
    }
    Some(out)
}

fn parse_boundary(key: &str, values: &[WireArg]) -> Option<BoundaryAction> {
    if let [WireArg::Str(s)] = values {
        if let Ok(action) = s.parse() {
            return Some(action);
        }
    }
    warn!(key, "unknown boundary action, field skipped");
    None
}

fn parse_mode(key: &str, values: &[WireArg]) -> Option<Mode> {
    if let [WireArg::Str(s)] = values {
        if let Ok(mode) = s.parse() {
            return Some(mode);
        }
    }
    warn!(key, "unknown mode, field skipped");
    None
}

fn parse_expression(key: &str, values: &[WireArg]) -> Option<String> {
    if let [WireArg::Str(s)] = values {
        if s.len() <= MAX_EXPRESSION_LEN {
            return Some(s.clone());
        }
    }
    warn!(key, "expected one string within the length limit, field skipped");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_message() -> AdminMessage {
        let mut extra = BTreeMap::new();
        extra.insert("x-colour".to_string(), vec![WireArg::Str("teal".into())]);
        AdminMessage {
            slot: Some(0),
            src_type: Some(ValueType::Int32),
            dst_type: Some(ValueType::Float32),
            src_length: Some(2),
            dst_length: Some(2),
            src_min: Some(vec![Value::Int32(0), Value::Int32(0)]),
            src_max: Some(vec![Value::Int32(10), Value::Int32(10)]),
            dst_min: Some(vec![Value::Float32(0.0), Value::Float32(0.0)]),
            dst_max: Some(vec![Value::Float32(1.0), Value::Float32(1.0)]),
            mute: Some(false),
            calibrating: Some(true),
            bound_min: Some(BoundaryAction::Clamp),
            bound_max: Some(BoundaryAction::Wrap),
            expression: Some("y=x*0.1".into()),
            send_as_instance: Some(true),
            scope: Some(vec!["alpha.1".into(), "beta.1".into()]),
            mode: Some(Mode::Expression),
            extra,
        }
    }

    #[test]
    fn test_round_trip_preserves_all_fields() {
        let original = full_message();
        let parsed = AdminMessage::from_args(&original.to_args());
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_empty_message() {
        let msg = AdminMessage::from_args(&[]);
        assert_eq!(msg, AdminMessage::default());
        assert!(msg.to_args().is_empty());
    }

    #[test]
    fn test_unknown_keys_go_to_extra() {
        let args = vec![
            WireArg::Str("@x-position".into()),
            WireArg::Float32(0.5),
            WireArg::Float32(0.7),
        ];
        let msg = AdminMessage::from_args(&args);
        assert_eq!(
            msg.extra.get("x-position"),
            Some(&vec![WireArg::Float32(0.5), WireArg::Float32(0.7)])
        );
    }

    #[test]
    fn test_bad_field_skipped_others_kept() {
        let args = vec![
            WireArg::Str("@srcLength".into()),
            WireArg::Int32(0), // out of range
            WireArg::Str("@mute".into()),
            WireArg::Int32(1),
        ];
        let msg = AdminMessage::from_args(&args);
        assert_eq!(msg.src_length, None);
        assert_eq!(msg.mute, Some(true));
    }

    #[test]
    fn test_oversized_length_rejected() {
        let args = vec![
            WireArg::Str("@dstLength".into()),
            WireArg::Int32(MAX_VECTOR_LEN as i32 + 1),
        ];
        let msg = AdminMessage::from_args(&args);
        assert_eq!(msg.dst_length, None);
    }

    #[test]
    fn test_mixed_numeric_array_preserves_element_types() {
        let args = vec![
            WireArg::Str("@srcMin".into()),
            WireArg::Int32(1),
            WireArg::Float64(2.5),
        ];
        let msg = AdminMessage::from_args(&args);
        assert_eq!(
            msg.src_min,
            Some(vec![Value::Int32(1), Value::Float64(2.5)])
        );
    }

    #[test]
    fn test_leading_values_without_key_ignored() {
        let args = vec![
            WireArg::Int32(42),
            WireArg::Str("@mute".into()),
            WireArg::Int32(1),
        ];
        let msg = AdminMessage::from_args(&args);
        assert_eq!(msg.mute, Some(true));
    }
}
