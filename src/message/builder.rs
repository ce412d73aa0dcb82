//! Outbound update messages
//!
//! Serializes a produced destination sample into wire arguments: one typed
//! argument (or nil) per element driven by the typestring, then the optional
//! `@instance` tag carrying the id pair and the optional `@slot` tag. A
//! missing value with an id map present becomes an all-nil release
//! announcement.

use crate::expr::Typestring;
use crate::message::wire::WireArg;
use crate::value::{Value, ValueType};

/// Origin/public id pair identifying an instance across devices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMap {
    /// Id on the originating device
    pub origin: i32,
    /// Network-visible id
    pub public: i32,
}

/// Build the argument list for one destination update
///
/// `value` holds `count` consecutive samples; `typestring` has one entry per
/// emitted element. When `value` is absent but `id_map` is present, the
/// message announces an instance release as `dst_length * count` nils.
pub fn build_update(
    value: Option<&[Value]>,
    count: usize,
    typestring: &Typestring,
    dst_length: usize,
    id_map: Option<IdMap>,
    send_as_instance: bool,
    slot_index: Option<i32>,
) -> Vec<WireArg> {
    let mut args = Vec::new();

    if let Some(values) = value {
        for (v, tag) in values.iter().zip(typestring.iter()) {
            match tag {
                Some(ValueType::Int32) => args.push(WireArg::Int32(v.as_f64() as i32)),
                Some(ValueType::Float32) => args.push(WireArg::Float32(v.as_f64() as f32)),
                Some(ValueType::Float64) => args.push(WireArg::Float64(v.as_f64())),
                None => args.push(WireArg::Nil),
            }
        }
    } else if id_map.is_some() {
        for _ in 0..dst_length * count {
            args.push(WireArg::Nil);
        }
    }

    if send_as_instance {
        if let Some(ids) = id_map {
            args.push(WireArg::Str("@instance".into()));
            args.push(WireArg::Int32(ids.origin));
            args.push(WireArg::Int32(ids.public));
        }
    }

    if let Some(slot) = slot_index {
        if slot >= 0 {
            args.push(WireArg::Str("@slot".into()));
            args.push(WireArg::Int32(slot));
        }
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_elements() {
        let value = vec![Value::Float64(1.5), Value::Float64(2.0)];
        let typestring = vec![Some(ValueType::Float32), Some(ValueType::Int32)];
        let args = build_update(Some(&value), 1, &typestring, 2, None, false, None);
        assert_eq!(args, vec![WireArg::Float32(1.5), WireArg::Int32(2)]);
    }

    #[test]
    fn test_omitted_element_becomes_nil() {
        let value = vec![Value::Int32(4), Value::Int32(0)];
        let typestring = vec![Some(ValueType::Int32), None];
        let args = build_update(Some(&value), 1, &typestring, 2, None, false, None);
        assert_eq!(args, vec![WireArg::Int32(4), WireArg::Nil]);
    }

    #[test]
    fn test_release_announcement_is_all_nil() {
        let ids = IdMap {
            origin: 3,
            public: 9,
        };
        let args = build_update(None, 1, &Typestring::new(), 3, Some(ids), true, None);
        assert_eq!(
            args,
            vec![
                WireArg::Nil,
                WireArg::Nil,
                WireArg::Nil,
                WireArg::Str("@instance".into()),
                WireArg::Int32(3),
                WireArg::Int32(9),
            ]
        );
    }

    #[test]
    fn test_instance_tag_carries_both_ids() {
        let value = vec![Value::Int32(1)];
        let typestring = vec![Some(ValueType::Int32)];
        let ids = IdMap {
            origin: 11,
            public: 22,
        };
        let args = build_update(Some(&value), 1, &typestring, 1, Some(ids), true, None);
        assert_eq!(
            &args[1..],
            &[
                WireArg::Str("@instance".into()),
                WireArg::Int32(11),
                WireArg::Int32(22),
            ]
        );
    }

    #[test]
    fn test_instance_tag_requires_flag_and_ids() {
        let value = vec![Value::Int32(1)];
        let typestring = vec![Some(ValueType::Int32)];
        let ids = IdMap {
            origin: 1,
            public: 2,
        };
        // flag without ids
        let args = build_update(Some(&value), 1, &typestring, 1, None, true, None);
        assert_eq!(args.len(), 1);
        // ids without flag
        let args = build_update(Some(&value), 1, &typestring, 1, Some(ids), false, None);
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn test_slot_tag_appended_last() {
        let value = vec![Value::Float64(0.5)];
        let typestring = vec![Some(ValueType::Float64)];
        let args = build_update(Some(&value), 1, &typestring, 1, None, false, Some(2));
        assert_eq!(
            args,
            vec![
                WireArg::Float64(0.5),
                WireArg::Str("@slot".into()),
                WireArg::Int32(2),
            ]
        );
    }
}
