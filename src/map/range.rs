//! Range resolution for map slots
//!
//! Each extreme of a slot's range is resolved in priority order: a numeric
//! parameter carried by the admin message wins, then any previously
//! resolved value, then the declared range of a locally attached signal.
//! A resolution pass reports how many fields changed so the caller can
//! re-derive linear coefficients only when something moved.

use tracing::warn;

use crate::map::slot::Slot;
use crate::value::Value;

/// Which extreme of a range is being resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Extreme {
    Minimum,
    Maximum,
}

/// Resolve both extremes of one slot from optional message parameters
///
/// Returns the number of fields that changed.
pub(crate) fn resolve_range(
    slot: &mut Slot,
    min_param: Option<&[Value]>,
    max_param: Option<&[Value]>,
) -> usize {
    let mut updated = 0;
    updated += resolve_extreme(slot, Extreme::Minimum, min_param);
    updated += resolve_extreme(slot, Extreme::Maximum, max_param);
    updated
}

fn resolve_extreme(slot: &mut Slot, extreme: Extreme, param: Option<&[Value]>) -> usize {
    // message parameters are only usable once the slot shape is known
    if let (Some(values), Some(ty), Some(length)) = (param, slot.ty, slot.length) {
        if values.len() != length {
            warn!(
                expected = length,
                actual = values.len(),
                ?extreme,
                "range parameter length mismatch, field skipped"
            );
        } else {
            let coerced: Vec<Value> = values.iter().map(|v| v.coerce(ty)).collect();
            let field = match extreme {
                Extreme::Minimum => &mut slot.minimum,
                Extreme::Maximum => &mut slot.maximum,
            };
            if field.as_deref() != Some(coerced.as_slice()) {
                *field = Some(coerced);
                return 1;
            }
            return 0;
        }
    }

    // keep any previously resolved value
    let already = match extreme {
        Extreme::Minimum => slot.minimum.is_some(),
        Extreme::Maximum => slot.maximum.is_some(),
    };
    if already {
        return 0;
    }

    // fall back to the local signal's declared range
    let declared = slot.signal.as_ref().and_then(|sig| match extreme {
        Extreme::Minimum => sig.minimum.clone(),
        Extreme::Maximum => sig.maximum.clone(),
    });
    if let (Some(values), Some(ty)) = (declared, slot.ty) {
        let coerced: Vec<Value> = values.iter().map(|v| v.coerce(ty)).collect();
        match extreme {
            Extreme::Minimum => slot.minimum = Some(coerced),
            Extreme::Maximum => slot.maximum = Some(coerced),
        }
        return 1;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::slot::{Direction, LocalSignal, Slot};
    use crate::value::ValueType;

    fn slot_with_shape(length: usize) -> Slot {
        let mut slot = Slot::new(Direction::Source);
        slot.set_type(ValueType::Float64);
        slot.set_length(length);
        slot
    }

    #[test]
    fn test_message_parameter_wins() {
        let mut slot = slot_with_shape(1);
        slot.minimum = Some(vec![Value::Float64(0.0)]);
        let n = resolve_range(&mut slot, Some(&[Value::Int32(5)]), None);
        assert_eq!(n, 1);
        assert_eq!(slot.minimum(), Some(&[Value::Float64(5.0)][..]));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut slot = slot_with_shape(1);
        assert_eq!(resolve_range(&mut slot, Some(&[Value::Float64(2.0)]), None), 1);
        assert_eq!(resolve_range(&mut slot, Some(&[Value::Float64(2.0)]), None), 0);
    }

    #[test]
    fn test_wrong_length_parameter_skipped() {
        let mut slot = slot_with_shape(2);
        slot.maximum = Some(vec![Value::Float64(1.0), Value::Float64(1.0)]);
        let n = resolve_range(&mut slot, None, Some(&[Value::Float64(9.0)]));
        assert_eq!(n, 0);
        assert_eq!(
            slot.maximum(),
            Some(&[Value::Float64(1.0), Value::Float64(1.0)][..])
        );
    }

    #[test]
    fn test_signal_range_fills_gaps_only() {
        let mut slot = Slot::from_signal(
            Direction::Source,
            LocalSignal {
                name: "pressure".into(),
                ty: ValueType::Float64,
                length: 1,
                minimum: Some(vec![Value::Float64(0.0)]),
                maximum: Some(vec![Value::Float64(10.0)]),
            },
        );
        slot.minimum = Some(vec![Value::Float64(-5.0)]);
        let n = resolve_range(&mut slot, None, None);
        // minimum kept, maximum copied from the signal
        assert_eq!(n, 1);
        assert_eq!(slot.minimum(), Some(&[Value::Float64(-5.0)][..]));
        assert_eq!(slot.maximum(), Some(&[Value::Float64(10.0)][..]));
    }

    #[test]
    fn test_unknown_shape_defers_message_params() {
        let mut slot = Slot::new(Direction::Source);
        let n = resolve_range(&mut slot, Some(&[Value::Float64(1.0)]), None);
        assert_eq!(n, 0);
        assert!(slot.minimum().is_none());
    }
}
