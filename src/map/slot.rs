//! Map endpoints: source and destination slots
//!
//! A slot is one endpoint of a map. It carries the endpoint's declared
//! shape (element type, vector length), the optional range extrema, one
//! history buffer per instance, and the readiness flags that gate mode
//! selection. Source slots additionally carry the calibration accumulator
//! and the `cause_update` flag.

use tracing::warn;

use crate::error::{Result, SigmapError};
use crate::expr::VectorSpec;
use crate::history::HistoryBuffer;
use crate::value::{Value, ValueType};

/// Which end of the map a slot sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// One of the map's inputs
    Source,
    /// The map's single output
    Destination,
}

/// Shape and declared range of a signal attached locally to a slot
///
/// Ranges are copied in on attachment; the caller keeps its own buffers.
#[derive(Debug, Clone)]
pub struct LocalSignal {
    /// Signal name, used in lifecycle events
    pub name: String,
    /// Element type
    pub ty: ValueType,
    /// Vector length
    pub length: usize,
    /// Declared range minimum, if any
    pub minimum: Option<Vec<Value>>,
    /// Declared range maximum, if any
    pub maximum: Option<Vec<Value>>,
}

/// One endpoint of a map
#[derive(Debug)]
pub struct Slot {
    pub(crate) direction: Direction,
    pub(crate) ty: Option<ValueType>,
    pub(crate) length: Option<usize>,
    pub(crate) minimum: Option<Vec<Value>>,
    pub(crate) maximum: Option<Vec<Value>>,
    /// One history per instance
    pub(crate) histories: Vec<HistoryBuffer>,
    /// Current per-instance history capacity
    pub(crate) history_size: usize,
    pub(crate) link_known: bool,
    /// Whether ingesting into this slot triggers an emit
    pub(crate) cause_update: bool,
    /// Latched once the first calibration sample is seen
    pub(crate) calibrating: bool,
    /// Locally attached signal, if any
    pub(crate) signal: Option<LocalSignal>,
    /// Slot index assigned by the remote peer, tagged onto updates
    pub(crate) remote_slot: Option<i32>,
}

impl Slot {
    /// Create a slot with an unknown remote endpoint
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            ty: None,
            length: None,
            minimum: None,
            maximum: None,
            histories: Vec::new(),
            history_size: 1,
            link_known: false,
            cause_update: direction == Direction::Source,
            calibrating: false,
            signal: None,
            remote_slot: None,
        }
    }

    /// Create a slot attached to a local signal
    ///
    /// Type and length come from the signal; the link is known by
    /// definition for local endpoints.
    pub fn from_signal(direction: Direction, signal: LocalSignal) -> Self {
        Self {
            direction,
            ty: Some(signal.ty),
            length: Some(signal.length),
            minimum: None,
            maximum: None,
            histories: Vec::new(),
            history_size: 1,
            link_known: true,
            cause_update: direction == Direction::Source,
            calibrating: false,
            signal: Some(signal),
            remote_slot: None,
        }
    }

    /// Which end of the map this slot sits on
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Element type, once known
    pub fn value_type(&self) -> Option<ValueType> {
        self.ty
    }

    /// Vector length, once known
    pub fn vector_length(&self) -> Option<usize> {
        self.length
    }

    /// Range minimum, once resolved
    pub fn minimum(&self) -> Option<&[Value]> {
        self.minimum.as_deref()
    }

    /// Range maximum, once resolved
    pub fn maximum(&self) -> Option<&[Value]> {
        self.maximum.as_deref()
    }

    /// Whether ingest on this slot triggers an emit
    pub fn cause_update(&self) -> bool {
        self.cause_update
    }

    pub(crate) fn type_known(&self) -> bool {
        self.ty.is_some()
    }

    pub(crate) fn length_known(&self) -> bool {
        self.length.is_some()
    }

    /// Type, length, and link all known
    pub fn ready(&self) -> bool {
        self.type_known() && self.length_known() && self.link_known
    }

    /// Shape of this slot, once type and length are known
    pub fn vector_spec(&self) -> Option<VectorSpec> {
        Some(VectorSpec {
            ty: self.ty?,
            length: self.length?,
        })
    }

    /// Adopt a declared element type; idempotent once known
    pub(crate) fn set_type(&mut self, ty: ValueType) -> bool {
        if self.ty.is_some() {
            return false;
        }
        self.ty = Some(ty);
        true
    }

    /// Adopt a declared vector length; idempotent once known
    pub(crate) fn set_length(&mut self, length: usize) -> bool {
        if self.length.is_some() {
            return false;
        }
        self.length = Some(length);
        true
    }

    /// Allocate per-instance histories up through `count` instances
    ///
    /// No-op until type and length are known. Existing histories are left
    /// untouched; new ones start zeroed at the current history capacity.
    pub(crate) fn init_instances(&mut self, count: usize) -> Result<()> {
        let (Some(ty), Some(length)) = (self.ty, self.length) else {
            return Ok(());
        };
        while self.histories.len() < count {
            self.histories
                .push(HistoryBuffer::new(ty, length, self.history_size)?);
        }
        Ok(())
    }

    /// History buffer for one instance
    pub(crate) fn history(&self, instance: usize) -> Result<&HistoryBuffer> {
        self.histories
            .get(instance)
            .ok_or(SigmapError::OutOfBounds {
                index: instance,
                limit: self.histories.len(),
            })
    }

    /// Mutable history buffer for one instance
    pub(crate) fn history_mut(&mut self, instance: usize) -> Result<&mut HistoryBuffer> {
        let limit = self.histories.len();
        self.histories
            .get_mut(instance)
            .ok_or(SigmapError::OutOfBounds {
                index: instance,
                limit,
            })
    }

    /// Fold one observed sample into the calibration accumulator
    ///
    /// The first sample after calibration starts sets min and max
    /// elementwise; later samples widen them. Returns whether either
    /// extreme changed.
    pub(crate) fn calibrate(&mut self, sample: &[Value]) -> bool {
        let Some(ty) = self.ty else {
            return false;
        };
        let Some(length) = self.length else {
            return false;
        };
        if sample.len() != length {
            warn!(
                expected = length,
                actual = sample.len(),
                "calibration sample length mismatch, skipped"
            );
            return false;
        }

        if !self.calibrating {
            let coerced: Vec<Value> = sample.iter().map(|v| v.coerce(ty)).collect();
            self.minimum = Some(coerced.clone());
            self.maximum = Some(coerced);
            self.calibrating = true;
            return true;
        }

        let mut changed = false;
        let minimum = self
            .minimum
            .get_or_insert_with(|| vec![Value::zero(ty); length]);
        for (lo, v) in minimum.iter_mut().zip(sample) {
            if v.as_f64() < lo.as_f64() {
                *lo = v.coerce(ty);
                changed = true;
            }
        }
        let maximum = self
            .maximum
            .get_or_insert_with(|| vec![Value::zero(ty); length]);
        for (hi, v) in maximum.iter_mut().zip(sample) {
            if v.as_f64() > hi.as_f64() {
                *hi = v.coerce(ty);
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_slot(direction: Direction, length: usize) -> Slot {
        let mut slot = Slot::new(direction);
        slot.set_type(ValueType::Float64);
        slot.set_length(length);
        slot.link_known = true;
        slot
    }

    #[test]
    fn test_readiness_requires_all_flags() {
        let mut slot = Slot::new(Direction::Source);
        assert!(!slot.ready());
        slot.set_type(ValueType::Int32);
        slot.set_length(2);
        assert!(!slot.ready());
        slot.link_known = true;
        assert!(slot.ready());
    }

    #[test]
    fn test_type_and_length_latch_once() {
        let mut slot = Slot::new(Direction::Destination);
        assert!(slot.set_type(ValueType::Float32));
        assert!(!slot.set_type(ValueType::Int32));
        assert_eq!(slot.value_type(), Some(ValueType::Float32));

        assert!(slot.set_length(3));
        assert!(!slot.set_length(5));
        assert_eq!(slot.vector_length(), Some(3));
    }

    #[test]
    fn test_signal_slot_is_linked() {
        let slot = Slot::from_signal(
            Direction::Source,
            LocalSignal {
                name: "tilt".into(),
                ty: ValueType::Float32,
                length: 2,
                minimum: None,
                maximum: None,
            },
        );
        assert!(slot.ready());
        assert_eq!(slot.vector_length(), Some(2));
    }

    #[test]
    fn test_first_calibration_sample_sets_both_extremes() {
        let mut slot = float_slot(Direction::Source, 2);
        let changed = slot.calibrate(&[Value::Float64(3.0), Value::Float64(-1.0)]);
        assert!(changed);
        assert_eq!(
            slot.minimum(),
            Some(&[Value::Float64(3.0), Value::Float64(-1.0)][..])
        );
        assert_eq!(slot.minimum(), slot.maximum());
    }

    #[test]
    fn test_later_samples_widen_elementwise() {
        let mut slot = float_slot(Direction::Source, 1);
        slot.calibrate(&[Value::Float64(5.0)]);
        assert!(slot.calibrate(&[Value::Float64(2.0)]));
        assert!(slot.calibrate(&[Value::Float64(9.0)]));
        // inside the accumulated range: no change
        assert!(!slot.calibrate(&[Value::Float64(4.0)]));
        assert_eq!(slot.minimum(), Some(&[Value::Float64(2.0)][..]));
        assert_eq!(slot.maximum(), Some(&[Value::Float64(9.0)][..]));
    }

    #[test]
    fn test_instance_allocation_waits_for_shape() {
        let mut slot = Slot::new(Direction::Source);
        slot.init_instances(2).unwrap();
        assert!(slot.histories.is_empty());

        slot.set_type(ValueType::Int32);
        slot.set_length(1);
        slot.init_instances(2).unwrap();
        assert_eq!(slot.histories.len(), 2);
        assert!(slot.history(1).unwrap().is_empty());
        assert!(slot.history(2).is_err());
    }
}
