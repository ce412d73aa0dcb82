//! sigmap - distributed signal-mapping engine
//!
//! Devices publish named, typed, vector-valued signals; maps transform
//! values from one or more source signals into a destination signal in
//! real time. This crate implements the per-map transformation engine:
//! slot and history management, range resolution and calibration, the
//! mode machine with expression synthesis, boundary actions, and the
//! outbound update builder.

pub mod config;
pub mod constants;
pub mod error;
pub mod expr;
pub mod history;
pub mod map;
pub mod message;
pub mod value;

// Re-export main components
pub use config::EngineConfig;
pub use error::{Result, SigmapError};
pub use expr::{AffineCompiler, ExprCompiler, Expression, VectorSpec};
pub use history::HistoryBuffer;
pub use map::{
    BoundaryAction, Direction, IngestOutcome, LocalSignal, Map, MapAction, MapEvent, Mode, Slot,
};
pub use message::{AdminMessage, IdMap, QueueTransport, Transport, WireArg, WireFrame};
pub use value::{Timetag, Value, ValueType};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_creation() {
        let source = Slot::new(Direction::Source);
        let destination = Slot::new(Direction::Destination);
        let map = Map::new(
            vec![source],
            destination,
            Box::new(AffineCompiler),
            &EngineConfig::default(),
        );
        assert!(map.is_ok());
        assert_eq!(map.unwrap().mode(), Mode::Undefined);
    }

    #[test]
    fn test_map_requires_a_source() {
        let destination = Slot::new(Direction::Destination);
        let map = Map::new(
            Vec::new(),
            destination,
            Box::new(AffineCompiler),
            &EngineConfig::default(),
        );
        assert!(map.is_err());
    }

    #[test]
    fn test_history_smoke() {
        let mut h = HistoryBuffer::new(ValueType::Float32, 1, 2).unwrap();
        h.write(&[Value::Float32(1.0)], Timetag::ZERO).unwrap();
        assert_eq!(h.read(0).unwrap().0, &[Value::Float32(1.0)]);
    }
}
