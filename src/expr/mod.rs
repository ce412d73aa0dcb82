//! Compiled-expression contract consumed by the map engine
//!
//! The engine treats a compiled expression as opaque: it queries the history
//! sizes the expression needs, guarantees the per-instance buffers exist at
//! those capacities, and calls [`Expression::evaluate`] on the hot path.
//! Anything satisfying the trait plugs in, including test mocks; the builtin
//! [`AffineCompiler`] covers the expression family the mode machine
//! synthesizes.

pub mod affine;

pub use affine::AffineCompiler;

use std::fmt;

use crate::error::Result;
use crate::history::HistoryBuffer;
use crate::value::{Timetag, ValueType};

/// Element type and vector length of one expression endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorSpec {
    /// Element type
    pub ty: ValueType,
    /// Vector length
    pub length: usize,
}

/// Per-element output tags filled in by [`Expression::evaluate`]
///
/// `Some(ty)` is a produced element of that type; `None` means the element
/// is omitted from the outbound update (a nil on the wire).
pub type Typestring = Vec<Option<ValueType>>;

/// A compiled expression, ready to evaluate
pub trait Expression: fmt::Debug {
    /// History capacity required for source slot `index`
    fn input_history_size(&self, index: usize) -> usize;

    /// History capacity required for the destination slot
    fn output_history_size(&self) -> usize;

    /// Number of internal state variables
    fn num_variables(&self) -> usize;

    /// History capacity required for variable `index`
    fn variable_history_size(&self, index: usize) -> usize;

    /// Vector length of variable `index`
    fn variable_vector_length(&self, index: usize) -> usize;

    /// Produce one destination sample from the source histories
    ///
    /// Writes exactly one new sample into `output` (advancing its ring
    /// position) and fills `typestring` per element. All per-instance
    /// histories referenced here must already exist at their requested
    /// capacities. Returns `false` when the expression declines to produce
    /// an update.
    fn evaluate(
        &self,
        sources: &[&HistoryBuffer],
        timetag: Timetag,
        output: &mut HistoryBuffer,
        variables: &mut [HistoryBuffer],
        instance: usize,
        typestring: &mut Typestring,
    ) -> Result<bool>;
}

/// Compiles expression strings against known slot shapes
pub trait ExprCompiler: fmt::Debug {
    /// Compile `source` for the given source and destination shapes
    fn compile(
        &self,
        source: &str,
        sources: &[VectorSpec],
        destination: VectorSpec,
    ) -> Result<Box<dyn Expression>>;
}
