//! The mode machine: readiness-gated transitions and expression synthesis
//!
//! A map starts `undefined` and commits to `none`, `raw`, `linear`, or
//! `expression` once its slots know their shapes. Linear mode synthesizes
//! an affine expression from the resolved ranges and compiles it like any
//! other; a compile failure rejects the transition and leaves the previous
//! mode and expression in place. Every successful commit reallocates the
//! per-instance histories to the sizes the compiled expression reports.

use std::fmt;
use std::str::FromStr;

use crate::constants::MAX_HISTORY_SIZE;
use crate::error::{Result, SigmapError};
use crate::expr::VectorSpec;
use crate::history::HistoryBuffer;
use crate::map::Map;
use crate::value::ValueType;

/// Transformation applied between source and destination samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// No mode committed yet
    #[default]
    Undefined,
    /// Committed, but produces no output
    None,
    /// Forward the source prefix without evaluation
    Raw,
    /// Synthesized affine expression from resolved ranges
    Linear,
    /// Arbitrary compiled expression
    Expression,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Undefined => "undefined",
            Self::None => "none",
            Self::Raw => "raw",
            Self::Linear => "linear",
            Self::Expression => "expression",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Mode {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "raw" => Ok(Self::Raw),
            "linear" => Ok(Self::Linear),
            "expression" => Ok(Self::Expression),
            _ => Err(()),
        }
    }
}

impl Map {
    /// Commit raw mode; legal once every slot knows type and length
    pub(crate) fn set_mode_raw(&mut self) -> Result<()> {
        if !self.shapes_known() {
            return Err(SigmapError::RangeUnknown);
        }
        self.expr = None;
        self.mode = Mode::Raw;
        Ok(())
    }

    /// Commit the no-output mode
    pub(crate) fn set_mode_none(&mut self) {
        self.expr = None;
        self.mode = Mode::None;
    }

    /// Synthesize and commit a linear mapping from the resolved ranges
    ///
    /// Requires a single source with type, length, and both extrema known
    /// on each end. Per element: a degenerate source range pins the output
    /// to the destination minimum; identical ranges collapse to identity;
    /// otherwise scale and offset are chosen so the source extrema land on
    /// the destination extrema.
    pub(crate) fn set_mode_linear(&mut self) -> Result<()> {
        if self.sources.len() != 1 || !self.shapes_known() {
            return Err(SigmapError::RangeUnknown);
        }
        let src = &self.sources[0];
        let dst = &self.destination;
        let (Some(s_len), Some(d_len)) = (src.length, dst.length) else {
            return Err(SigmapError::RangeUnknown);
        };
        let (Some(s_min), Some(s_max), Some(d_min), Some(d_max)) =
            (src.minimum(), src.maximum(), dst.minimum(), dst.maximum())
        else {
            return Err(SigmapError::RangeUnknown);
        };

        let min_length = s_len.min(d_len);
        let mut scales = Vec::with_capacity(min_length);
        let mut offsets = Vec::with_capacity(min_length);
        for i in 0..min_length {
            let s0 = s_min[i].as_f64();
            let s1 = s_max[i].as_f64();
            let d0 = d_min[i].as_f64();
            let d1 = d_max[i].as_f64();
            if s0 == s1 {
                scales.push(0.0);
                offsets.push(d0);
            } else if s0 == d0 && s1 == d1 {
                scales.push(1.0);
                offsets.push(0.0);
            } else {
                // + 0.0 normalizes a negative zero before formatting
                scales.push((d1 - d0) / (s1 - s0) + 0.0);
                offsets.push((d1 * s0 - d0 * s1) / (s0 - s1) + 0.0);
            }
        }

        let mut expr = if d_len == s_len {
            String::from("y=x*")
        } else if d_len > s_len {
            if min_length == 1 {
                String::from("y[0]=x*")
            } else {
                format!("y[0:{}]=x*", min_length - 1)
            }
        } else if min_length == 1 {
            String::from("y=x[0]*")
        } else {
            format!("y=x[0:{}]*", min_length - 1)
        };
        expr.push_str(&format_coefficients(&scales));
        expr.push('+');
        expr.push_str(&format_coefficients(&offsets));

        self.replace_expression(&expr)?;
        self.mode = Mode::Linear;
        self.reallocate_histories()?;
        Ok(())
    }

    /// Compile and commit an expression mapping
    pub(crate) fn set_mode_expression(&mut self, source: &str) -> Result<()> {
        if !self.shapes_known() {
            return Err(SigmapError::RangeUnknown);
        }
        self.replace_expression(source)?;
        self.mode = Mode::Expression;
        self.reallocate_histories()?;
        Ok(())
    }

    /// Install a compiled expression, keeping the old one on failure
    ///
    /// A string identical to the installed expression is a successful
    /// no-op: no recompile, no reallocation.
    pub(crate) fn replace_expression(&mut self, source: &str) -> Result<()> {
        if self.expr.is_some() && self.expression_str.as_deref() == Some(source) {
            return Ok(());
        }
        let specs: Vec<VectorSpec> = self
            .sources
            .iter()
            .map(|s| s.vector_spec())
            .collect::<Option<_>>()
            .ok_or(SigmapError::RangeUnknown)?;
        let destination = self
            .destination
            .vector_spec()
            .ok_or(SigmapError::RangeUnknown)?;
        let compiled = self.compiler.compile(source, &specs, destination)?;
        self.expr = Some(compiled);
        self.expression_str = Some(source.to_string());
        Ok(())
    }

    /// Default expression when a mode is requested without a string
    ///
    /// One source maps elementwise, truncating the longer side; several
    /// sources average elementwise, padding shorter sources with zeros and
    /// slicing longer ones to the common length.
    pub(crate) fn synthesize_default_expression(&self) -> Option<String> {
        let d_len = self.destination.length?;
        if self.sources.len() == 1 {
            let s_len = self.sources[0].length?;
            return Some(if s_len == d_len {
                String::from("y=x")
            } else if s_len > d_len {
                if d_len == 1 {
                    String::from("y=x[0]")
                } else {
                    format!("y=x[0:{}]", d_len - 1)
                }
            } else if s_len == 1 {
                String::from("y[0]=x")
            } else {
                format!("y[0:{}]=x", s_len - 1)
            });
        }

        let mut max_len = 0;
        for s in &self.sources {
            max_len = max_len.max(s.length?);
        }
        let (mut expr, common) = if max_len < d_len {
            (format!("y[0:{}]=(", max_len - 1), max_len)
        } else {
            (String::from("y=("), d_len)
        };
        let mut terms = Vec::with_capacity(self.sources.len());
        for (i, s) in self.sources.iter().enumerate() {
            let len = s.length?;
            terms.push(if len > common {
                format!("x{i}[0:{}]", common - 1)
            } else if len < common {
                format!("[x{i}{}]", ",0".repeat(common - len))
            } else {
                format!("x{i}")
            });
        }
        expr.push_str(&terms.join("+"));
        expr.push_str(&format!(")/{}", self.sources.len()));
        Some(expr)
    }

    /// Resize every per-instance history to what the expression requires
    ///
    /// Source and destination histories only ever grow; variable tables
    /// are rebuilt and reset. Without a compiled expression there is
    /// nothing to size against.
    pub(crate) fn reallocate_histories(&mut self) -> Result<()> {
        let Some(expr) = self.expr.as_deref() else {
            return Ok(());
        };
        let input_sizes: Vec<usize> = (0..self.sources.len())
            .map(|i| expr.input_history_size(i).clamp(1, MAX_HISTORY_SIZE))
            .collect();
        let output_size = expr.output_history_size().clamp(1, MAX_HISTORY_SIZE);
        let var_shapes: Vec<(usize, usize)> = (0..expr.num_variables())
            .map(|v| {
                (
                    expr.variable_vector_length(v).max(1),
                    expr.variable_history_size(v).clamp(1, MAX_HISTORY_SIZE),
                )
            })
            .collect();

        for (slot, size) in self.sources.iter_mut().zip(&input_sizes) {
            if *size > slot.history_size {
                for history in &mut slot.histories {
                    history.realloc(*size, true)?;
                }
                slot.history_size = *size;
            }
        }
        if output_size > self.destination.history_size {
            for history in &mut self.destination.histories {
                history.realloc(output_size, false)?;
            }
            self.destination.history_size = output_size;
        }
        for table in &mut self.var_tables {
            table.clear();
            for (length, size) in &var_shapes {
                table.push(HistoryBuffer::new(ValueType::Float64, *length, *size)?);
            }
        }
        Ok(())
    }
}

fn format_coefficients(values: &[f64]) -> String {
    if values.len() == 1 {
        values[0].to_string()
    } else {
        let joined = values
            .iter()
            .map(f64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!("[{joined}]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::expr::AffineCompiler;
    use crate::map::slot::{Direction, Slot};
    use crate::value::Value;

    fn shaped_slot(direction: Direction, ty: ValueType, length: usize) -> Slot {
        let mut slot = Slot::new(direction);
        slot.set_type(ty);
        slot.set_length(length);
        slot.link_known = true;
        slot
    }

    fn ranged_map(src: (f64, f64), dst: (f64, f64)) -> Map {
        let mut source = shaped_slot(Direction::Source, ValueType::Float64, 1);
        source.minimum = Some(vec![Value::Float64(src.0)]);
        source.maximum = Some(vec![Value::Float64(src.1)]);
        let mut destination = shaped_slot(Direction::Destination, ValueType::Float64, 1);
        destination.minimum = Some(vec![Value::Float64(dst.0)]);
        destination.maximum = Some(vec![Value::Float64(dst.1)]);
        Map::new(
            vec![source],
            destination,
            Box::new(AffineCompiler),
            &EngineConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_mode_name_round_trip() {
        for mode in [Mode::None, Mode::Raw, Mode::Linear, Mode::Expression] {
            assert_eq!(mode.to_string().parse(), Ok(mode));
        }
        assert!("undefined".parse::<Mode>().is_err());
    }

    #[test]
    fn test_linear_synthesis_scalar() {
        let mut map = ranged_map((0.0, 10.0), (0.0, 1.0));
        map.set_mode_linear().unwrap();
        assert_eq!(map.mode(), Mode::Linear);
        assert_eq!(map.expression(), Some("y=x*0.1+0"));
    }

    #[test]
    fn test_linear_synthesis_identity_ranges() {
        let mut map = ranged_map((0.0, 10.0), (0.0, 10.0));
        map.set_mode_linear().unwrap();
        assert_eq!(map.expression(), Some("y=x*1+0"));
    }

    #[test]
    fn test_linear_synthesis_degenerate_source() {
        let mut map = ranged_map((5.0, 5.0), (2.0, 8.0));
        map.set_mode_linear().unwrap();
        assert_eq!(map.expression(), Some("y=x*0+2"));
    }

    #[test]
    fn test_linear_synthesis_inverted_destination() {
        let mut map = ranged_map((0.0, 10.0), (100.0, 0.0));
        map.set_mode_linear().unwrap();
        assert_eq!(map.expression(), Some("y=x*-10+100"));
    }

    #[test]
    fn test_linear_rejected_without_ranges() {
        let source = shaped_slot(Direction::Source, ValueType::Float64, 1);
        let destination = shaped_slot(Direction::Destination, ValueType::Float64, 1);
        let mut map = Map::new(
            vec![source],
            destination,
            Box::new(AffineCompiler),
            &EngineConfig::default(),
        )
        .unwrap();
        assert!(matches!(
            map.set_mode_linear(),
            Err(SigmapError::RangeUnknown)
        ));
        assert_eq!(map.mode(), Mode::Undefined);
    }

    #[test]
    fn test_linear_synthesis_vector_coefficients() {
        let mut source = shaped_slot(Direction::Source, ValueType::Float64, 2);
        source.minimum = Some(vec![Value::Float64(0.0); 2]);
        source.maximum = Some(vec![Value::Float64(10.0); 2]);
        let mut destination = shaped_slot(Direction::Destination, ValueType::Float64, 2);
        destination.minimum = Some(vec![Value::Float64(0.0); 2]);
        destination.maximum = Some(vec![Value::Float64(1.0); 2]);
        let mut map = Map::new(
            vec![source],
            destination,
            Box::new(AffineCompiler),
            &EngineConfig::default(),
        )
        .unwrap();
        map.set_mode_linear().unwrap();
        assert_eq!(map.expression(), Some("y=x*[0.1,0.1]+[0,0]"));
    }

    #[test]
    fn test_default_synthesis_single_source() {
        let mut map = ranged_map((0.0, 1.0), (0.0, 1.0));
        assert_eq!(map.synthesize_default_expression().as_deref(), Some("y=x"));
        map.sources[0].length = Some(4);
        map.destination.length = Some(2);
        assert_eq!(
            map.synthesize_default_expression().as_deref(),
            Some("y=x[0:1]")
        );
        map.sources[0].length = Some(1);
        assert_eq!(
            map.synthesize_default_expression().as_deref(),
            Some("y[0]=x")
        );
    }

    #[test]
    fn test_default_synthesis_multi_source_mean() {
        let a = shaped_slot(Direction::Source, ValueType::Float64, 2);
        let b = shaped_slot(Direction::Source, ValueType::Float64, 1);
        let destination = shaped_slot(Direction::Destination, ValueType::Float64, 2);
        let map = Map::new(
            vec![a, b],
            destination,
            Box::new(AffineCompiler),
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(
            map.synthesize_default_expression().as_deref(),
            Some("y=(x0+[x1,0])/2")
        );
    }

    #[test]
    fn test_failed_compile_preserves_prior_mode() {
        let mut map = ranged_map((0.0, 10.0), (0.0, 1.0));
        map.set_mode_linear().unwrap();
        let before = map.expression().map(str::to_string);
        assert!(map.set_mode_expression("y=x*").is_err());
        assert_eq!(map.mode(), Mode::Linear);
        assert_eq!(map.expression(), before.as_deref());
    }

    #[test]
    fn test_raw_mode_clears_expression() {
        let mut map = ranged_map((0.0, 10.0), (0.0, 1.0));
        map.set_mode_linear().unwrap();
        map.set_mode_raw().unwrap();
        assert_eq!(map.mode(), Mode::Raw);
        assert!(map.expr.is_none());
    }
}
