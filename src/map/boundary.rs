//! Boundary actions applied to produced destination samples
//!
//! After the expression produces a destination sample, each element is
//! checked against the destination range and the configured min/max
//! actions. Inverted ranges are normalized by swapping the extremes and
//! the actions along with them. Folding reflects about the violated bound
//! and, when the reflection lands past the other bound, applies that
//! bound's action with triangle-wave parity.

use std::fmt;
use std::str::FromStr;

use crate::value::{Value, ValueType};

/// Policy applied when a destination element exceeds its range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoundaryAction {
    /// Leave the value unchanged
    #[default]
    None,
    /// Suppress the whole sample
    Mute,
    /// Snap to the violated bound
    Clamp,
    /// Reflect about the violated bound
    Fold,
    /// Translate by range multiples back into the range
    Wrap,
}

impl fmt::Display for BoundaryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Mute => "mute",
            Self::Clamp => "clamp",
            Self::Fold => "fold",
            Self::Wrap => "wrap",
        };
        write!(f, "{s}")
    }
}

impl FromStr for BoundaryAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "mute" => Ok(Self::Mute),
            "clamp" => Ok(Self::Clamp),
            "fold" => Ok(Self::Fold),
            "wrap" => Ok(Self::Wrap),
            _ => Err(()),
        }
    }
}

/// Result of one boundary pass over a destination sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryOutcome {
    /// No element requested muting; the sample may be emitted
    Pass,
    /// At least one element hit a mute action; suppress the emit
    Muted,
}

/// Apply boundary actions elementwise to a destination sample
///
/// Values are processed in f64 and written back as the destination's
/// element type. Processing is skipped entirely when both actions are
/// `None` or when a needed extreme is still unknown.
pub fn process(
    sample: &mut [Value],
    ty: ValueType,
    minimum: Option<&[Value]>,
    maximum: Option<&[Value]>,
    bound_min: BoundaryAction,
    bound_max: BoundaryAction,
) -> BoundaryOutcome {
    use BoundaryAction as B;

    if bound_min == B::None && bound_max == B::None {
        return BoundaryOutcome::Pass;
    }
    // an extreme may stay unknown as long as no action needs it
    if minimum.is_none() && (bound_min != B::None || bound_max == B::Wrap) {
        return BoundaryOutcome::Pass;
    }
    if maximum.is_none() && (bound_max != B::None || bound_min == B::Wrap) {
        return BoundaryOutcome::Pass;
    }
    if minimum.is_some_and(|m| m.len() != sample.len())
        || maximum.is_some_and(|m| m.len() != sample.len())
    {
        return BoundaryOutcome::Pass;
    }

    let mut muted = false;
    for i in 0..sample.len() {
        let mut value = sample[i].as_f64();
        let mut lo = minimum.map_or(f64::NEG_INFINITY, |m| m[i].as_f64());
        let mut hi = maximum.map_or(f64::INFINITY, |m| m[i].as_f64());
        let (act_min, act_max) = if lo <= hi {
            (bound_min, bound_max)
        } else {
            std::mem::swap(&mut lo, &mut hi);
            (bound_max, bound_min)
        };
        if lo == hi {
            continue;
        }
        let range = hi - lo;

        if value < lo {
            match act_min {
                B::Mute => muted = true,
                B::Clamp => value = lo,
                B::Fold => {
                    let difference = (value - lo).abs();
                    value = lo + difference;
                    if value > hi {
                        // reflection crossed the far bound
                        match act_max {
                            B::Mute => muted = true,
                            B::Clamp => value = hi,
                            B::Fold => {
                                let difference = (value - hi).abs();
                                let modulo = difference % range;
                                if ((difference / range) as i64) % 2 == 0 {
                                    value = hi - modulo;
                                } else {
                                    value = lo + modulo;
                                }
                            }
                            B::Wrap => {
                                let difference = (value - hi).abs();
                                value = lo + difference % range;
                            }
                            B::None => {}
                        }
                    }
                }
                B::Wrap => {
                    let difference = (value - lo).abs();
                    value = hi - difference % range;
                }
                B::None => {}
            }
        } else if value > hi {
            match act_max {
                B::Mute => muted = true,
                B::Clamp => value = hi,
                B::Fold => {
                    let difference = (value - hi).abs();
                    value = hi - difference;
                    if value < lo {
                        match act_min {
                            B::Mute => muted = true,
                            B::Clamp => value = lo,
                            B::Fold => {
                                let difference = (value - lo).abs();
                                let modulo = difference % range;
                                if ((difference / range) as i64) % 2 == 0 {
                                    value = lo + modulo;
                                } else {
                                    value = hi - modulo;
                                }
                            }
                            B::Wrap => {
                                let difference = (value - lo).abs();
                                value = hi - difference % range;
                            }
                            B::None => {}
                        }
                    }
                }
                B::Wrap => {
                    let difference = (value - hi).abs();
                    value = lo + difference % range;
                }
                B::None => {}
            }
        }

        sample[i] = Value::from_f64(ty, value);
    }

    if muted {
        BoundaryOutcome::Muted
    } else {
        BoundaryOutcome::Pass
    }
}
