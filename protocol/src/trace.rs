use serde::Serialize;

use crate::error::ParseError;

/// One sweep of the analyzer: power samples with their frequency axis.
///
/// `frequencies` and `powers` always have the same, non-zero length.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Trace {
    frequencies: Vec<f64>,
    powers: Vec<f64>,
}

/// `n` evenly spaced points from `center - span/2` to `center + span/2`,
/// both ends included. A single point sits on the center.
pub fn frequency_axis(center: f64, span: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![center],
        _ => {
            let start = center - span / 2.0;
            let stop = center + span / 2.0;
            let step = (stop - start) / (n - 1) as f64;
            let mut ret: Vec<f64> = (0..n).map(|k| start + k as f64 * step).collect();
            // pin the end point, accumulated rounding must not move it
            ret[n - 1] = stop;
            ret
        }
    }
}

impl Trace {
    /// Pairs raw samples with the axis derived from the sweep settings.
    pub fn from_sweep(center: f64, span: f64, powers: Vec<f64>) -> Result<Self, ParseError> {
        if powers.is_empty() {
            return Err(ParseError::EmptyTrace);
        }
        Ok(Self {
            frequencies: frequency_axis(center, span, powers.len()),
            powers,
        })
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn powers(&self) -> &[f64] {
        &self.powers
    }

    pub fn len(&self) -> usize {
        self.powers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.powers.is_empty()
    }

    /// Iterates over `(frequency, power)` pairs.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.frequencies.iter().cloned().zip(self.powers.iter().cloned())
    }

    /// The strongest point of the sweep.
    pub fn peak(&self) -> Option<(f64, f64)> {
        self.points()
            .fold(None, |best: Option<(f64, f64)>, x| match best {
                Some(best) if best.1 >= x.1 => Some(best),
                _ => Some(x),
            })
    }

    pub fn into_parts(self) -> (Vec<f64>, Vec<f64>) {
        (self.frequencies, self.powers)
    }
}
