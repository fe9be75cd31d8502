//! Step-by-step evolution of the start state through a pulse sequence, and
//! tabular formatting thereof.

use std::fmt;
use itertools::Itertools;
use ndarray as nd;
use num_complex::Complex64 as C64;
use crate::{
    error::{ SequenceError, SeqResult },
    sequence::PulseSequence,
};

/// The state after every pulse of a sequence.
///
/// Row 0 of [`Self::states`] is the start state, and row `t + 1` is the state
/// after the `t`-th pulse in time order, i.e. the pulse `L - 1 - t` in list
/// order. Formatting with [`Display`][fmt::Display] instead lays the states
/// out in list order with the start state rightmost, so that each column sits
/// under the colour that produced it.
#[derive(Clone, Debug)]
pub struct Trace {
    states: nd::Array2<C64>,
    labels: Vec<String>,
    ns: usize,
    digits: usize,
}

impl Trace {
    pub fn states(&self) -> &nd::Array2<C64> { &self.states }

    pub fn into_states(self) -> nd::Array2<C64> { self.states }

    /// Set the number of decimal places printed for each amplitude; defaults
    /// to 5.
    pub fn with_digits(mut self, digits: usize) -> Self {
        self.digits = digits;
        self
    }

    // (header, subheader, cells) for each column; each cell holds the excited
    // and ground amplitudes of one motional level, highest level first
    fn columns(&self) -> Vec<(String, Vec<String>, Vec<String>)> {
        let len = self.labels.len();
        let fmt_level = |row: nd::ArrayView1<C64>, offset: usize| -> Vec<String> {
            (0..self.ns).rev()
                .map(|n| format_complex(row[offset + n], self.digits))
                .collect()
        };
        self.labels.iter().enumerate()
            .map(|(i, label)| (label.clone(), self.states.row(len - i)))
            .chain(std::iter::once(("start".to_string(), self.states.row(0))))
            .map(|(label, row)| {
                let e = fmt_level(row, 0);
                let g = fmt_level(row, self.ns);
                let pairs
                    = std::iter::once(("|e>".to_string(), "|g>".to_string()))
                    .chain(e.into_iter().zip(g))
                    .collect::<Vec<_>>();
                let we = pairs.iter().map(|(e, _)| e.len()).max().unwrap_or(0);
                let wg = pairs.iter().map(|(_, g)| g.len()).max().unwrap_or(0);
                let cells: Vec<String>
                    = pairs.into_iter()
                    .map(|(e, g)| format!("{:<we$}  {:<wg$}", e, g))
                    .collect();
                (label, cells[..1].to_vec(), cells[1..].to_vec())
            })
            .collect()
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let levels: Vec<String>
            = (0..self.ns).rev().map(|n| format!("|{}>", n)).collect();
        let wl = levels.iter().map(|s| s.len()).max().unwrap_or(0);
        let columns = self.columns();
        let widths: Vec<usize>
            = columns.iter()
            .map(|(label, sub, cells)| {
                sub.iter().chain(cells.iter()).map(|s| s.len())
                    .chain(std::iter::once(label.len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        let pad = |s: &str, w: usize| format!("{:<w$}", s);

        let header
            = std::iter::once(pad("", wl))
            .chain(columns.iter().zip(&widths).map(|((l, _, _), w)| pad(l.as_str(), *w)))
            .join("  |  ");
        writeln!(f, "{}", header.trim_end())?;
        let sub
            = std::iter::once(pad("", wl))
            .chain(columns.iter().zip(&widths).map(|((_, s, _), w)| pad(s[0].as_str(), *w)))
            .join("  |  ");
        writeln!(f, "{}", sub.trim_end())?;
        for (k, level) in levels.iter().enumerate() {
            let line
                = std::iter::once(pad(level.as_str(), wl))
                .chain(
                    columns.iter().zip(&widths)
                    .map(|((_, _, c), w)| pad(c[k].as_str(), *w))
                )
                .join("  |  ");
            writeln!(f, "{}", line.trim_end())?;
        }
        Ok(())
    }
}

fn round_to(x: f64, digits: usize) -> f64 {
    let scale = 10.0_f64.powi(digits as i32);
    // adding zero clears negative zeros
    (x * scale).round() / scale + 0.0
}

/// Format a complex number rounded to `digits` decimal places, as `re`, `imi`,
/// or `(re ± imi)`.
pub fn format_complex(z: C64, digits: usize) -> String {
    let re = round_to(z.re, digits);
    let im = round_to(z.im, digits);
    if im == 0.0 {
        format!("{}", re)
    } else if re == 0.0 {
        format!("{}i", im)
    } else {
        let sign = if im < 0.0 { '-' } else { '+' };
        format!("({} {} {}i)", re, sign, im.abs())
    }
}

impl PulseSequence {
    /// Compute the state after each pulse of the sequence.
    ///
    /// If `angles` is `None`, the last angles loaded are traced instead. After
    /// [`Self::optimise`] these are the angles of the returned result, even if
    /// the minimizer stopped early.
    pub fn trace(&mut self, angles: Option<&[f64]>) -> SeqResult<Trace> {
        match angles {
            Some(angles) => self.load_angles(nd::aview1(angles))?,
            None => if self.angles().is_none() {
                return Err(SequenceError::NoAngles);
            },
        }
        let len = self.len();
        let ops = self.operators();
        let mut states: nd::Array2<C64>
            = nd::Array2::zeros((len + 1, 2 * self.ns()));
        states.row_mut(0).assign(self.start_state());
        for t in 0..len {
            let next = ops[len - 1 - t].op().dot(&states.row(t));
            states.row_mut(t + 1).assign(&next);
        }
        let labels: Vec<String>
            = ops.iter()
            .map(|op| {
                format!("{}({})", op.colour(), round_to(op.angle(), 5))
            })
            .collect();
        Ok(Trace { states, labels, ns: self.ns(), digits: 5 })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        hilbert::{ Internal, StateSpec, state_vector },
        pulse::Colour,
    };

    #[test]
    fn complex_formatting() {
        assert_eq!(format_complex(C64::new(0.5, 0.0), 5), "0.5");
        assert_eq!(format_complex(C64::new(0.0, -1.0), 5), "-1i");
        assert_eq!(format_complex(C64::new(1.0, -0.25), 5), "(1 - 0.25i)");
        assert_eq!(format_complex(C64::new(-0.123456, 2.0), 3), "(-0.123 + 2i)");
        assert_eq!(format_complex(C64::new(-1e-9, 1e-9), 5), "0");
    }

    #[test]
    fn trace_follows_time_order() {
        let colours = Colour::parse_sequence("rb").unwrap();
        let mut seq = PulseSequence::new(&colours, None, false, None).unwrap();
        assert!(matches!(seq.trace(None), Err(SequenceError::NoAngles)));
        let angles = [2.0_f64.sqrt().recip(), 1.0];
        let trace = seq.trace(Some(&angles)).unwrap();
        let states = trace.states();
        assert_eq!(states.nrows(), 3);
        let ns = seq.ns();
        // blue pi pulse: |g0> -> -i|e1>
        let e1 = state_vector(&[(1, Internal::E).into()], ns).unwrap();
        assert!((&states.row(1) - &(&e1 * (-C64::i()))).iter().all(|z| z.norm() < 1e-12));
        // red pi pulse: -i|e1> -> -|g2>
        let g2 = state_vector(&[StateSpec::from(2)], ns).unwrap();
        assert!((&states.row(2) + &g2).iter().all(|z| z.norm() < 1e-12));
        let u = seq.propagator(&angles).unwrap();
        let end = u.dot(seq.start_state());
        assert!((&states.row(2) - &end).iter().all(|z| z.norm() < 1e-12));
        // reuses the last angles
        let again = seq.trace(None).unwrap();
        assert_eq!(again.states(), states);
    }

    #[test]
    fn trace_table_layout() {
        let colours = Colour::parse_sequence("c").unwrap();
        let mut seq = PulseSequence::new(&colours, None, false, None).unwrap();
        let table = seq.trace(Some(&[1.0])).unwrap().to_string();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2 + seq.ns());
        assert!(lines[0].contains("c(1)"));
        assert!(lines[0].contains("start"));
        assert!(lines[1].contains("|e>") && lines[1].contains("|g>"));
        assert!(lines[2].starts_with("|0>"));
        assert!(lines[2].contains("-1i"));
    }
}
