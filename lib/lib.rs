#![allow(non_snake_case)]

//! Coherent control of a trapped ion coupled to a single motional mode.
//!
//! A [`PulseSequence`][sequence::PulseSequence] holds a fixed sequence of
//! carrier, red-sideband and blue-sideband pulses. Given the angle of each
//! pulse, it computes the full propagator, its derivatives with respect to
//! every angle, and the distance between the evolved start state and an
//! equal-weight target superposition (along with that distance's gradient with
//! respect to angles and target phases). These feed a BFGS minimizer to find
//! the pulse angles that best prepare the target.
//!
//! All angles and phases are measured in units of π.

pub mod error;
pub mod hilbert;
pub mod pulse;
pub mod minimize;
pub mod sequence;
pub mod optimise;
pub mod trace;

pub use error::{ SequenceError, SeqResult };
pub use hilbert::{ Internal, StateSpec };
pub use minimize::{ BfgsOptions, MinimizeResult };
pub use pulse::Colour;
pub use sequence::{ Gradient, PulseSequence };
