#![deny(unsafe_code)]
#![deny(unused_must_use)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_panics_doc, clippy::module_name_repetitions)]

use std::{
    fmt::Display,
    process::{ExitCode, Termination},
};

/// Signals a programmer error: an operation that violates an internal
/// invariant of the solver. Not a user error; the process terminates with a
/// distinguished message that unit tests can match on.
macro_rules! invariant_violation {
    ($($arg:tt)+) => {
        panic!("invariant violation: {}", format_args!($($arg)+))
    };
}

macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::invariant_violation!($($arg)+);
        }
    };
}

pub(crate) use {invariant, invariant_violation};

#[macro_use]
pub mod qcnf;
mod clause;
pub mod cli;
mod datastructure;
mod literal;
pub mod qdimacs;
mod quantifier;
mod sat;
pub mod solver;

// Re-export
pub use quantifier::QuantTy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SolverResult {
    Satisfiable = 10,
    Unsatisfiable = 20,
    Unknown = 30,
}

impl Display for SolverResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolverResult::Satisfiable => write!(f, "satisfiable"),
            SolverResult::Unsatisfiable => write!(f, "unsatisfiable"),
            SolverResult::Unknown => write!(f, "unknown"),
        }
    }
}

impl Termination for SolverResult {
    fn report(self) -> ExitCode {
        ExitCode::from(self as u8)
    }
}
