//! Outcome shaping and the error taxonomy surfaced to the CLI.

pub(crate) mod errors;
pub(crate) mod outcome;
