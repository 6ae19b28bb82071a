//! Connection validation
//!
//! Probes decide whether a pooled connection is still usable before it is
//! handed out, after it is returned and while it sits idle.

mod probe;

#[cfg(test)]
mod tests;

pub use probe::*;
