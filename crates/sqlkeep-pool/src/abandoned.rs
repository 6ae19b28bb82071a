//! Abandoned-connection tracking
//!
//! A borrower that keeps a connection without using it for longer than the
//! configured timeout is treated as having leaked it. The tracker tears such
//! connections down and frees their pool slots.

mod config;
mod trace;
mod tracker;


pub use config::AbandonedConfig;
pub use trace::CallSite;
pub use tracker::*;
