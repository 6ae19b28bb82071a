//! sqlkeep core - Driver abstractions and shared types
//!
//! This crate provides the traits and types the pooling engine is built on:
//!
//! - `Connection`, `PreparedStatement`, `RowCursor` - implemented by drivers
//! - `ConnectionOpener` - opens one physical connection per call
//! - `StatementKey` - canonical statement-cache key
//! - `SessionSettings` - session attributes restored on every reuse
//! - `DbError` - the error taxonomy shared by every crate

mod connection;
mod error;
mod opener;
mod session;
mod statement;
mod types;

pub use connection::*;
pub use error::*;
pub use opener::*;
pub use session::*;
pub use statement::*;
pub use types::*;
