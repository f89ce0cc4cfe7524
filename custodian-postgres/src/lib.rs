//! Postgres-backed storage for the Custodian persistence context.
//!
//! This crate provides a `PostgreSQL` implementation of the core storage trait:
//!
//! - [`Store`] - An implementation of [`custodian_core::store::Storage`]
//!
//! Every entity kind shares one table of JSONB documents keyed by
//! `(kind, id)`. Query filters are translated to SQL over the document, and
//! each commit batch runs in a single transaction.

mod error;
pub mod store;

pub use error::Error;
pub use store::Store;
