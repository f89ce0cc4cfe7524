//! Core traits and types for the Custodian persistence-context library.
//!
//! This crate provides the policy engine that sits between business code and
//! a document store:
//!
//! - [`entity`] - The `Entity` trait and declared `ObjectState`
//! - [`capability`] - Opt-in behaviours (`SoftDelete`, `MultiTenant`, ...) and the per-type classifier
//! - [`predicate`] - Query predicates, including the automatic global filter
//! - [`context`] - Change tracking, filtered queries and the commit pipeline (`DataContext`)
//! - [`repository`] - Typed aggregate-root access over a context (`Repository`)
//! - [`stamping`] - Pre-commit concurrency, tenant and audit stamping
//! - [`store`] - Storage abstraction (`Storage`) and the in-memory engine
//! - [`event`] - Domain events and post-commit dispatch (`Publisher`)
//! - [`concurrency`] - Concurrency tokens and conflict errors
//! - [`session`] - Ambient tenant and user (`SessionContext`)
//!
//! # Example
//!
//! ```
//! use custodian_core::{context::DataContext, store::inmemory};
//!
//! // Create an in-memory store and a unit of work over it
//! let store = inmemory::Store::new();
//! let ctx = DataContext::new(store);
//! assert!(!ctx.has_changes());
//! ```
//!
//! Most users should depend on the [`custodian`](https://docs.rs/custodian) crate,
//! which re-exports these types along with the `Entity` derive.

pub mod audit;
pub mod capability;
pub mod concurrency;
pub mod context;
pub mod entity;
pub mod event;
pub mod predicate;
pub mod repository;
pub mod session;
pub mod stamping;
pub mod state;
pub mod store;
mod tracking;
