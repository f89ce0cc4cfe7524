#![doc = include_str!("../README.md")]

#[cfg(feature = "test-util")]
pub use custodian_core::test;
pub use custodian_core::{
    audit,
    audit::{AuditInfo, Clock, SystemClock},
    capability,
    capability::{
        Audited, Capabilities, Capability, CapabilityError, ConcurrencyStamped, EntityDescriptor,
        HasDomainEvents, MultiTenant, SoftDelete, classify,
    },
    concurrency,
    concurrency::{ConcurrencyConflict, StampGenerator, UuidStamps},
    context,
    context::{DataContext, QueryError, SaveError},
    entity,
    entity::{NoEvents, ObjectState},
    event,
    event::{DomainEvent, EventKind, NoPublisher, Notification, Publisher},
    predicate,
    predicate::Predicate,
    repository,
    repository::{Repository, RepositoryError},
    session,
    session::{SessionContext, SessionSource},
    state,
    state::{EntryState, InvalidTransition},
};
// The derive shares its name with the trait, like serde's `Serialize`.
pub use custodian_core::entity::Entity;
pub use custodian_macros::Entity;
/// Cancellation signal accepted by the save methods.
pub use tokio_util::sync::CancellationToken;

pub mod store {

    pub use custodian_core::store::{
        CommitError, CommitOutcome, Committed, Document, NonEmpty, Storage, Write,
    };

    #[cfg(feature = "postgres")]
    #[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
    pub mod postgres {
        pub use custodian_postgres::{Error, Store};
    }

    pub use custodian_core::store::inmemory;
}
