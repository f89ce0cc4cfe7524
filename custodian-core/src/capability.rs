//! Capability declarations and per-type classification.
//!
//! An entity opts into behaviour by implementing one or more capability
//! traits and listing them in [`Entity::capabilities`]:
//!
//! | Trait | Effect |
//! | --- | --- |
//! | [`SoftDelete`] | rows flagged deleted are hidden from filtered queries |
//! | [`MultiTenant`] | filtered queries only see the session tenant's rows |
//! | [`ConcurrencyStamped`] | updates and deletes are conditioned on a token |
//! | [`Audited`] | creator and last-modifier are stamped on commit |
//! | [`HasDomainEvents`] | queued events are published after commit |
//!
//! [`classify`] turns a type's declaration into an [`EntityDescriptor`]. The
//! descriptor, including its composed query filter, is computed once per type
//! and shared for the life of the process.
//!
//! ```ignore
//! impl Entity for Customer {
//!     // ...
//!     fn capabilities() -> Capabilities<Self> {
//!         Capabilities::none().soft_delete().multi_tenant().audited()
//!     }
//! }
//! ```

use std::{
    any::{TypeId, type_name},
    collections::HashMap,
    fmt,
    sync::{Arc, OnceLock, PoisonError, RwLock},
};

use thiserror::Error;

use crate::{audit::AuditInfo, entity::Entity, predicate::Predicate};

/// Rows carrying a "deleted" flag instead of being physically removed.
pub trait SoftDelete {
    const DELETED_COLUMN: &'static str = "is_deleted";

    fn is_deleted(&self) -> bool;
}

/// Rows owned by a tenant.
pub trait MultiTenant {
    const TENANT_COLUMN: &'static str = "tenant_id";

    fn tenant_id(&self) -> Option<i64>;

    fn set_tenant_id(&mut self, tenant_id: Option<i64>);
}

/// Rows carrying an optimistic concurrency token.
pub trait ConcurrencyStamped {
    const STAMP_COLUMN: &'static str = "concurrency_stamp";

    fn concurrency_stamp(&self) -> Option<&str>;

    fn set_concurrency_stamp(&mut self, stamp: String);
}

/// Rows carrying creator and last-modifier metadata.
pub trait Audited {
    fn audit(&self) -> &AuditInfo;

    fn audit_mut(&mut self) -> &mut AuditInfo;
}

/// Entities that queue domain events for publication after commit.
pub trait HasDomainEvents: Entity {
    fn domain_events(&self) -> &[Self::Event];

    fn domain_events_mut(&mut self) -> &mut Vec<Self::Event>;

    fn raise(&mut self, event: impl Into<Self::Event>) {
        self.domain_events_mut().push(event.into());
    }

    fn take_domain_events(&mut self) -> Vec<Self::Event> {
        std::mem::take(self.domain_events_mut())
    }
}

/// One of the behaviours an entity type can opt into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    SoftDeletable,
    MultiTenant,
    ConcurrencyStamped,
    Auditable,
    DomainEvents,
}

impl Capability {
    pub const ALL: [Self; 5] = [
        Self::SoftDeletable,
        Self::MultiTenant,
        Self::ConcurrencyStamped,
        Self::Auditable,
        Self::DomainEvents,
    ];

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SoftDeletable => "soft-deletable",
            Self::MultiTenant => "multi-tenant",
            Self::ConcurrencyStamped => "concurrency-stamped",
            Self::Auditable => "auditable",
            Self::DomainEvents => "domain-events",
        })
    }
}

/// Set of [`Capability`] flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const EMPTY: Self = Self(0);

    #[must_use]
    pub const fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    #[must_use]
    pub const fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

/// Storage column names used by the column-bearing capabilities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Columns {
    pub deleted: Option<&'static str>,
    pub tenant: Option<&'static str>,
    pub stamp: Option<&'static str>,
}

impl Columns {
    pub fn iter(&self) -> impl Iterator<Item = (Capability, &'static str)> {
        [
            (Capability::SoftDeletable, self.deleted),
            (Capability::MultiTenant, self.tenant),
            (Capability::ConcurrencyStamped, self.stamp),
        ]
        .into_iter()
        .filter_map(|(capability, column)| column.map(|c| (capability, c)))
    }
}

pub(crate) struct SoftDeleteAccess<E> {
    pub(crate) column: &'static str,
    pub(crate) is_deleted: fn(&E) -> bool,
}

pub(crate) struct TenantAccess<E> {
    pub(crate) column: &'static str,
    pub(crate) get: fn(&E) -> Option<i64>,
    pub(crate) set: fn(&mut E, Option<i64>),
}

pub(crate) struct StampAccess<E> {
    pub(crate) column: &'static str,
    pub(crate) get: fn(&E) -> Option<&str>,
    pub(crate) set: fn(&mut E, String),
}

pub(crate) struct AuditAccess<E> {
    pub(crate) get_mut: fn(&mut E) -> &mut AuditInfo,
}

pub(crate) struct EventsAccess<E: Entity> {
    pub(crate) pending: fn(&E) -> usize,
    pub(crate) take: fn(&mut E) -> Vec<E::Event>,
}

fn pending_events<E: HasDomainEvents>(entity: &E) -> usize {
    entity.domain_events().len()
}

/// The capabilities an entity type declares, with typed accessors for each.
///
/// Built with the chaining methods, each of which is only available when the
/// type implements the matching capability trait.
pub struct Capabilities<E: Entity> {
    soft_delete: Option<SoftDeleteAccess<E>>,
    tenant: Option<TenantAccess<E>>,
    stamp: Option<StampAccess<E>>,
    audit: Option<AuditAccess<E>>,
    events: Option<EventsAccess<E>>,
}

impl<E: Entity> Capabilities<E> {
    #[must_use]
    pub const fn none() -> Self {
        Self {
            soft_delete: None,
            tenant: None,
            stamp: None,
            audit: None,
            events: None,
        }
    }

    #[must_use]
    pub fn soft_delete(mut self) -> Self
    where
        E: SoftDelete,
    {
        self.soft_delete = Some(SoftDeleteAccess {
            column: E::DELETED_COLUMN,
            is_deleted: E::is_deleted,
        });
        self
    }

    #[must_use]
    pub fn multi_tenant(mut self) -> Self
    where
        E: MultiTenant,
    {
        self.tenant = Some(TenantAccess {
            column: E::TENANT_COLUMN,
            get: E::tenant_id,
            set: E::set_tenant_id,
        });
        self
    }

    #[must_use]
    pub fn concurrency_stamped(mut self) -> Self
    where
        E: ConcurrencyStamped,
    {
        self.stamp = Some(StampAccess {
            column: E::STAMP_COLUMN,
            get: E::concurrency_stamp,
            set: E::set_concurrency_stamp,
        });
        self
    }

    #[must_use]
    pub fn audited(mut self) -> Self
    where
        E: Audited,
    {
        self.audit = Some(AuditAccess {
            get_mut: E::audit_mut,
        });
        self
    }

    #[must_use]
    pub fn domain_events(mut self) -> Self
    where
        E: HasDomainEvents,
    {
        self.events = Some(EventsAccess {
            pending: pending_events::<E>,
            take: E::take_domain_events,
        });
        self
    }

    #[must_use]
    pub fn set(&self) -> CapabilitySet {
        [
            (Capability::SoftDeletable, self.soft_delete.is_some()),
            (Capability::MultiTenant, self.tenant.is_some()),
            (Capability::ConcurrencyStamped, self.stamp.is_some()),
            (Capability::Auditable, self.audit.is_some()),
            (Capability::DomainEvents, self.events.is_some()),
        ]
        .into_iter()
        .filter_map(|(capability, present)| present.then_some(capability))
        .collect()
    }

    #[must_use]
    pub fn columns(&self) -> Columns {
        Columns {
            deleted: self.soft_delete.as_ref().map(|a| a.column),
            tenant: self.tenant.as_ref().map(|a| a.column),
            stamp: self.stamp.as_ref().map(|a| a.column),
        }
    }

    pub(crate) const fn soft_delete_access(&self) -> Option<&SoftDeleteAccess<E>> {
        self.soft_delete.as_ref()
    }

    pub(crate) const fn tenant_access(&self) -> Option<&TenantAccess<E>> {
        self.tenant.as_ref()
    }

    pub(crate) const fn stamp_access(&self) -> Option<&StampAccess<E>> {
        self.stamp.as_ref()
    }

    pub(crate) const fn audit_access(&self) -> Option<&AuditAccess<E>> {
        self.audit.as_ref()
    }

    pub(crate) const fn events_access(&self) -> Option<&EventsAccess<E>> {
        self.events.as_ref()
    }

    /// The entity's current concurrency token, if the type is stamped.
    pub(crate) fn current_stamp(&self, entity: &E) -> Option<String> {
        self.stamp
            .as_ref()
            .and_then(|access| (access.get)(entity))
            .map(str::to_owned)
    }
}

impl<E: Entity> Default for Capabilities<E> {
    fn default() -> Self {
        Self::none()
    }
}

/// A capability declaration that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("entity type `{type_name}` declares an empty kind")]
    EmptyKind { type_name: &'static str },
    #[error("entity `{kind}` declares an empty column name for its {capability} capability")]
    EmptyColumn {
        kind: &'static str,
        capability: Capability,
    },
    #[error(
        "entity `{kind}` maps both its {first} and {second} capabilities to column `{column}`"
    )]
    DuplicateColumn {
        kind: &'static str,
        column: &'static str,
        first: Capability,
        second: Capability,
    },
}

/// Classification of one entity type.
#[derive(Debug)]
pub struct EntityDescriptor {
    kind: &'static str,
    type_name: &'static str,
    type_id: TypeId,
    capabilities: CapabilitySet,
    columns: Columns,
    filter: Predicate,
}

impl EntityDescriptor {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }

    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[must_use]
    pub const fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    #[must_use]
    pub const fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(capability)
    }

    #[must_use]
    pub const fn columns(&self) -> Columns {
        self.columns
    }

    /// The global query filter: soft-delete clause first, then tenant.
    #[must_use]
    pub const fn filter(&self) -> &Predicate {
        &self.filter
    }
}

type Registry = RwLock<HashMap<TypeId, Result<Arc<EntityDescriptor>, CapabilityError>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::default)
}

/// Classify `E`, computing its descriptor on first use.
///
/// Every call for the same type returns the same shared descriptor (or the
/// same error). Safe to call from any number of threads.
pub fn classify<E: Entity>() -> Result<Arc<EntityDescriptor>, CapabilityError> {
    let type_id = TypeId::of::<E>();
    if let Some(cached) = registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&type_id)
    {
        return cached.clone();
    }

    let mut registry = registry().write().unwrap_or_else(PoisonError::into_inner);
    registry
        .entry(type_id)
        .or_insert_with(|| {
            let described = describe::<E>().map(Arc::new);
            match &described {
                Ok(descriptor) => tracing::debug!(
                    kind = descriptor.kind,
                    capabilities = ?descriptor.capabilities,
                    "classified entity type"
                ),
                Err(error) => tracing::warn!(%error, "entity type failed classification"),
            }
            described
        })
        .clone()
}

fn describe<E: Entity>() -> Result<EntityDescriptor, CapabilityError> {
    let type_name = type_name::<E>();
    let kind = E::KIND;
    if kind.trim().is_empty() {
        return Err(CapabilityError::EmptyKind { type_name });
    }

    let capabilities = E::capabilities();
    let columns = capabilities.columns();
    let mut seen: Vec<(&'static str, Capability)> = Vec::with_capacity(3);
    for (capability, column) in columns.iter() {
        if column.trim().is_empty() {
            return Err(CapabilityError::EmptyColumn { kind, capability });
        }
        if let Some(&(_, first)) = seen.iter().find(|(c, _)| *c == column) {
            return Err(CapabilityError::DuplicateColumn {
                kind,
                column,
                first,
                second: capability,
            });
        }
        seen.push((column, capability));
    }

    Ok(EntityDescriptor {
        kind,
        type_name,
        type_id: TypeId::of::<E>(),
        capabilities: capabilities.set(),
        columns,
        filter: Predicate::global_filter(&columns),
    })
}
