//! Shared test domain: tenant-owned customers with every capability, and
//! plain soft-deletable notes.

#![allow(dead_code)]

use custodian::{
    AuditInfo, DataContext, DomainEvent, Entity, ObjectState,
    store::inmemory,
    test::{ManualClock, RecordingPublisher, SequentialStamps},
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomerRenamed {
    pub name: String,
}

impl DomainEvent for CustomerRenamed {
    const KIND: &'static str = "customer.renamed";
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomerArchived;

impl DomainEvent for CustomerArchived {
    const KIND: &'static str = "customer.archived";
}

#[derive(Clone, Debug, Serialize, Deserialize, Entity)]
#[entity(
    kind = "customer",
    events(CustomerRenamed, CustomerArchived),
    derives(Debug, PartialEq, Eq)
)]
pub struct Customer {
    pub id: u32,
    pub name: String,
    #[entity(soft_delete)]
    pub is_deleted: bool,
    #[entity(tenant)]
    pub tenant_id: Option<i64>,
    #[entity(concurrency_stamp)]
    pub concurrency_stamp: Option<String>,
    #[entity(audit)]
    #[serde(flatten)]
    pub audit: AuditInfo,
    #[entity(events)]
    #[serde(skip)]
    pub events: Vec<CustomerEvent>,
    #[serde(skip)]
    pub state: ObjectState,
}

impl Customer {
    pub fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            is_deleted: false,
            tenant_id: None,
            concurrency_stamp: None,
            audit: AuditInfo::default(),
            events: Vec::new(),
            state: ObjectState::Unchanged,
        }
    }

    pub fn owned_by(mut self, tenant_id: i64) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn rename(&mut self, name: &str) {
        self.name = name.to_string();
        self.events.push(
            CustomerRenamed {
                name: name.to_string(),
            }
            .into(),
        );
        self.state = ObjectState::Modified;
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Entity)]
pub struct Note {
    pub id: String,
    pub text: String,
    #[entity(soft_delete)]
    pub archived: bool,
    #[serde(skip)]
    pub state: ObjectState,
}

impl Note {
    pub fn new(id: &str, text: &str) -> Self {
        Self {
            id: id.to_string(),
            text: text.to_string(),
            archived: false,
            state: ObjectState::Unchanged,
        }
    }

    pub fn archived(mut self) -> Self {
        self.archived = true;
        self
    }
}

pub type Context = DataContext<inmemory::Store, RecordingPublisher>;

/// A context with deterministic time and tokens over `store`.
pub fn context(store: &inmemory::Store, clock: &ManualClock, prefix: &str) -> Context {
    DataContext::new(store.clone())
        .with_publisher(RecordingPublisher::default())
        .with_clock(clock.clone())
        .with_stamps(SequentialStamps::new(prefix))
}

pub fn ids<E: Entity>(entities: &[&E]) -> Vec<String> {
    entities.iter().map(|e| e.id().to_string()).collect()
}
