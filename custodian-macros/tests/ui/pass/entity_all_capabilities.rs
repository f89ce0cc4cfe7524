extern crate self as custodian;

#[path = "../support.rs"]
mod support;

pub use support::{audit, capability, entity, event};

use audit::AuditInfo;
use capability::{ConcurrencyStamped, HasDomainEvents, MultiTenant, SoftDelete};
use custodian_macros::Entity;
use entity::{Entity as _, ObjectState};
use event::{DomainEvent, EventKind};

#[derive(Clone)]
pub struct CustomerRenamed {
    pub name: String,
}

impl DomainEvent for CustomerRenamed {
    const KIND: &'static str = "customer.renamed";
}

#[derive(Clone)]
pub struct CustomerArchived;

impl DomainEvent for CustomerArchived {
    const KIND: &'static str = "customer.archived";
}

#[derive(Clone, Entity)]
#[entity(kind = "customer", events(CustomerRenamed, CustomerArchived))]
pub struct Customer {
    #[entity(id)]
    key: String,
    #[entity(state)]
    object_state: ObjectState,
    #[entity(soft_delete)]
    is_deleted: bool,
    #[entity(tenant, column = "owner_tenant")]
    tenant_id: Option<i64>,
    #[entity(concurrency_stamp)]
    stamp: Option<String>,
    #[entity(audit)]
    audit: AuditInfo,
    #[entity(events)]
    events: Vec<CustomerEvent>,
}

fn main() {
    let mut customer = Customer {
        key: "c1".into(),
        object_state: ObjectState::Unchanged,
        is_deleted: false,
        tenant_id: None,
        stamp: None,
        audit: AuditInfo::default(),
        events: Vec::new(),
    };

    assert_eq!(Customer::KIND, "customer");
    assert_eq!(
        Customer::capabilities().columns(),
        ["is_deleted", "owner_tenant", "stamp"]
    );

    customer.set_tenant_id(Some(3));
    customer.set_concurrency_stamp("v1".into());
    customer
        .domain_events_mut()
        .push(CustomerEvent::from(CustomerRenamed { name: "Ada".into() }));

    assert!(!customer.is_deleted());
    assert_eq!(customer.tenant_id(), Some(3));
    assert_eq!(customer.concurrency_stamp(), Some("v1"));
    assert_eq!(customer.domain_events()[0].kind(), "customer.renamed");
    assert_eq!(CustomerEvent::CustomerArchived(CustomerArchived).kind(), "customer.archived");
}
