extern crate self as custodian;

#[path = "../support.rs"]
mod support;

pub use support::{audit, capability, entity, event};

use custodian_macros::Entity;
use entity::{Entity as _, ObjectState};

#[derive(Clone, Entity)]
pub struct PurchaseOrder {
    id: u64,
    state: ObjectState,
}

fn main() {
    assert_eq!(PurchaseOrder::KIND, "purchase-order");
    let mut order = PurchaseOrder {
        id: 7,
        state: ObjectState::Unchanged,
    };
    order.set_object_state(ObjectState::Added);
    assert_eq!(order.object_state(), ObjectState::Added);
    assert_eq!(*order.id(), 7);
    assert!(PurchaseOrder::capabilities().columns().is_empty());
}
