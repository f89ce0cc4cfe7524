extern crate self as custodian;

#[path = "../support.rs"]
mod support;

pub use support::{audit, capability, entity, event};

use custodian_macros::Entity;
use entity::{Entity as _, ObjectState};
use serde::Serialize;

#[derive(Clone, Serialize, Entity)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    id: u64,
    #[serde(skip)]
    state: ObjectState,
    #[entity(soft_delete)]
    is_deleted: bool,
    #[entity(tenant, column = "owner")]
    #[serde(rename = "owner")]
    tenant_id: Option<i64>,
    #[entity(concurrency_stamp)]
    concurrency_stamp: Option<String>,
}

fn main() {
    assert_eq!(
        Account::capabilities().columns(),
        ["isDeleted", "owner", "concurrencyStamp"]
    );
}
