//! Pre-commit mutation of entities according to their capabilities.
//!
//! | Transition | Concurrency stamp | Tenant | Audit |
//! | --- | --- | --- | --- |
//! | Added | seed if unset | session tenant (auditable only) | creator + last modifier |
//! | Modified | rotate, condition on old | - | last modifier |
//! | Deleted | rotate, condition on old | - | - |
//! | Unchanged | - | - | - |

use chrono::{DateTime, Utc};

use crate::{
    capability::Capabilities,
    concurrency::{ExpectedStamp, StampGenerator},
    entity::Entity,
    session::SessionContext,
    state::{EntryState, InvalidTransition, TransitionReason},
};

/// Everything a stamping pass reads besides the entity itself.
#[derive(Clone, Copy)]
pub struct StampContext<'a> {
    pub session: &'a SessionContext,
    pub now: DateTime<Utc>,
    pub stamps: &'a dyn StampGenerator,
}

/// Apply the pre-commit mutations for `transition` to `entity`.
///
/// Returns the token the write must be conditioned on, if the type is
/// concurrency-stamped and the write touches an existing row.
pub fn stamp<E: Entity>(
    entity: &mut E,
    transition: EntryState,
    capabilities: &Capabilities<E>,
    ctx: &StampContext<'_>,
) -> Result<Option<ExpectedStamp>, InvalidTransition> {
    match transition {
        EntryState::Added => {
            if let Some(access) = capabilities.stamp_access()
                && (access.get)(entity).is_none()
            {
                (access.set)(entity, ctx.stamps.next_stamp());
            }
            if let Some(audit) = capabilities.audit_access() {
                if let Some(tenant) = capabilities.tenant_access()
                    && let Some(tenant_id) = ctx.session.current_tenant_id()
                {
                    (tenant.set)(entity, Some(tenant_id));
                }
                (audit.get_mut)(entity).stamp_created(ctx.session.current_user_id(), ctx.now);
            }
            Ok(None)
        }
        EntryState::Modified | EntryState::Deleted => {
            let expected = capabilities.stamp_access().map(|access| {
                let previous = (access.get)(entity).map(str::to_owned);
                (access.set)(entity, ctx.stamps.next_stamp());
                ExpectedStamp(previous)
            });
            if transition == EntryState::Modified
                && let Some(audit) = capabilities.audit_access()
            {
                (audit.get_mut)(entity).stamp_modified(ctx.session.current_user_id(), ctx.now);
            }
            Ok(expected)
        }
        EntryState::Unchanged => Ok(None),
        EntryState::Detached => Err(InvalidTransition::new(
            E::KIND,
            entity.id(),
            TransitionReason::NotTracked,
        )),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{
        capability::{Audited, ConcurrencyStamped, MultiTenant},
        test::{
            SequentialStamps,
            fixtures::{Customer, Note},
        },
    };

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn run<E: Entity>(
        entity: &mut E,
        transition: EntryState,
        session: &SessionContext,
        now: DateTime<Utc>,
        stamps: &SequentialStamps,
    ) -> Option<ExpectedStamp> {
        let ctx = StampContext {
            session,
            now,
            stamps,
        };
        stamp(entity, transition, &E::capabilities(), &ctx).unwrap()
    }

    #[test]
    fn added_seeds_stamp_tenant_and_audit() {
        let stamps = SequentialStamps::new("t");
        let session = SessionContext::for_user(1).with_tenant(5);
        let mut customer = Customer::new(1, "Ada");

        let expected = run(&mut customer, EntryState::Added, &session, at(9), &stamps);

        assert_eq!(expected, None);
        assert_eq!(customer.concurrency_stamp(), Some("t-1"));
        assert_eq!(customer.tenant_id(), Some(5));
        let audit = customer.audit();
        assert_eq!(audit.creator_user_id, Some(1));
        assert_eq!(audit.creation_time, Some(at(9)));
        assert_eq!(audit.last_modification_time, Some(at(9)));
    }

    #[test]
    fn added_keeps_caller_supplied_stamp() {
        let stamps = SequentialStamps::new("t");
        let mut customer = Customer::new(1, "Ada");
        customer.set_concurrency_stamp("mine".into());

        run(
            &mut customer,
            EntryState::Added,
            &SessionContext::system(),
            at(9),
            &stamps,
        );

        assert_eq!(customer.concurrency_stamp(), Some("mine"));
    }

    #[test]
    fn absent_session_tenant_leaves_tenant_alone() {
        let stamps = SequentialStamps::new("t");
        let mut customer = Customer::new(1, "Ada");
        customer.set_tenant_id(Some(3));

        run(
            &mut customer,
            EntryState::Added,
            &SessionContext::for_user(1),
            at(9),
            &stamps,
        );

        assert_eq!(customer.tenant_id(), Some(3));
    }

    #[test]
    fn modified_rotates_stamp_and_touches_last_modifier_only() {
        let stamps = SequentialStamps::new("t");
        let mut customer = Customer::new(1, "Ada");
        run(
            &mut customer,
            EntryState::Added,
            &SessionContext::for_user(1),
            at(9),
            &stamps,
        );

        let expected = run(
            &mut customer,
            EntryState::Modified,
            &SessionContext::for_user(2).with_tenant(8),
            at(10),
            &stamps,
        );

        assert_eq!(expected, Some(ExpectedStamp(Some("t-1".into()))));
        assert_eq!(customer.concurrency_stamp(), Some("t-2"));
        assert_eq!(customer.tenant_id(), None);
        let audit = customer.audit();
        assert_eq!(audit.creator_user_id, Some(1));
        assert_eq!(audit.creation_time, Some(at(9)));
        assert_eq!(audit.last_modifier_user_id, Some(2));
        assert_eq!(audit.last_modification_time, Some(at(10)));
    }

    #[test]
    fn deleted_rotates_stamp_without_audit() {
        let stamps = SequentialStamps::new("t");
        let mut customer = Customer::new(1, "Ada");
        customer.set_concurrency_stamp("old".into());

        let expected = run(
            &mut customer,
            EntryState::Deleted,
            &SessionContext::for_user(4),
            at(11),
            &stamps,
        );

        assert_eq!(expected, Some(ExpectedStamp(Some("old".into()))));
        assert_eq!(customer.concurrency_stamp(), Some("t-1"));
        assert_eq!(customer.audit().last_modifier_user_id, None);
    }

    #[test]
    fn unstamped_types_are_not_conditioned() {
        let stamps = SequentialStamps::new("t");
        let mut note = Note::new("n1", "hello");
        let expected = run(
            &mut note,
            EntryState::Modified,
            &SessionContext::system(),
            at(9),
            &stamps,
        );
        assert_eq!(expected, None);
    }

    #[test]
    fn unchanged_is_a_no_op() {
        let stamps = SequentialStamps::new("t");
        let mut customer = Customer::new(1, "Ada");
        let before = customer.clone();
        run(
            &mut customer,
            EntryState::Unchanged,
            &SessionContext::for_user(1).with_tenant(2),
            at(9),
            &stamps,
        );
        assert_eq!(customer, before);
    }
}
