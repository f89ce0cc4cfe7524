// Minimal stand-ins for the traits the derive targets.

pub mod audit {
    #[derive(Clone, Default)]
    pub struct AuditInfo {
        pub creator_user_id: Option<i64>,
    }
}

pub mod event {
    pub trait EventKind {
        fn kind(&self) -> &'static str;
    }

    pub trait DomainEvent {
        const KIND: &'static str;
    }

    impl<T: DomainEvent> EventKind for T {
        fn kind(&self) -> &'static str {
            T::KIND
        }
    }
}

pub mod entity {
    use super::{capability::Capabilities, event::DomainEvent};

    #[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
    pub enum ObjectState {
        #[default]
        Unchanged,
        Added,
        Modified,
        Deleted,
    }

    pub trait Entity: Sized {
        const KIND: &'static str;
        type Id;
        type Event: super::event::EventKind;

        fn id(&self) -> &Self::Id;

        fn object_state(&self) -> ObjectState;

        fn set_object_state(&mut self, state: ObjectState);

        fn capabilities() -> Capabilities<Self>;
    }

    #[derive(Clone, Copy)]
    pub enum NoEvents {}

    impl DomainEvent for NoEvents {
        const KIND: &'static str = "none";
    }
}

pub mod capability {
    use std::marker::PhantomData;

    use super::{audit::AuditInfo, entity::Entity};

    pub trait SoftDelete {
        const DELETED_COLUMN: &'static str = "is_deleted";
        fn is_deleted(&self) -> bool;
    }

    pub trait MultiTenant {
        const TENANT_COLUMN: &'static str = "tenant_id";
        fn tenant_id(&self) -> Option<i64>;
        fn set_tenant_id(&mut self, tenant_id: Option<i64>);
    }

    pub trait ConcurrencyStamped {
        const STAMP_COLUMN: &'static str = "concurrency_stamp";
        fn concurrency_stamp(&self) -> Option<&str>;
        fn set_concurrency_stamp(&mut self, stamp: String);
    }

    pub trait Audited {
        fn audit(&self) -> &AuditInfo;
        fn audit_mut(&mut self) -> &mut AuditInfo;
    }

    pub trait HasDomainEvents: Entity {
        fn domain_events(&self) -> &[Self::Event];
        fn domain_events_mut(&mut self) -> &mut Vec<Self::Event>;
    }

    pub struct Capabilities<E>(Vec<&'static str>, PhantomData<E>);

    impl<E: Entity> Capabilities<E> {
        pub fn none() -> Self {
            Self(Vec::new(), PhantomData)
        }

        pub fn soft_delete(mut self) -> Self
        where
            E: SoftDelete,
        {
            self.0.push(E::DELETED_COLUMN);
            self
        }

        pub fn multi_tenant(mut self) -> Self
        where
            E: MultiTenant,
        {
            self.0.push(E::TENANT_COLUMN);
            self
        }

        pub fn concurrency_stamped(mut self) -> Self
        where
            E: ConcurrencyStamped,
        {
            self.0.push(E::STAMP_COLUMN);
            self
        }

        pub fn audited(self) -> Self
        where
            E: Audited,
        {
            self
        }

        pub fn domain_events(self) -> Self
        where
            E: HasDomainEvents,
        {
            self
        }

        pub fn columns(&self) -> &[&'static str] {
            &self.0
        }
    }
}
