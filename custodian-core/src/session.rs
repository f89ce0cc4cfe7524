//! Ambient session identity.
//!
//! The persistence context never resolves identity on its own. The host
//! application supplies a [`SessionContext`] (or anything implementing
//! [`SessionSource`]) per call, and the context reads the current tenant and
//! user from it when composing query filters and stamping audit fields.

/// Anything that can report the identity of the current caller.
///
/// Host applications typically implement this on their request or session
/// object and capture it with [`SessionContext::capture`].
pub trait SessionSource {
    /// Tenant the caller acts for. `None` means "no tenant restriction".
    fn current_tenant_id(&self) -> Option<i64>;

    /// User performing the operation. `None` for system or anonymous work.
    fn current_user_id(&self) -> Option<i64>;
}

/// A snapshot of the current tenant and user.
///
/// Copied into every query and commit so a single operation observes one
/// consistent identity even if the host session changes underneath it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SessionContext {
    tenant_id: Option<i64>,
    user_id: Option<i64>,
}

impl SessionContext {
    #[must_use]
    pub const fn new(tenant_id: Option<i64>, user_id: Option<i64>) -> Self {
        Self { tenant_id, user_id }
    }

    /// A session with neither tenant nor user.
    ///
    /// Queries run under it see every tenant's rows; commits leave audit user
    /// fields empty.
    #[must_use]
    pub const fn system() -> Self {
        Self::new(None, None)
    }

    #[must_use]
    pub const fn for_user(user_id: i64) -> Self {
        Self::new(None, Some(user_id))
    }

    #[must_use]
    pub const fn with_tenant(self, tenant_id: i64) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..self
        }
    }

    #[must_use]
    pub fn capture<S: SessionSource + ?Sized>(source: &S) -> Self {
        Self::new(source.current_tenant_id(), source.current_user_id())
    }

    #[must_use]
    pub const fn current_tenant_id(&self) -> Option<i64> {
        self.tenant_id
    }

    #[must_use]
    pub const fn current_user_id(&self) -> Option<i64> {
        self.user_id
    }
}

impl SessionSource for SessionContext {
    fn current_tenant_id(&self) -> Option<i64> {
        self.tenant_id
    }

    fn current_user_id(&self) -> Option<i64> {
        self.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RequestSession {
        tenant: Option<i64>,
        user: i64,
    }

    impl SessionSource for RequestSession {
        fn current_tenant_id(&self) -> Option<i64> {
            self.tenant
        }

        fn current_user_id(&self) -> Option<i64> {
            Some(self.user)
        }
    }

    #[test]
    fn system_session_has_no_identity() {
        let session = SessionContext::system();
        assert_eq!(session.current_tenant_id(), None);
        assert_eq!(session.current_user_id(), None);
        assert_eq!(session, SessionContext::default());
    }

    #[test]
    fn with_tenant_keeps_user() {
        let session = SessionContext::for_user(7).with_tenant(3);
        assert_eq!(session.current_tenant_id(), Some(3));
        assert_eq!(session.current_user_id(), Some(7));
    }

    #[test]
    fn capture_snapshots_host_session() {
        let host = RequestSession {
            tenant: None,
            user: 1,
        };
        let session = SessionContext::capture(&host);
        assert_eq!(session, SessionContext::new(None, Some(1)));
    }
}
