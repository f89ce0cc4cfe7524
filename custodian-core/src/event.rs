//! Domain events and their post-commit dispatch.
//!
//! Entities with the domain-events capability queue events while business
//! logic runs. After a successful commit the context drains every queue into
//! [`Notification`]s and hands them to a [`Publisher`]. Publishing fans out
//! concurrently and the commit call waits for all of it.

use std::{any::Any, convert::Infallible, fmt, future::Future, sync::Arc};

use futures::future::join_all;
use thiserror::Error;

/// Marker trait for concrete event types.
///
/// Each event carries a unique [`Self::KIND`] identifier that publishers can
/// route on without downcasting.
pub trait DomainEvent {
    const KIND: &'static str;
}

/// Extension trait for getting the event kind from an event instance.
///
/// Blanket-implemented for every [`DomainEvent`]. Event enums that wrap
/// several concrete events implement it by hand and forward to the variant.
pub trait EventKind {
    fn kind(&self) -> &'static str;
}

impl<T: DomainEvent> EventKind for T {
    fn kind(&self) -> &'static str {
        T::KIND
    }
}

/// A drained domain event, tagged with the entity that raised it.
///
/// The payload is type-erased so a single publisher can serve every entity
/// type. Use [`Notification::downcast_ref`] to recover it.
#[derive(Clone)]
pub struct Notification {
    source_kind: &'static str,
    source_id: String,
    event_kind: &'static str,
    event: Arc<dyn Any + Send + Sync>,
}

impl Notification {
    #[must_use]
    pub fn new<Ev>(source_kind: &'static str, source_id: String, event: Ev) -> Self
    where
        Ev: EventKind + Send + Sync + 'static,
    {
        Self {
            source_kind,
            source_id,
            event_kind: event.kind(),
            event: Arc::new(event),
        }
    }

    /// Kind of the entity that raised the event.
    #[must_use]
    pub const fn source_kind(&self) -> &'static str {
        self.source_kind
    }

    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.event_kind
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.event.downcast_ref()
    }
}

impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("source_kind", &self.source_kind)
            .field("source_id", &self.source_id)
            .field("kind", &self.event_kind)
            .finish_non_exhaustive()
    }
}

/// Delivers notifications to in-process handlers.
pub trait Publisher: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn publish<'a>(
        &'a self,
        notification: &'a Notification,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}

/// Publisher that accepts and drops every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoPublisher;

impl Publisher for NoPublisher {
    type Error = Infallible;

    fn publish<'a>(
        &'a self,
        _notification: &'a Notification,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a {
        std::future::ready(Ok(()))
    }
}

/// One notification that a publisher rejected.
#[derive(Debug)]
pub struct PublishFailure<E> {
    pub source_kind: &'static str,
    pub source_id: String,
    pub event_kind: &'static str,
    pub error: E,
}

/// Some notifications failed to publish after the data was durably written.
#[derive(Debug, Error)]
#[error("{} of {attempted} domain event notifications failed to publish", .failures.len())]
pub struct DispatchFailure<E>
where
    E: std::error::Error + 'static,
{
    pub attempted: usize,
    pub failures: Vec<PublishFailure<E>>,
}

/// Publish every notification concurrently and wait for all of them.
///
/// Returns the number delivered. Failures do not short-circuit: every
/// notification is attempted and all rejections are reported together.
#[tracing::instrument(skip(publisher, notifications), fields(notification_count = notifications.len()))]
pub async fn dispatch<P: Publisher>(
    publisher: &P,
    notifications: Vec<Notification>,
) -> Result<usize, DispatchFailure<P::Error>> {
    if notifications.is_empty() {
        return Ok(0);
    }
    let attempted = notifications.len();
    let results = join_all(notifications.iter().map(|n| publisher.publish(n))).await;

    let failures: Vec<_> = notifications
        .iter()
        .zip(results)
        .filter_map(|(notification, result)| {
            result.err().map(|error| PublishFailure {
                source_kind: notification.source_kind,
                source_id: notification.source_id.clone(),
                event_kind: notification.event_kind,
                error,
            })
        })
        .collect();

    if failures.is_empty() {
        tracing::debug!(attempted, "notifications dispatched");
        Ok(attempted)
    } else {
        for failure in &failures {
            tracing::warn!(
                source_kind = failure.source_kind,
                source_id = %failure.source_id,
                event_kind = failure.event_kind,
                error = %failure.error,
                "notification publish failed"
            );
        }
        Err(DispatchFailure {
            attempted,
            failures,
        })
    }
}
