//! The application-facing callback surface.

use ticl_shared::{Invalidation, ObjectId, RegistrationState, UnknownHint};

use crate::client::AckHandle;

/// The object on which invalidations and lifecycle events are delivered to
/// the application. All callbacks run on the listener executor.
pub trait InvalidationListener: Send + Sync + 'static {
    /// A registered object changed: `invalidation` carries its id and new
    /// version. The application must call `ack.ack()` once it has processed
    /// the event; only then is the invalidation acknowledged to the server.
    ///
    /// If the listener registered for an object and that object subsequently
    /// changes, this is invoked at least once.
    fn invalidate(&self, invalidation: Invalidation, ack: AckHandle);

    /// The application should consider every object to have changed.
    /// Generally sent when the service could not keep the client's update
    /// stream continuous, but it may arrive at any time.
    fn invalidate_all(&self, ack: AckHandle);

    /// The registration state of an object changed. When the new state is
    /// `Unknown`, `hint` qualifies whether the condition is transient.
    fn registration_state_changed(
        &self,
        object_id: ObjectId,
        new_state: RegistrationState,
        hint: UnknownHint,
    );

    /// The client's registrations are gone (the session was lost); the
    /// application should re-register everything it still cares about.
    fn all_registrations_lost(&self);

    /// The client acquired (`true`) or lost (`false`) its session. Purely
    /// informational.
    fn session_status_changed(&self, has_session: bool);
}
