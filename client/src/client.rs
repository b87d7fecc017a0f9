//! The invalidation client orchestrator: ties the session, registration,
//! network, and persistence layers together under one lock and drives them
//! from a periodic tick.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};
use rand::rngs::SmallRng;
use rand::SeedableRng;

use ticl_shared::{
    deserialize_state, serialize_state, ClientMessageType, ClientToServerMessage, ClientType,
    ComponentStamp, Invalidation, ObjectId, ServerToClientMessage, TiclState, UnknownHint,
};

use crate::config::ClientConfig;
use crate::listener::InvalidationListener;
use crate::network_manager::{NetworkManager, NotifyOutcome};
use crate::operation_scheduler::OperationScheduler;
use crate::persistence_manager::PersistenceManager;
use crate::registration_manager::{RegistrationUpdateManager, FIRST_SEQUENCE_NUMBER};
use crate::resources::SystemResources;
use crate::session_manager::{MessageAction, SessionManager};
use crate::smearer::Smearer;

/// Name of the periodic tick in the operation scheduler.
const PERIODIC_TASK_NAME: &str = "ticl-periodic-task";

/// Purpose tags for queued state writes; completions dispatch on them.
#[derive(Debug, Clone, Copy)]
enum WriteTag {
    /// Reserving the next sequence-number block after a restart. Failure is
    /// fatal to the current client id: continuing would risk sequence-number
    /// reuse.
    SeqnoWriteback { new_limit: i64 },
    /// Recording a freshly acquired session. Failure only leaves the client
    /// non-persistent for this run.
    BestEffort,
}

/// Handle the application invokes to acknowledge one delivered invalidation.
///
/// Consuming `ack` guarantees each delivery is acknowledged at most once; an
/// unacknowledged invalidation is simply redelivered by the service later.
pub struct AckHandle {
    core: Weak<ClientCore>,
    invalidation: Invalidation,
}

impl AckHandle {
    /// Acknowledges the invalidation. Safe to call from any thread; the
    /// bookkeeping happens on the client's internal executor.
    pub fn ack(self) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let weak = self.core;
        let invalidation = self.invalidation;
        core.resources.schedule_immediately(Box::new(move || {
            if let Some(core) = weak.upgrade() {
                core.acknowledge_invalidation(invalidation);
            }
        }));
    }
}

/// The invalidation client (the "Ticl"): maintains a logical session with the
/// invalidation service, tracks registrations, and delivers invalidations to
/// the listener, exchanging opaque byte-strings with the service through the
/// application's transport.
pub struct InvalidationClient {
    core: Arc<ClientCore>,
}

struct ClientCore {
    resources: Arc<dyn SystemResources>,
    listener: Arc<dyn InvalidationListener>,
    config: ClientConfig,
    inner: Mutex<ClientInner>,
}

/// All mutable client state, guarded by the single lock.
struct ClientInner {
    session: SessionManager,
    registrations: RegistrationUpdateManager,
    network: NetworkManager,
    persistence: PersistenceManager<WriteTag>,
    operations: OperationScheduler,
    /// Invalidations the listener has acknowledged, waiting to ride on an
    /// outbound message. Drained newest-first: a newer invalidation subsumes
    /// an older one for the same object. With a small `max_ops_per_message`
    /// and a steady arrival rate the oldest entries can starve; that matches
    /// the protocol's historical behavior and is left as-is deliberately.
    pending_invalidation_acks: Vec<Invalidation>,
    /// While true, the restart writeback reserving a fresh sequence-number
    /// block has not returned: no inbound message is processed and no
    /// outbound data is offered.
    awaiting_seqno_writeback: bool,
}

impl InvalidationClient {
    /// Creates a client for `client_type`/`app_client_id` that delivers
    /// invalidations to `listener`. `serialized_state` is the blob from a
    /// previous run, or empty for a fresh start.
    pub fn create(
        resources: Arc<dyn SystemResources>,
        client_type: ClientType,
        app_client_id: impl Into<Vec<u8>>,
        serialized_state: &[u8],
        config: ClientConfig,
        listener: Arc<dyn InvalidationListener>,
    ) -> Self {
        let persisted = if serialized_state.is_empty() {
            None
        } else {
            match deserialize_state(serialized_state) {
                Ok(state) => Some(state),
                Err(err) => {
                    error!("got persisted state but failed to deserialize it: {err}");
                    None
                }
            }
        };

        let (uniquifier, session_token, initial_seqno) = match &persisted {
            Some(state) => (
                state.uniquifier.clone(),
                state.session_token.clone(),
                state.sequence_number_limit,
            ),
            None => (Vec::new(), Vec::new(), FIRST_SEQUENCE_NUMBER),
        };

        let session = SessionManager::new(
            client_type,
            app_client_id.into(),
            config.registration_timeout,
            uniquifier,
            session_token,
        );
        let registrations =
            RegistrationUpdateManager::new(initial_seqno, config.max_ops_per_message);
        let network = NetworkManager::new(
            &config,
            client_type,
            Smearer::from_rng(SmallRng::from_entropy(), config.smear_factor),
        );
        let operations = OperationScheduler::new(
            Arc::clone(&resources),
            Smearer::from_rng(SmallRng::from_entropy(), config.smear_factor),
        );

        let core = Arc::new(ClientCore {
            resources,
            listener,
            config,
            inner: Mutex::new(ClientInner {
                session,
                registrations,
                network,
                persistence: PersistenceManager::new(),
                operations,
                pending_invalidation_acks: Vec::new(),
                awaiting_seqno_writeback: false,
            }),
        });

        {
            let mut inner = core.lock_inner();
            let weak = Arc::downgrade(&core);
            inner
                .operations
                .set_operation(
                    PERIODIC_TASK_NAME,
                    core.config.periodic_task_interval,
                    Arc::new(move || {
                        if let Some(core) = weak.upgrade() {
                            core.periodic_task();
                        }
                    }),
                )
                .expect("the periodic task is registered exactly once");

            match persisted {
                Some(state) => {
                    // Restarting with a persisted identity: the session
                    // already exists, but before sending anything we must
                    // durably reserve a fresh block of sequence numbers.
                    info!("restarting from persisted state");
                    inner.registrations.handle_new_session();
                    core.notify_session_status(true);
                    core.allocate_new_sequence_numbers(&mut inner, &state);
                }
                None => {
                    // Starting fresh: the initial block needs no writeback;
                    // state is first written once a session is acquired.
                    info!("starting fresh");
                    inner
                        .registrations
                        .update_maximum_seqno(core.config.seqno_block_size);
                }
            }
        }

        let weak = Arc::downgrade(&core);
        core.resources.schedule_immediately(Box::new(move || {
            if let Some(core) = weak.upgrade() {
                core.periodic_task();
            }
        }));

        Self { core }
    }

    /// Registers to receive invalidations for `object_id`.
    pub fn register(&self, object_id: ObjectId) {
        self.core.assert_external_thread();
        let mut inner = self.core.lock_inner();
        info!("received register for {:?}", object_id);
        inner.registrations.register(object_id);
    }

    /// Unregisters from invalidations for `object_id`.
    pub fn unregister(&self, object_id: ObjectId) {
        self.core.assert_external_thread();
        let mut inner = self.core.lock_inner();
        info!("received unregister for {:?}", object_id);
        inner.registrations.unregister(object_id);
    }

    /// Permanently shuts the client down. The next outbound message is a
    /// shutdown notice; after that the client produces no further session
    /// traffic.
    pub fn permanent_shutdown(&self) {
        self.core.assert_external_thread();
        let mut inner = self.core.lock_inner();
        info!("doing permanent shutdown by application request");
        inner.session.shutdown();
    }

    /// Installs `callback` to be invoked (on the listener executor) whenever
    /// an outbound message becomes ready to take.
    pub fn register_outbound_listener(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.core.assert_external_thread();
        let mut inner = self.core.lock_inner();
        let now = self.core.resources.current_time();
        let outcome = inner
            .network
            .register_outbound_listener(Arc::new(callback), now);
        self.core.handle_notify_outcome(outcome);
    }

    /// Hands the client a message received from the service.
    pub fn handle_inbound_message(&self, bytes: &[u8]) {
        self.core.assert_external_thread();
        let mut inner = self.core.lock_inner();

        if inner.awaiting_seqno_writeback {
            // State changes from the server while the reservation write is
            // out would be unrecoverable; drop and let the server retry.
            info!("dropping inbound message while the sequence-number writeback is in flight");
            return;
        }

        let bundle = match ServerToClientMessage::decode(bytes) {
            Ok(bundle) => bundle,
            Err(err) => {
                warn!("dropping malformed inbound message: {err}");
                return;
            }
        };

        let action = inner.session.process_message(&bundle);
        debug!("classified inbound message as {:?}", action);
        match action {
            MessageAction::IgnoreMessage => return,
            MessageAction::AcquireSession => self.core.handle_new_session(&mut inner),
            MessageAction::LoseClientId => self.core.forget_client_id(&mut inner),
            MessageAction::LoseSession => self.core.handle_lost_session(&mut inner),
            MessageAction::ProcessObjectControl => {
                self.core.handle_object_control(&mut inner, &bundle)
            }
        }

        // Every case that reaches here verified the message was addressed to
        // this client, so fresh cadence hints can be adopted.
        let now = self.core.resources.current_time();
        inner.network.handle_inbound_message(&bundle, now);
    }

    /// Builds, takes, and returns the pending outbound message. Returns an
    /// empty vector when nothing may be sent (only while the restart
    /// writeback is in flight).
    pub fn take_outbound_message(&self) -> Vec<u8> {
        self.core.assert_external_thread();
        let mut inner = self.core.lock_inner();

        if inner.awaiting_seqno_writeback {
            warn!("no outbound message while the sequence-number writeback is in flight");
            return Vec::new();
        }

        let now = self.core.resources.current_time();
        let mut message = ClientToServerMessage::new();

        // Session action first; a shutdown or session request claims the
        // whole message.
        inner.session.add_session_action(&mut message, now);

        if message.message_type.is_none() {
            inner.registrations.add_outbound_data(&mut message);
        } else {
            debug!(
                "message already has type {:?}; not offering it to the registration layer",
                message.message_type
            );
        }

        if message.message_type == Some(ClientMessageType::ObjectControl) {
            inner.network.add_heartbeat(&mut message, now);

            // Fill what is left of the operation budget with acknowledgments,
            // newest first.
            let budget = self
                .core
                .config
                .max_ops_per_message
                .saturating_sub(message.register_operations.len());
            for _ in 0..budget {
                let Some(mut invalidation) = inner.pending_invalidation_acks.pop() else {
                    break;
                };
                if let Some(log) = invalidation.component_stamp_log.as_mut() {
                    log.stamps.push(ComponentStamp {
                        component: "C".to_string(),
                        time_ms: epoch_millis(now),
                    });
                }
                message.acked_invalidations.push(invalidation);
            }
        }

        inner.network.finalize_outbound_message(&mut message, now);
        assert!(message.message_type.is_some(), "outbound message must have a type");
        assert!(message.client_type.is_some(), "outbound message must have a client type");
        message.encode()
    }

    /// The server-assigned client id, or empty if none is held.
    pub fn client_uniquifier(&self) -> Vec<u8> {
        self.core.assert_external_thread();
        let inner = self.core.lock_inner();
        inner.session.client_uniquifier().to_vec()
    }
}

impl ClientCore {
    fn lock_inner(&self) -> MutexGuard<'_, ClientInner> {
        self.inner.lock().expect("ticl internal lock poisoned")
    }

    fn assert_external_thread(&self) {
        assert!(
            !self.resources.is_running_on_internal_thread(),
            "application entry points must not be called from the internal thread"
        );
    }

    /// Queues the writeback that reserves the next block of sequence numbers
    /// above a persisted limit. Until it completes, the client stays silent.
    fn allocate_new_sequence_numbers(&self, inner: &mut ClientInner, persisted: &TiclState) {
        let new_limit = persisted.sequence_number_limit + self.config.seqno_block_size;
        let new_state = TiclState {
            uniquifier: persisted.uniquifier.clone(),
            session_token: persisted.session_token.clone(),
            sequence_number_limit: new_limit,
        };
        inner.awaiting_seqno_writeback = true;
        inner.persistence.queue_write(
            serialize_state(&new_state),
            WriteTag::SeqnoWriteback { new_limit },
        );
    }

    /// The periodic tick: drains persistence, enforces the sequence-number
    /// bound, and decides whether to offer outbound data. Always reschedules
    /// itself.
    fn periodic_task(self: &Arc<Self>) {
        let mut inner = self.lock_inner();
        self.run_periodic_checks(&mut inner);
        inner
            .operations
            .schedule(PERIODIC_TASK_NAME)
            .expect("the periodic task is registered");
    }

    fn run_periodic_checks(self: &Arc<Self>, inner: &mut ClientInner) {
        if let Some((payload, tag)) = inner.persistence.next_write() {
            debug!("issuing queued state write");
            let weak = Arc::downgrade(self);
            self.resources.write_state(
                payload,
                Box::new(move |success| {
                    if let Some(core) = weak.upgrade() {
                        core.handle_write_result(tag, success);
                    }
                }),
            );
        }

        if inner.awaiting_seqno_writeback {
            debug!("skipping periodic checks while awaiting the local write");
            return;
        }

        if inner.registrations.current_op_seqno() > inner.registrations.maximum_op_seqno_inclusive()
        {
            info!("exhausted sequence numbers; forgetting client id");
            self.forget_client_id(inner);
        }

        let now = self.resources.current_time();
        let have_session_data = inner.session.has_data_to_send(now);
        let have_registration_data = inner.registrations.do_periodic_registration_check();
        let should_heartbeat_or_poll = inner.network.has_data_to_send(now);

        if !have_session_data && !inner.session.has_session() {
            debug!("not sending: no session and no session request permitted");
        } else if have_session_data || have_registration_data || should_heartbeat_or_poll {
            self.signal_outbound_ready(inner);
        }
    }

    fn handle_write_result(self: &Arc<Self>, tag: WriteTag, success: bool) {
        let mut inner = self.lock_inner();
        inner.persistence.write_completed();
        match tag {
            WriteTag::SeqnoWriteback { new_limit } => {
                info!("sequence-number writeback returned {}", success);
                inner.awaiting_seqno_writeback = false;
                if success {
                    inner.registrations.update_maximum_seqno(new_limit - 1);
                } else {
                    // Without the reservation we might reuse sequence numbers
                    // on the next restart; the only safe recovery is a new
                    // client id, for which no prior operations can exist.
                    self.forget_client_id(&mut inner);
                }
            }
            WriteTag::BestEffort => {
                info!("best-effort state write completed with result {}", success);
            }
        }
    }

    fn handle_new_session(self: &Arc<Self>, inner: &mut ClientInner) {
        info!("received new session");
        inner.registrations.handle_new_session();
        let now = self.resources.current_time();
        inner.network.record_implicit_heartbeat(now);

        let state = TiclState {
            uniquifier: inner.session.client_uniquifier().to_vec(),
            session_token: inner.session.session_token().to_vec(),
            sequence_number_limit: inner.registrations.maximum_op_seqno_inclusive() + 1,
        };
        inner
            .persistence
            .queue_write(serialize_state(&state), WriteTag::BestEffort);

        self.notify_session_status(true);
    }

    fn handle_lost_session(self: &Arc<Self>, inner: &mut ClientInner) {
        info!("session lost");
        inner.registrations.handle_lost_session();
        self.notify_all_registrations_lost();
        self.notify_session_status(false);
    }

    /// Drops the client id, the session, and the persisted identity's claim
    /// on its sequence numbers. The next successful session rewrites the
    /// state blob from scratch.
    fn forget_client_id(self: &Arc<Self>, inner: &mut ClientInner) {
        let had_session = inner.session.has_session();
        inner.session.forget_client_id();
        inner.registrations.handle_lost_client_id(
            FIRST_SEQUENCE_NUMBER,
            self.config.seqno_block_size,
        );
        if had_session {
            self.notify_all_registrations_lost();
            self.notify_session_status(false);
        }
    }

    fn handle_object_control(self: &Arc<Self>, inner: &mut ClientInner, bundle: &ServerToClientMessage) {
        let confirmations = inner.registrations.process_inbound_message(bundle);
        for (object_id, new_state) in confirmations {
            let listener = Arc::clone(&self.listener);
            self.resources.schedule_on_listener_thread(Box::new(move || {
                listener.registration_state_changed(object_id, new_state, UnknownHint::default());
            }));
        }

        for invalidation in &bundle.invalidations {
            self.process_invalidation(invalidation.clone());
        }
    }

    fn process_invalidation(self: &Arc<Self>, invalidation: Invalidation) {
        let ack = AckHandle {
            core: Arc::downgrade(self),
            invalidation: invalidation.clone(),
        };
        let listener = Arc::clone(&self.listener);
        if invalidation.object_id.is_invalidate_all() {
            self.resources.schedule_on_listener_thread(Box::new(move || {
                listener.invalidate_all(ack);
            }));
        } else {
            self.resources.schedule_on_listener_thread(Box::new(move || {
                listener.invalidate(invalidation, ack);
            }));
        }
    }

    /// Runs on the internal executor when the application acknowledges an
    /// invalidation.
    fn acknowledge_invalidation(self: &Arc<Self>, invalidation: Invalidation) {
        let mut inner = self.lock_inner();
        inner.pending_invalidation_acks.push(invalidation);
        self.signal_outbound_ready(&mut inner);
    }

    fn signal_outbound_ready(self: &Arc<Self>, inner: &mut ClientInner) {
        let now = self.resources.current_time();
        let outcome = inner.network.outbound_data_ready(now);
        self.handle_notify_outcome(outcome);
    }

    fn handle_notify_outcome(self: &Arc<Self>, outcome: NotifyOutcome) {
        match outcome {
            NotifyOutcome::Idle => {}
            NotifyOutcome::Notify(listener) => {
                self.resources
                    .schedule_on_listener_thread(Box::new(move || listener()));
            }
            NotifyOutcome::RetryAfter(delay) => {
                let weak = Arc::downgrade(self);
                self.resources.schedule_with_delay(
                    delay,
                    Box::new(move || {
                        if let Some(core) = weak.upgrade() {
                            let mut inner = core.lock_inner();
                            let now = core.resources.current_time();
                            let outcome = inner.network.retry_fire(now);
                            drop(inner);
                            core.handle_notify_outcome(outcome);
                        }
                    }),
                );
            }
        }
    }

    fn notify_session_status(self: &Arc<Self>, has_session: bool) {
        let listener = Arc::clone(&self.listener);
        self.resources.schedule_on_listener_thread(Box::new(move || {
            listener.session_status_changed(has_session);
        }));
    }

    fn notify_all_registrations_lost(self: &Arc<Self>) {
        let listener = Arc::clone(&self.listener);
        self.resources.schedule_on_listener_thread(Box::new(move || {
            listener.all_registrations_lost();
        }));
    }
}

fn epoch_millis(now: SystemTime) -> i64 {
    now.duration_since(UNIX_EPOCH)
        .map(|since| since.as_millis() as i64)
        .unwrap_or(0)
}
