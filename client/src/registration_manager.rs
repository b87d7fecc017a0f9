//! Desired-versus-confirmed registration reconciliation and per-operation
//! sequence-number accounting.

use std::collections::HashMap;

use log::{debug, info, warn};

use ticl_shared::{
    ClientMessageType, ClientToServerMessage, ObjectId, RegistrationOpType, RegistrationState,
    RegistrationUpdate, ServerToClientMessage,
};

/// The lowest sequence number ever assigned to an operation.
pub const FIRST_SEQUENCE_NUMBER: i64 = 1;

/// Per-object registration record.
#[derive(Debug, Clone)]
struct RegistrationRecord {
    /// The state the application wants.
    desired: RegistrationOpType,
    /// The latest state the server has confirmed.
    confirmed: RegistrationState,
    /// Sequence number assigned when `desired` most recently diverged from
    /// `confirmed`. Not refreshed on resend.
    op_seqno: i64,
    /// Whether an outbound operation for this record is awaiting
    /// confirmation.
    pending: bool,
}

/// Tracks desired and confirmed registration state per object and allocates
/// the per-operation sequence numbers that pair requests with server
/// verdicts.
///
/// Sequence numbers come from a single monotonic counter bounded by a durably
/// reserved block; the orchestrator moves the bound after each successful
/// writeback and resets the counter when the client identity changes.
///
/// Not internally synchronized; the orchestrator serializes access.
pub struct RegistrationUpdateManager {
    records: HashMap<ObjectId, RegistrationRecord>,
    /// Next sequence number to assign.
    current_op_seqno: i64,
    maximum_op_seqno_inclusive: i64,
    max_ops_per_message: usize,
}

impl RegistrationUpdateManager {
    pub fn new(initial_seqno: i64, max_ops_per_message: usize) -> Self {
        Self {
            records: HashMap::new(),
            current_op_seqno: initial_seqno,
            maximum_op_seqno_inclusive: 0,
            max_ops_per_message,
        }
    }

    /// Requests that the client be registered for `object_id`.
    pub fn register(&mut self, object_id: ObjectId) {
        self.update_registration(object_id, RegistrationOpType::Register);
    }

    /// Requests that the client be unregistered for `object_id`.
    pub fn unregister(&mut self, object_id: ObjectId) {
        self.update_registration(object_id, RegistrationOpType::Unregister);
    }

    fn update_registration(&mut self, object_id: ObjectId, op_type: RegistrationOpType) {
        let record = self
            .records
            .entry(object_id)
            .or_insert_with(|| RegistrationRecord {
                desired: RegistrationOpType::Unregister,
                confirmed: RegistrationState::Unregistered,
                op_seqno: 0,
                pending: false,
            });

        if confirmed_matches(op_type, record.confirmed) {
            // Already in the desired state; cancel any in-flight flip.
            record.desired = op_type;
            record.pending = false;
            return;
        }
        if record.pending && record.desired == op_type {
            // The same operation is already in flight; resends keep their
            // original sequence number.
            return;
        }
        record.desired = op_type;
        record.op_seqno = self.current_op_seqno;
        self.current_op_seqno += 1;
        record.pending = true;
        debug!(
            "queued {:?} with seqno {}",
            record.desired, record.op_seqno
        );
    }

    /// Handles a newly acquired session: nothing is confirmed anymore, and
    /// every desired registration must be re-asserted against the new
    /// session. Pending unregistrations are dropped, since unregistered is
    /// the default state with a fresh session.
    pub fn handle_new_session(&mut self) {
        let mut next_seqno = self.current_op_seqno;
        for record in self.records.values_mut() {
            record.confirmed = RegistrationState::Unknown;
            match record.desired {
                RegistrationOpType::Register => {
                    if !record.pending {
                        record.pending = true;
                        record.op_seqno = next_seqno;
                        next_seqno += 1;
                    }
                }
                RegistrationOpType::Unregister => {
                    record.pending = false;
                }
            }
        }
        self.current_op_seqno = next_seqno;
    }

    /// Handles a lost session. Registration-wise this is the same as a new
    /// session: confirmations are void and desired registrations resurface.
    /// The orchestrator additionally tells the listener its registrations are
    /// gone.
    pub fn handle_lost_session(&mut self) {
        self.handle_new_session();
    }

    /// Handles the loss of the client id itself: sequence numbers restart
    /// from a fresh block and desired registrations are re-numbered from the
    /// new counter.
    pub fn handle_lost_client_id(&mut self, initial_seqno: i64, maximum_seqno_inclusive: i64) {
        self.current_op_seqno = initial_seqno;
        self.maximum_op_seqno_inclusive = maximum_seqno_inclusive;
        for record in self.records.values_mut() {
            record.pending = false;
        }
        self.handle_new_session();
    }

    /// Returns true iff any record has a pending outbound operation.
    pub fn do_periodic_registration_check(&self) -> bool {
        self.records.values().any(|record| record.pending)
    }

    /// Fills `message` with up to `max_ops_per_message` pending operations,
    /// oldest sequence number first so stragglers eventually progress, and
    /// stamps the object-control type if none is set. Included records stay
    /// pending until confirmed.
    pub fn add_outbound_data(&mut self, message: &mut ClientToServerMessage) -> usize {
        if message.message_type.is_none() {
            message.message_type = Some(ClientMessageType::ObjectControl);
        }

        let mut pending: Vec<(&ObjectId, &RegistrationRecord)> = self
            .records
            .iter()
            .filter(|(_, record)| record.pending)
            .collect();
        pending.sort_by_key(|(_, record)| record.op_seqno);

        let mut added = 0;
        for (object_id, record) in pending.into_iter().take(self.max_ops_per_message) {
            message.register_operations.push(RegistrationUpdate {
                op_type: record.desired,
                object_id: object_id.clone(),
                seqno: record.op_seqno,
            });
            added += 1;
        }
        added
    }

    /// Applies the server's registration verdicts from an object-control
    /// bundle. Returns the confirmations that took effect, for delivery to
    /// the listener. Operations the server did not succeed stay pending and
    /// are retried on a later tick.
    pub fn process_inbound_message(
        &mut self,
        message: &ServerToClientMessage,
    ) -> Vec<(ObjectId, RegistrationState)> {
        let mut confirmations = Vec::new();
        for result in &message.registration_results {
            let operation = &result.operation;
            let Some(record) = self.records.get_mut(&operation.object_id) else {
                warn!("registration result for an object we never asked about");
                continue;
            };
            if !record.pending || record.op_seqno != operation.seqno {
                debug!(
                    "stale registration result: seqno {} vs pending {}",
                    operation.seqno, record.op_seqno
                );
                continue;
            }
            if operation.op_type != record.desired {
                debug!("registration result operation does not match desired state");
                continue;
            }
            if !result.status.is_success() {
                info!(
                    "registration op {} failed ({:?}); will retry",
                    operation.seqno, result.status.code
                );
                continue;
            }
            record.confirmed = state_of(record.desired);
            record.pending = false;
            confirmations.push((operation.object_id.clone(), record.confirmed));
        }
        confirmations
    }

    /// Raises the maximum usable sequence number after a successful block
    /// reservation.
    pub fn update_maximum_seqno(&mut self, new_maximum_seqno_inclusive: i64) {
        assert!(
            new_maximum_seqno_inclusive > self.maximum_op_seqno_inclusive,
            "sequence-number limit must grow: {} -> {}",
            self.maximum_op_seqno_inclusive,
            new_maximum_seqno_inclusive
        );
        self.maximum_op_seqno_inclusive = new_maximum_seqno_inclusive;
    }

    pub fn current_op_seqno(&self) -> i64 {
        self.current_op_seqno
    }

    pub fn maximum_op_seqno_inclusive(&self) -> i64 {
        self.maximum_op_seqno_inclusive
    }

    /// The latest server-confirmed state for `object_id`.
    pub fn registration_state(&self, object_id: &ObjectId) -> RegistrationState {
        self.records
            .get(object_id)
            .map(|record| record.confirmed)
            .unwrap_or(RegistrationState::Unregistered)
    }
}

fn confirmed_matches(desired: RegistrationOpType, confirmed: RegistrationState) -> bool {
    state_of(desired) == confirmed
}

fn state_of(op_type: RegistrationOpType) -> RegistrationState {
    match op_type {
        RegistrationOpType::Register => RegistrationState::Registered,
        RegistrationOpType::Unregister => RegistrationState::Unregistered,
    }
}
