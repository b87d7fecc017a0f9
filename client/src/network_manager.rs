//! Outbound-message cadence: heartbeats, polling, rate limiting, and final
//! message stamping.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info};

use ticl_shared::{
    ClientAction, ClientMessageType, ClientToServerMessage, ClientType, ServerToClientMessage,
    CLIENT_VERSION, PROTOCOL_VERSION,
};

use crate::config::ClientConfig;
use crate::smearer::Smearer;
use crate::throttle::{FireOutcome, Throttle};

/// Callback installed by the application to be told when an outbound message
/// is ready to be taken.
pub type OutboundListener = Arc<dyn Fn() + Send + Sync>;

/// What the orchestrator must do after the network manager decided about an
/// outbound notification.
#[derive(Clone)]
pub enum NotifyOutcome {
    /// Nothing to do right now.
    Idle,
    /// Dispatch this listener on the listener executor.
    Notify(OutboundListener),
    /// Schedule a throttle retry after this delay.
    RetryAfter(Duration),
}

/// Keeps track of whether there is outbound data to send and informs the
/// application at a rate-limited cadence. Owns the heartbeat and polling
/// deadlines, both server-tunable.
///
/// The manager holds no reference to the orchestrator; it only stores the
/// listener callback the application installed and reports scheduling
/// obligations back to its caller.
///
/// Not internally synchronized; the orchestrator serializes access.
pub struct NetworkManager {
    /// Whether we hold useful data for the server.
    has_outbound_data: bool,
    outbound_listener: Option<OutboundListener>,
    next_poll: SystemTime,
    next_heartbeat: SystemTime,
    poll_delay: Duration,
    heartbeat_delay: Duration,
    message_number: u64,
    client_type: ClientType,
    throttle: Throttle,
    smearer: Smearer,
}

impl NetworkManager {
    pub fn new(config: &ClientConfig, client_type: ClientType, smearer: Smearer) -> Self {
        Self {
            has_outbound_data: false,
            outbound_listener: None,
            // Both deadlines start in the far past, so the first
            // object-control message carries a heartbeat.
            next_poll: UNIX_EPOCH,
            next_heartbeat: UNIX_EPOCH,
            poll_delay: config.initial_polling_interval,
            heartbeat_delay: config.initial_heartbeat_interval,
            message_number: 0,
            client_type,
            throttle: Throttle::new(config.rate_limits.clone()),
            smearer,
        }
    }

    /// Installs the outbound listener. If data is already waiting, the caller
    /// gets an immediate obligation to notify it.
    pub fn register_outbound_listener(
        &mut self,
        listener: OutboundListener,
        now: SystemTime,
    ) -> NotifyOutcome {
        self.outbound_listener = Some(listener);
        if self.has_outbound_data {
            self.inform_outbound_listener(now)
        } else {
            NotifyOutcome::Idle
        }
    }

    /// Records that the client has data ready for the server and, if the
    /// listener has not been told since it last drained a message, arranges
    /// to tell it.
    pub fn outbound_data_ready(&mut self, now: SystemTime) -> NotifyOutcome {
        if self.has_outbound_data {
            return NotifyOutcome::Idle;
        }
        self.has_outbound_data = true;
        if self.outbound_listener.is_some() {
            self.inform_outbound_listener(now)
        } else {
            NotifyOutcome::Idle
        }
    }

    /// Called when a previously deferred notification comes due.
    pub fn retry_fire(&mut self, now: SystemTime) -> NotifyOutcome {
        self.throttle.retry_ready();
        // The deferral may have outlived the data: the application could have
        // drained a message of its own accord in the meantime.
        if self.has_outbound_data && self.outbound_listener.is_some() {
            self.inform_outbound_listener(now)
        } else {
            NotifyOutcome::Idle
        }
    }

    fn inform_outbound_listener(&mut self, now: SystemTime) -> NotifyOutcome {
        match self.throttle.fire(now) {
            FireOutcome::Allowed => match self.outbound_listener.clone() {
                Some(listener) => {
                    debug!("notifying outbound listener");
                    NotifyOutcome::Notify(listener)
                }
                None => NotifyOutcome::Idle,
            },
            FireOutcome::Deferred(delay) => NotifyOutcome::RetryAfter(delay),
            FireOutcome::Suppressed => NotifyOutcome::Idle,
        }
    }

    /// Whether a heartbeat or an invalidation poll has come due.
    pub fn has_data_to_send(&self, now: SystemTime) -> bool {
        now >= self.next_heartbeat || now >= self.next_poll
    }

    /// Attaches a heartbeat or poll action to an object-control message if
    /// one is due. A poll subsumes a heartbeat.
    pub fn add_heartbeat(&mut self, message: &mut ClientToServerMessage, now: SystemTime) {
        debug_assert_eq!(message.message_type, Some(ClientMessageType::ObjectControl));
        if now >= self.next_poll {
            message.action = Some(ClientAction::PollInvalidations);
            self.next_poll = now + self.smearer.smear(self.poll_delay);
            self.next_heartbeat = now + self.smearer.smear(self.heartbeat_delay);
        } else if now >= self.next_heartbeat {
            message.action = Some(ClientAction::Heartbeat);
            self.next_heartbeat = now + self.smearer.smear(self.heartbeat_delay);
        }
    }

    /// Resets the heartbeat deadline after a message went out for some other
    /// reason; any traffic proves liveness.
    pub fn record_implicit_heartbeat(&mut self, now: SystemTime) {
        self.next_heartbeat = now + self.smearer.smear(self.heartbeat_delay);
    }

    /// Adopts fresh heartbeat and polling intervals from a server message.
    pub fn handle_inbound_message(&mut self, bundle: &ServerToClientMessage, now: SystemTime) {
        if let Some(interval_ms) = bundle.next_heartbeat_interval_ms {
            if interval_ms > 0 {
                let interval = Duration::from_millis(interval_ms as u64);
                if interval != self.heartbeat_delay {
                    info!("accepting new heartbeat interval of {} ms", interval_ms);
                    self.heartbeat_delay = interval;
                    self.next_heartbeat = now + self.smearer.smear(interval);
                }
            } else {
                info!("ignoring bad heartbeat interval of {} ms", interval_ms);
            }
        }
        if let Some(interval_ms) = bundle.next_poll_interval_ms {
            if interval_ms > 0 {
                let interval = Duration::from_millis(interval_ms as u64);
                if interval != self.poll_delay {
                    info!("accepting new polling interval of {} ms", interval_ms);
                    self.poll_delay = interval;
                    self.next_poll = now + self.smearer.smear(interval);
                }
            } else {
                info!("ignoring bad polling interval of {} ms", interval_ms);
            }
        }
    }

    /// Stamps the message id, client type, protocol and client versions, and
    /// timestamp, and marks the outbound slot drained.
    pub fn finalize_outbound_message(
        &mut self,
        message: &mut ClientToServerMessage,
        now: SystemTime,
    ) {
        self.message_number += 1;
        message.message_id = Some(self.message_number.to_string());
        message.client_type = Some(self.client_type);
        message.protocol_version = Some(PROTOCOL_VERSION);
        message.client_version = Some(CLIENT_VERSION);
        message.timestamp_ms = Some(epoch_millis(now));
        self.has_outbound_data = false;
    }
}

fn epoch_millis(now: SystemTime) -> i64 {
    now.duration_since(UNIX_EPOCH)
        .map(|since| since.as_millis() as i64)
        .unwrap_or(0)
}
