use std::time::Duration;

/// A rate limit of `count` events over a sliding window of `window_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimit {
    pub window_size: Duration,
    pub count: usize,
}

impl RateLimit {
    pub fn new(window_size: Duration, count: usize) -> Self {
        Self { window_size, count }
    }
}

/// Configuration parameters for the invalidation client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base cadence of the periodic tick driving all internal checks.
    pub periodic_task_interval: Duration,

    /// Fraction in `[0, 1]` by which periodic delays are randomly smeared to
    /// keep clients from synchronizing in aggregate.
    pub smear_factor: f64,

    /// How many per-operation sequence numbers are reserved per durable
    /// writeback.
    pub seqno_block_size: i64,

    /// Upper bound on registration plus acknowledgment entries per outbound
    /// message.
    pub max_ops_per_message: usize,

    /// Minimum interval between consecutive session requests.
    pub registration_timeout: Duration,

    /// Interval between heartbeat messages until the server specifies a
    /// different one.
    pub initial_heartbeat_interval: Duration,

    /// Interval between invalidation polls until the server specifies a
    /// different one.
    pub initial_polling_interval: Duration,

    /// Rate limits enforced on outbound-message notifications.
    pub rate_limits: Vec<RateLimit>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            periodic_task_interval: Duration::from_millis(500),
            smear_factor: 0.2,
            seqno_block_size: 1_000,
            max_ops_per_message: 10,
            registration_timeout: Duration::from_secs(60),
            initial_heartbeat_interval: Duration::from_secs(20 * 60),
            initial_polling_interval: Duration::from_secs(60 * 60),
            rate_limits: Self::default_rate_limits(),
        }
    }
}

impl ClientConfig {
    /// The protocol-defined defaults: one message per second, six per minute.
    pub fn default_rate_limits() -> Vec<RateLimit> {
        vec![
            RateLimit::new(Duration::from_secs(1), 1),
            RateLimit::new(Duration::from_secs(60), 6),
        ]
    }
}
