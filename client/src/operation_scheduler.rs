//! Schedules future operations such that if one is already pending for an
//! operation, another one is not scheduled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use thiserror::Error;

use crate::resources::SystemResources;
use crate::smearer::Smearer;

/// Identity of a schedulable operation.
pub type OperationName = &'static str;

/// Errors that can occur when registering or scheduling operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationSchedulerError {
    /// The operation was already registered.
    #[error("operation `{name}` is already registered")]
    DuplicateOperation { name: OperationName },

    /// The delay given for the operation was not positive.
    #[error("operation `{name}` must have a positive delay")]
    NonPositiveDelay { name: OperationName },

    /// The operation was never registered.
    #[error("operation `{name}` has not been registered")]
    UnknownOperation { name: OperationName },
}

struct OperationInfo {
    delay: Duration,
    pending: Arc<AtomicBool>,
    task: Arc<dyn Fn() + Send + Sync>,
}

/// De-duplicates future invocations of named operations: at most one pending
/// execution of a given operation exists at any time, and repeated schedule
/// calls within the delay window collapse into one.
pub struct OperationScheduler {
    resources: Arc<dyn SystemResources>,
    smearer: Smearer,
    operations: HashMap<OperationName, OperationInfo>,
}

impl OperationScheduler {
    pub fn new(resources: Arc<dyn SystemResources>, smearer: Smearer) -> Self {
        Self {
            resources,
            smearer,
            operations: HashMap::new(),
        }
    }

    /// Registers `task` under `name` with the given nominal delay.
    pub fn set_operation(
        &mut self,
        name: OperationName,
        delay: Duration,
        task: Arc<dyn Fn() + Send + Sync>,
    ) -> Result<(), OperationSchedulerError> {
        if self.operations.contains_key(name) {
            return Err(OperationSchedulerError::DuplicateOperation { name });
        }
        if delay.is_zero() {
            return Err(OperationSchedulerError::NonPositiveDelay { name });
        }
        debug!("set operation `{}` with delay {:?}", name, delay);
        self.operations.insert(
            name,
            OperationInfo {
                delay,
                pending: Arc::new(AtomicBool::new(false)),
                task,
            },
        );
        Ok(())
    }

    /// Arranges for the named operation to run once after a smear of its
    /// nominal delay. If an execution is already pending, does nothing.
    pub fn schedule(&mut self, name: OperationName) -> Result<(), OperationSchedulerError> {
        let info = self
            .operations
            .get(name)
            .ok_or(OperationSchedulerError::UnknownOperation { name })?;

        if info.pending.swap(true, Ordering::SeqCst) {
            // Already pending; this call coalesces with the earlier one.
            return Ok(());
        }

        let delay = self.smearer.smear(info.delay);
        debug!("scheduling `{}` with smeared delay {:?}", name, delay);
        let pending = Arc::clone(&info.pending);
        let task = Arc::clone(&info.task);
        self.resources.schedule_with_delay(
            delay,
            Box::new(move || {
                // Clear the pending flag before running, so the operation may
                // reschedule itself.
                pending.store(false, Ordering::SeqCst);
                task();
            }),
        );
        Ok(())
    }
}
