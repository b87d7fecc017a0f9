//! Deterministic test doubles: a simulated clock with run-to-idle executors,
//! and a listener that records everything it is told.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ticl_client::{
    AckHandle, InvalidationListener, Invalidation, ObjectId, RegistrationState, StorageCallback,
    SystemResources, Task, UnknownHint,
};

/// System resources backed by a simulated clock. Internal tasks run when the
/// test pumps them; nothing runs behind the test's back.
pub struct FakeResources {
    state: Mutex<ResourcesState>,
}

struct ResourcesState {
    now: SystemTime,
    internal_tasks: VecDeque<Task>,
    delayed_tasks: Vec<DelayedTask>,
    listener_tasks: VecDeque<Task>,
    /// `Some(result)` completes writes immediately with that result;
    /// `None` holds them for `complete_next_write`.
    write_result: Option<bool>,
    held_writes: VecDeque<(Vec<u8>, StorageCallback)>,
    /// Every payload handed to the storage layer, with the reported result.
    written: Vec<(Vec<u8>, bool)>,
    running_internal: bool,
    next_seq: u64,
}

struct DelayedTask {
    due: SystemTime,
    seq: u64,
    task: Task,
}

impl FakeResources {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ResourcesState {
                now: UNIX_EPOCH + Duration::from_secs(1_000_000),
                internal_tasks: VecDeque::new(),
                delayed_tasks: Vec::new(),
                listener_tasks: VecDeque::new(),
                write_result: Some(true),
                held_writes: VecDeque::new(),
                written: Vec::new(),
                running_internal: false,
                next_seq: 0,
            }),
        })
    }

    /// Makes future writes complete immediately with `result`.
    pub fn set_write_result(&self, result: bool) {
        self.state.lock().unwrap().write_result = Some(result);
    }

    /// Makes future writes wait for `complete_next_write`.
    pub fn hold_writes(&self) {
        self.state.lock().unwrap().write_result = None;
    }

    /// Completes the oldest held write with `result`.
    pub fn complete_next_write(self: &Arc<Self>, result: bool) {
        let callback = {
            let mut state = self.state.lock().unwrap();
            let (payload, callback) = state
                .held_writes
                .pop_front()
                .expect("a held write to complete");
            state.written.push((payload, result));
            callback
        };
        self.schedule_immediately(Box::new(move || callback(result)));
        self.run_until_idle();
    }

    pub fn held_write_count(&self) -> usize {
        self.state.lock().unwrap().held_writes.len()
    }

    /// Payloads written so far, with the result each one reported.
    pub fn written_states(&self) -> Vec<(Vec<u8>, bool)> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn now(&self) -> SystemTime {
        self.state.lock().unwrap().now
    }

    /// Runs internal tasks until none are runnable at the current time.
    pub fn run_until_idle(self: &Arc<Self>) {
        loop {
            self.promote_due_tasks();
            let task = {
                let mut state = self.state.lock().unwrap();
                match state.internal_tasks.pop_front() {
                    Some(task) => {
                        state.running_internal = true;
                        task
                    }
                    None => break,
                }
            };
            task();
            self.state.lock().unwrap().running_internal = false;
        }
    }

    /// Moves the clock forward, running whatever becomes due along the way.
    pub fn advance(self: &Arc<Self>, duration: Duration) {
        {
            let mut state = self.state.lock().unwrap();
            state.now += duration;
        }
        self.run_until_idle();
    }

    /// Runs listener-executor tasks (which may enqueue more internal work).
    pub fn run_listener_tasks(self: &Arc<Self>) {
        loop {
            let task = {
                let mut state = self.state.lock().unwrap();
                match state.listener_tasks.pop_front() {
                    Some(task) => task,
                    None => break,
                }
            };
            task();
        }
    }

    /// Pumps both executors until the whole system settles.
    pub fn run_all(self: &Arc<Self>) {
        loop {
            self.run_until_idle();
            let idle = self.state.lock().unwrap().listener_tasks.is_empty();
            if idle {
                break;
            }
            self.run_listener_tasks();
        }
    }

    fn promote_due_tasks(&self) {
        let mut state = self.state.lock().unwrap();
        let now = state.now;
        let mut due: Vec<DelayedTask> = Vec::new();
        let mut index = 0;
        while index < state.delayed_tasks.len() {
            if state.delayed_tasks[index].due <= now {
                due.push(state.delayed_tasks.remove(index));
            } else {
                index += 1;
            }
        }
        due.sort_by_key(|delayed| (delayed.due, delayed.seq));
        for delayed in due {
            state.internal_tasks.push_back(delayed.task);
        }
    }
}

impl SystemResources for FakeResources {
    fn current_time(&self) -> SystemTime {
        self.state.lock().unwrap().now
    }

    fn schedule_with_delay(&self, delay: Duration, task: Task) {
        let mut state = self.state.lock().unwrap();
        let due = state.now + delay;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.delayed_tasks.push(DelayedTask { due, seq, task });
    }

    fn schedule_immediately(&self, task: Task) {
        self.state.lock().unwrap().internal_tasks.push_back(task);
    }

    fn schedule_on_listener_thread(&self, task: Task) {
        self.state.lock().unwrap().listener_tasks.push_back(task);
    }

    fn is_running_on_internal_thread(&self) -> bool {
        self.state.lock().unwrap().running_internal
    }

    fn write_state(&self, state_bytes: Vec<u8>, callback: StorageCallback) {
        let mut state = self.state.lock().unwrap();
        match state.write_result {
            Some(result) => {
                state.written.push((state_bytes, result));
                state
                    .internal_tasks
                    .push_back(Box::new(move || callback(result)));
            }
            None => {
                state.held_writes.push_back((state_bytes, callback));
            }
        }
    }
}

/// Everything a listener can observe, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent {
    Invalidate(Invalidation),
    InvalidateAll,
    RegistrationStateChanged(ObjectId, RegistrationState, UnknownHint),
    AllRegistrationsLost,
    SessionStatusChanged(bool),
}

/// Records events and (by default) acknowledges every invalidation as soon
/// as it is delivered.
pub struct RecordingListener {
    events: Mutex<Vec<ListenerEvent>>,
    auto_ack: bool,
    held_acks: Mutex<Vec<AckHandle>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            auto_ack: true,
            held_acks: Mutex::new(Vec::new()),
        })
    }

    /// A listener that holds acknowledgment handles for the test to release.
    pub fn holding_acks() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            auto_ack: false,
            held_acks: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn session_status_changes(&self) -> Vec<bool> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ListenerEvent::SessionStatusChanged(has_session) => Some(has_session),
                _ => None,
            })
            .collect()
    }

    pub fn take_held_acks(&self) -> Vec<AckHandle> {
        std::mem::take(&mut self.held_acks.lock().unwrap())
    }

    fn record(&self, event: ListenerEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn handle_ack(&self, ack: AckHandle) {
        if self.auto_ack {
            ack.ack();
        } else {
            self.held_acks.lock().unwrap().push(ack);
        }
    }
}

impl InvalidationListener for RecordingListener {
    fn invalidate(&self, invalidation: Invalidation, ack: AckHandle) {
        self.record(ListenerEvent::Invalidate(invalidation));
        self.handle_ack(ack);
    }

    fn invalidate_all(&self, ack: AckHandle) {
        self.record(ListenerEvent::InvalidateAll);
        self.handle_ack(ack);
    }

    fn registration_state_changed(
        &self,
        object_id: ObjectId,
        new_state: RegistrationState,
        hint: UnknownHint,
    ) {
        self.record(ListenerEvent::RegistrationStateChanged(
            object_id, new_state, hint,
        ));
    }

    fn all_registrations_lost(&self) {
        self.record(ListenerEvent::AllRegistrationsLost);
    }

    fn session_status_changed(&self, has_session: bool) {
        self.record(ListenerEvent::SessionStatusChanged(has_session));
    }
}
