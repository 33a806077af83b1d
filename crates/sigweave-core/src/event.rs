use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::error::EventError;

/// Typed content of an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Empty,
    Floats(Vec<f32>),
    Text(String),
    Bytes(Bytes),
}

/// A discrete, timestamped occurrence emitted by a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Name of the emitting component.
    pub sender: String,
    /// Pipeline-relative start time in microseconds.
    pub time_us: i64,
    pub duration_us: i64,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(sender: impl Into<String>, time_us: i64, duration_us: i64, payload: EventPayload) -> Self {
        Self {
            sender: sender.into(),
            time_us,
            duration_us,
            payload,
        }
    }
}

/// Handle identifying one listener of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

impl ListenerId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// One event handed to a listener.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub event: Arc<Event>,
    /// Events this listener missed because they left the history first.
    pub missed: u64,
}

#[derive(Debug)]
struct ChannelState {
    history: VecDeque<Arc<Event>>,
    /// Sequence number of `history[0]`.
    first_seq: u64,
    last_time_us: Option<i64>,
    /// Next sequence number each listener will receive.
    listeners: Vec<u64>,
    sealed: bool,
    closed: bool,
}

impl ChannelState {
    fn next_seq(&self) -> u64 {
        self.first_seq + self.history.len() as u64
    }
}

/// Bounded, timestamp-ordered event queue with one producer and N listeners.
#[derive(Debug)]
pub struct EventChannel {
    name: String,
    capacity: usize,
    state: Mutex<ChannelState>,
    signal: Condvar,
}

impl EventChannel {
    /// Create a channel retaining at most `capacity` events (at least one).
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            capacity,
            state: Mutex::new(ChannelState {
                history: VecDeque::with_capacity(capacity),
                first_seq: 0,
                last_time_us: None,
                listeners: Vec::new(),
                sealed: false,
                closed: false,
            }),
            signal: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a listener. Fails once the channel is sealed.
    pub fn attach(&self) -> Result<ListenerId, EventError> {
        let mut state = self.state.lock();
        if state.sealed {
            return Err(EventError::Sealed);
        }
        let next = state.next_seq();
        state.listeners.push(next);
        Ok(ListenerId(state.listeners.len() - 1))
    }

    /// Stop accepting listeners.
    pub fn seal(&self) {
        self.state.lock().sealed = true;
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// Events pushed since creation.
    pub fn pushed(&self) -> u64 {
        self.state.lock().next_seq()
    }

    /// Append an event. Rejects events older than the last one.
    pub fn push(&self, event: Event) -> Result<(), EventError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(EventError::Closed);
        }
        if let Some(last) = state.last_time_us {
            if event.time_us < last {
                return Err(EventError::OutOfOrder {
                    last,
                    got: event.time_us,
                });
            }
        }
        if state.history.len() == self.capacity {
            state.history.pop_front();
            state.first_seq += 1;
        }
        state.last_time_us = Some(event.time_us);
        state.history.push_back(Arc::new(event));
        drop(state);
        self.signal.notify_all();
        Ok(())
    }

    /// Wait up to `timeout` for the listener's next unseen event.
    ///
    /// Returns `Ok(None)` on timeout, `Err(Closed)` once the channel is closed
    /// and the listener has drained it.
    pub fn poll(&self, listener: ListenerId, timeout: Duration) -> Result<Option<Delivery>, EventError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        if listener.0 >= state.listeners.len() {
            return Err(EventError::UnknownListener(listener.0));
        }
        loop {
            let wanted = state.listeners[listener.0];
            if wanted < state.next_seq() {
                let missed = state.first_seq.saturating_sub(wanted);
                let seq = wanted.max(state.first_seq);
                let event = Arc::clone(&state.history[(seq - state.first_seq) as usize]);
                state.listeners[listener.0] = seq + 1;
                if missed > 0 {
                    tracing::warn!(
                        channel = %self.name,
                        listener = listener.0,
                        missed,
                        "event listener fell behind history"
                    );
                }
                return Ok(Some(Delivery { event, missed }));
            }
            if state.closed {
                return Err(EventError::Closed);
            }
            if self.signal.wait_until(&mut state, deadline).timed_out() {
                if state.listeners[listener.0] < state.next_seq() {
                    continue;
                }
                return if state.closed {
                    Err(EventError::Closed)
                } else {
                    Ok(None)
                };
            }
        }
    }

    /// Close the channel and wake every waiting listener.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.signal.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
