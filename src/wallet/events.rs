//! Blocking wallet event queue
//!
//! Callers pull events one at a time. The queue is bounded: when it is full
//! the oldest event is dropped. `stop` wakes every waiter with
//! [`WalletError::OperationCancelled`].

use log::warn;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Result, WalletError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletEvent {
    TransactionCreated { transaction_id: usize },
    TransactionUpdated { transaction_id: usize },
    BalanceUnlocked,
    SyncProgressUpdated { processed: u32, total: u32 },
    SyncCompleted,
}

struct QueueState {
    events: VecDeque<WalletEvent>,
    stopped: bool,
}

pub struct EventQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        EventQueue {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState {
                events: VecDeque::new(),
                stopped: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, event: WalletEvent) {
        let mut state = self.lock();
        if state.events.len() >= self.capacity {
            if let Some(dropped) = state.events.pop_front() {
                warn!("Event queue is full, dropping {dropped:?}");
            }
        }
        state.events.push_back(event);
        self.ready.notify_one();
    }

    pub fn extend(&self, events: impl IntoIterator<Item = WalletEvent>) {
        for event in events {
            self.push(event);
        }
    }

    /// Blocks until an event arrives or the queue is stopped
    pub fn wait(&self) -> Result<WalletEvent> {
        let mut state = self.lock();
        loop {
            if state.stopped {
                return Err(WalletError::OperationCancelled);
            }
            if let Some(event) = state.events.pop_front() {
                return Ok(event);
            }
            state = self.ready.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Option<WalletEvent>> {
        let state = self.lock();
        let (mut state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |s| !s.stopped && s.events.is_empty())
            .unwrap_or_else(|e| e.into_inner());
        if state.stopped {
            return Err(WalletError::OperationCancelled);
        }
        Ok(state.events.pop_front())
    }

    pub fn try_next(&self) -> Option<WalletEvent> {
        self.lock().events.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().events.clear();
    }

    pub fn stop(&self) {
        self.lock().stopped = true;
        self.ready.notify_all();
    }

    pub fn start(&self) {
        self.lock().stopped = false;
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }
}
