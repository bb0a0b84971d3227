//! Processor pool - bounded concurrent access to the shared model
//!
//! A fixed, pre-allocated set of generation slots with admission control:
//! `acquire` never blocks and never queues; an empty free list means the
//! caller is told "overloaded" and may retry at its own discretion. A slot is
//! always returned, even when the request that held it failed, so capacity
//! can never shrink over the process lifetime.
//!
//! Two independent locks, never held together:
//! - the free-list mutex, held O(1) for a pop/push only;
//! - the step lock, serializing `engine.step()` between request tasks and the
//!   background ticker (the engine is not safe for concurrent stepping).
//!
//! Generation completion is signalled through a `Notify` fired after every
//! step; waiters fall back to a short poll interval to cover wakeups that
//! race the flag check.
//!
//! A slot whose generation was abandoned (timeout) is quarantined instead of
//! freed: its engine context is still mid-generation, and handing it to the
//! next request would put two writers on one context. The stepping path
//! returns quarantined slots to the free list once the engine reports them
//! idle again.

use crate::config::PoolConfig;
use crate::error::{NlqError, NlqResult};
use crate::inference::{InferenceEngine, SlotId};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

pub struct ProcessorPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    engine: Arc<dyn InferenceEngine>,
    /// Index-based availability set over the pre-allocated slot array
    free: Mutex<Vec<SlotId>>,
    /// Slots returned while their engine context was still generating;
    /// drained back into `free` by the stepping path
    quarantined: Mutex<Vec<SlotId>>,
    /// Per-slot conversation buffer, exclusively owned by the current holder
    conversations: Vec<Mutex<String>>,
    /// Serializes engine stepping; distinct from the free-list lock
    step_lock: Mutex<()>,
    stepped: Notify,
    poll_interval: Duration,
    generation_timeout: Duration,
}

impl ProcessorPool {
    pub fn new(engine: Arc<dyn InferenceEngine>, config: &PoolConfig) -> Self {
        let slots = config.slots.min(engine.context_count()).max(1);
        let shared = Arc::new(PoolShared {
            engine,
            free: Mutex::new((0..slots).rev().collect()),
            quarantined: Mutex::new(Vec::new()),
            conversations: (0..slots).map(|_| Mutex::new(String::new())).collect(),
            step_lock: Mutex::new(()),
            stepped: Notify::new(),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            generation_timeout: Duration::from_millis(config.generation_timeout_ms),
        });
        Self { shared }
    }

    /// Fixed capacity decided at startup
    pub fn capacity(&self) -> usize {
        self.shared.conversations.len()
    }

    /// Currently free slots (diagnostics only; stale the moment it returns)
    pub fn available(&self) -> usize {
        self.shared.free.lock().unwrap().len()
    }

    /// Non-blocking admission control: `None` means every slot is busy.
    /// The slot's conversation buffer is reset before the guard is handed out.
    pub fn acquire(&self) -> Option<SlotGuard> {
        let slot = self.shared.free.lock().unwrap().pop()?;
        self.shared.conversations[slot].lock().unwrap().clear();
        tracing::debug!(slot, "slot acquired");
        Some(SlotGuard {
            shared: Arc::clone(&self.shared),
            slot,
        })
    }

    /// Cache the static grounding prompt into every slot's context.
    /// Tokenized exactly once; must run before the pool serves requests
    /// (every slot is still free, so no request can be writing to one).
    pub fn prime_all(&self, grounding_prompt: &str) -> NlqResult<()> {
        let tokens = self.shared.engine.tokenize(grounding_prompt)?;
        for slot in 0..self.capacity() {
            self.shared.engine.prime(slot, &tokens)?;
        }
        tracing::info!(slots = self.capacity(), "grounding prompt cached into every slot");
        Ok(())
    }

    /// Advance the engine once, under the step lock, and wake waiters
    pub fn step_once(&self) {
        self.shared.step_once();
    }

    /// Background ticker: periodically pumps the engine so generations make
    /// progress even while every request task is parked waiting
    pub fn spawn_ticker(pool: Arc<ProcessorPool>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                pool.step_once();
            }
        })
    }
}

impl PoolShared {
    fn step_once(&self) {
        {
            let _guard = self.step_lock.lock().unwrap();
            self.engine.step();
        }
        self.reclaim_quarantined();
        self.stepped.notify_waiters();
    }

    /// Return quarantined slots whose in-flight generation has drained.
    /// Their stale output is discarded before the slot becomes available.
    fn reclaim_quarantined(&self) {
        let mut quarantined = self.quarantined.lock().unwrap();
        let mut idx = 0;
        while idx < quarantined.len() {
            let slot = quarantined[idx];
            if self.engine.is_generating(slot) {
                idx += 1;
                continue;
            }
            quarantined.swap_remove(idx);
            self.engine.take_output(slot);
            self.free.lock().unwrap().push(slot);
            tracing::debug!(slot, "quarantined slot reclaimed");
        }
    }
}

/// Exclusive ownership of one slot for the duration of a request.
/// Dropping the guard returns the slot unconditionally, on success and on
/// every error path alike.
pub struct SlotGuard {
    shared: Arc<PoolShared>,
    slot: SlotId,
}

impl SlotGuard {
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Append one exchange to the slot's conversation buffer
    pub fn record_exchange(&self, prompt: &str, output: &str) {
        let mut buffer = self.shared.conversations[self.slot].lock().unwrap();
        buffer.push_str(prompt);
        buffer.push('\n');
        buffer.push_str(output);
        buffer.push('\n');
    }

    /// Conversation accumulated during this borrow
    pub fn conversation(&self) -> String {
        self.shared.conversations[self.slot].lock().unwrap().clone()
    }

    /// Run one full generation round: tokenize, submit, pump until the
    /// engine reports completion, read back the accumulated text.
    pub async fn generate(&self, prompt: &str) -> NlqResult<String> {
        let engine = &self.shared.engine;
        let tokens = engine.tokenize(prompt)?;
        engine.submit(self.slot, &tokens)?;

        let deadline = tokio::time::Instant::now() + self.shared.generation_timeout;
        while engine.is_generating(self.slot) {
            self.shared.step_once();
            if !engine.is_generating(self.slot) {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(slot = self.slot, "generation timed out");
                return Err(NlqError::internal("generation timed out"));
            }
            let _ = tokio::time::timeout(
                self.shared.poll_interval,
                self.shared.stepped.notified(),
            )
            .await;
        }

        let output = engine.take_output(self.slot);
        self.record_exchange(prompt, &output);
        Ok(output)
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        // A context still generating (abandoned after a timeout) must not be
        // handed to the next request; park it until the engine drains it.
        if self.shared.engine.is_generating(self.slot) {
            self.shared.quarantined.lock().unwrap().push(self.slot);
            tracing::warn!(slot = self.slot, "slot quarantined: generation still in flight");
        } else {
            self.shared.free.lock().unwrap().push(self.slot);
            tracing::debug!(slot = self.slot, "slot released");
        }
    }
}
