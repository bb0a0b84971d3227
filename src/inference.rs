//! Inference engine boundary
//!
//! The shared text-generation model lives behind this trait; its tokenizer,
//! sampler and KV-cache internals are not this crate's business. The model
//! object is not safe for concurrent internal stepping: `step()` must be
//! externally serialized (the pool owns that lock), while the per-slot calls
//! are only ever made by the request currently holding the slot.

use crate::error::{NlqError, NlqResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Token id in the engine's vocabulary
pub type Token = u32;

/// Index of one generation slot/context inside the shared model
pub type SlotId = usize;

pub trait InferenceEngine: Send + Sync {
    /// Number of generation contexts the engine was built with
    fn context_count(&self) -> usize;

    /// Tokenize text for submission
    fn tokenize(&self, text: &str) -> NlqResult<Vec<Token>>;

    /// Cache a static grounding prefix into one slot's context. Invoked once
    /// per slot at startup, before the slot ever serves a request; the cached
    /// prefix survives across generations on that context.
    fn prime(&self, slot: SlotId, tokens: &[Token]) -> NlqResult<()>;

    /// Start generating against one slot's context
    fn submit(&self, slot: SlotId, tokens: &[Token]) -> NlqResult<()>;

    /// Advance the engine's internal bookkeeping by one step.
    /// Must never be invoked concurrently from two threads.
    fn step(&self);

    /// Whether the slot's generation is still in flight
    fn is_generating(&self, slot: SlotId) -> bool;

    /// Accumulated generated text for the slot's last submission
    fn take_output(&self, slot: SlotId) -> String;
}

/// Deterministic in-process engine used by the test suite and the `mock`
/// backend for local development without a model.
///
/// Each `submit` pops the next scripted response; generation completes after
/// a fixed number of `step` calls, so completion still flows through the
/// pool's stepping/notification machinery exactly like a real backend.
pub struct MockEngine {
    responses: Mutex<VecDeque<String>>,
    slots: Vec<Mutex<MockSlot>>,
    steps_to_finish: u32,
    fail_tokenize: AtomicBool,
    submissions: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    primed: Mutex<Vec<SlotId>>,
}

#[derive(Default)]
struct MockSlot {
    remaining_steps: u32,
    output: String,
    generating: bool,
}

impl MockEngine {
    pub fn new(contexts: usize) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            slots: (0..contexts).map(|_| Mutex::new(MockSlot::default())).collect(),
            steps_to_finish: 1,
            fail_tokenize: AtomicBool::new(false),
            submissions: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            primed: Mutex::new(Vec::new()),
        }
    }

    /// Queue scripted outputs, served in submission order
    pub fn with_responses<I, S>(mut self, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.responses =
            Mutex::new(responses.into_iter().map(Into::into).collect::<VecDeque<_>>());
        self
    }

    /// Number of `step` calls before a submission completes
    pub fn with_steps_to_finish(mut self, steps: u32) -> Self {
        self.steps_to_finish = steps.max(1);
        self
    }

    /// Make the next `tokenize` calls fail (fault injection)
    pub fn set_fail_tokenize(&self, fail: bool) {
        self.fail_tokenize.store(fail, Ordering::SeqCst);
    }

    /// How many submissions the engine has seen
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Every prompt text the engine was asked to tokenize, in order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Slots that received a grounding prefix, in priming order
    pub fn primed_slots(&self) -> Vec<SlotId> {
        self.primed.lock().unwrap().clone()
    }
}

impl InferenceEngine for MockEngine {
    fn context_count(&self) -> usize {
        self.slots.len()
    }

    fn tokenize(&self, text: &str) -> NlqResult<Vec<Token>> {
        if self.fail_tokenize.load(Ordering::SeqCst) {
            return Err(NlqError::internal("unable to tokenize input"));
        }
        self.prompts.lock().unwrap().push(text.to_string());
        Ok(text.bytes().map(Token::from).collect())
    }

    fn prime(&self, slot: SlotId, _tokens: &[Token]) -> NlqResult<()> {
        self.primed.lock().unwrap().push(slot);
        Ok(())
    }

    fn submit(&self, slot: SlotId, _tokens: &[Token]) -> NlqResult<()> {
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        let mut state = self.slots[slot].lock().unwrap();
        state.output = response;
        state.remaining_steps = self.steps_to_finish;
        state.generating = true;
        self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn step(&self) {
        for slot in &self.slots {
            let mut state = slot.lock().unwrap();
            if state.generating {
                state.remaining_steps -= 1;
                if state.remaining_steps == 0 {
                    state.generating = false;
                }
            }
        }
    }

    fn is_generating(&self, slot: SlotId) -> bool {
        self.slots[slot].lock().unwrap().generating
    }

    fn take_output(&self, slot: SlotId) -> String {
        self.slots[slot].lock().unwrap().output.clone()
    }
}
