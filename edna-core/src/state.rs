//! Pipeline state machine.
//!
//! The single source of truth for what the assistant is doing. Every stage
//! reports its outcome by dispatching an event; the capture loop reads the
//! current state to decide whether the microphone is gated.
//!
//! ## Transition table
//!
//! ```text
//! Boot            --Start-----------> AwaitSpeech
//! AwaitSpeech     --SpeechStart-----> CapturingSpeech
//! CapturingSpeech --SpeechEndQueued-> Transcribing
//! Transcribing    --TranscriptReady-> Thinking
//! Transcribing    --NoCommand-------> AwaitSpeech
//! Thinking        --ReplyReady------> Speaking
//! Thinking        --NoCommand-------> AwaitSpeech
//! Speaking        --TtsDone---------> AwaitSpeech
//! Error           --Start-----------> AwaitSpeech
//! ```
//!
//! Any (state, event) pair not listed is a no-op: the dispatch is accepted,
//! nothing changes, and the observer is not invoked.

use std::sync::Arc;

use parking_lot::Mutex;

/// Pipeline phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Created, `start()` not yet dispatched.
    Boot,
    /// Idle, microphone open, waiting for a start trigger.
    AwaitSpeech,
    /// An utterance is being accumulated.
    CapturingSpeech,
    /// An utterance has been handed to the recognizer.
    Transcribing,
    /// A command is in the language model.
    Thinking,
    /// The reply is being synthesized and played. The mic is gated.
    Speaking,
    /// Unrecoverable fault; `Start` resets.
    Error,
    /// Terminal.
    Shutdown,
}

/// Events dispatched by the pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    Start,
    SpeechStart,
    SpeechEndQueued,
    TranscriptReady,
    ReplyReady,
    TtsDone,
    Stop,
    NoCommand,
    Fail,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Boot => "Boot",
            PipelineState::AwaitSpeech => "AwaitSpeech",
            PipelineState::CapturingSpeech => "CapturingSpeech",
            PipelineState::Transcribing => "Transcribing",
            PipelineState::Thinking => "Thinking",
            PipelineState::Speaking => "Speaking",
            PipelineState::Error => "Error",
            PipelineState::Shutdown => "Shutdown",
        }
    }
}

impl PipelineEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineEvent::Start => "Start",
            PipelineEvent::SpeechStart => "SpeechStart",
            PipelineEvent::SpeechEndQueued => "SpeechEndQueued",
            PipelineEvent::TranscriptReady => "TranscriptReady",
            PipelineEvent::ReplyReady => "ReplyReady",
            PipelineEvent::TtsDone => "TtsDone",
            PipelineEvent::Stop => "Stop",
            PipelineEvent::NoCommand => "NoCommand",
            PipelineEvent::Fail => "Fail",
        }
    }
}

/// Apply one event to a state. Pure; returns the next state and whether a
/// transition was taken.
pub fn transition(state: PipelineState, event: PipelineEvent) -> (PipelineState, bool) {
    use PipelineEvent as E;
    use PipelineState as S;

    let next = match (state, event) {
        (S::Boot, E::Start) => S::AwaitSpeech,
        (S::AwaitSpeech, E::SpeechStart) => S::CapturingSpeech,
        (S::CapturingSpeech, E::SpeechEndQueued) => S::Transcribing,
        (S::Transcribing, E::TranscriptReady) => S::Thinking,
        (S::Transcribing, E::NoCommand) => S::AwaitSpeech,
        (S::Thinking, E::ReplyReady) => S::Speaking,
        (S::Thinking, E::NoCommand) => S::AwaitSpeech,
        (S::Speaking, E::TtsDone) => S::AwaitSpeech,
        (S::Error, E::Start) => S::AwaitSpeech,
        _ => return (state, false),
    };
    (next, true)
}

/// Called on every taken transition: `(from, to, event, note)`.
///
/// Invoked after the state lock is released, so it may dispatch further
/// events, but it must not block for long: it runs on whichever pipeline
/// thread dispatched the event.
pub type Observer = Arc<dyn Fn(PipelineState, PipelineState, PipelineEvent, &str) + Send + Sync>;

/// Thread-safe state cell with transition dispatch.
pub struct StateMachine {
    state: Mutex<PipelineState>,
    observer: Mutex<Option<Observer>>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PipelineState::Boot),
            observer: Mutex::new(None),
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    /// Subscribe to transitions. Replaces any previous observer.
    pub fn set_observer(&self, observer: Observer) {
        *self.observer.lock() = Some(observer);
    }

    /// Begin operation: `Boot -> AwaitSpeech`.
    pub fn start(&self) {
        self.dispatch(PipelineEvent::Start, "start()");
    }

    /// Dispatch an event from any thread. The optional note is forwarded to
    /// the observer for logging.
    pub fn dispatch(&self, event: PipelineEvent, note: &str) {
        let (from, to, did) = {
            let mut st = self.state.lock();
            let from = *st;
            let (to, did) = transition(from, event);
            if did {
                *st = to;
            }
            (from, to, did)
        };

        if !did {
            return;
        }

        // Clone the observer handle, then call it outside both locks so a
        // re-entrant dispatch from inside the callback cannot deadlock.
        let observer = self.observer.lock().clone();
        if let Some(obs) = observer {
            obs(from, to, event, note);
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
