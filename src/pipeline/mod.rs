// src/pipeline/mod.rs

pub mod context_watcher;
pub mod escalation_dispatch;
pub mod frame_loop;
pub mod runtime;

pub use context_watcher::{
    provider_from_config, ContextProvider, ContextWatcher, FileContextProvider, FixedContext,
};
pub use escalation_dispatch::{EscalationDispatcher, EscalationPoll};
pub use frame_loop::{FrameInput, FrameLoop, FrameOutcome};
pub use runtime::{RuntimeSummary, SharedRuntime};
