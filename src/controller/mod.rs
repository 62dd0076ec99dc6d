pub mod bridge;
pub mod context;
pub mod error;
pub mod hooks;
pub mod lister;
pub mod platform;
pub mod queue;
pub mod reconciler;
pub mod state_machine;
pub mod validation;
pub mod worker;

pub use bridge::{EventBridge, EventTranslator, WatchEvent, key_for, split_key};
pub use context::Context;
pub use error::{Error, Result, handle_error};
pub use hooks::{LifecycleHooks, NoopHooks};
pub use lister::{ClusterLister, wait_for_cache_sync};
pub use platform::{KubePlatform, Platform};
pub use queue::{ItemExponentialRateLimiter, RateLimiter, WorkQueue};
pub use reconciler::{Outcome, reconcile};
pub use state_machine::{FINALIZER, LifecycleEvent, LifecycleState, LifecycleStateMachine};
pub use validation::validate_spec;
pub use worker::{Controller, WorkerConfig, process_next_item};
