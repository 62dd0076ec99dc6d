//! Finite state machine for the PatroniCluster finalizer lifecycle
//!
//! The lifecycle is derived from the object on every pass rather than
//! stored: the finalizer marker and the deletion timestamp are the only
//! inputs. Transitions are explicit so an unexpected combination shows up
//! as an invalid transition in the logs instead of a silent branch.

use std::fmt;

use crate::crd::PatroniCluster;

/// Finalizer marking clusters the controller has started creating
pub const FINALIZER: &str = "patroni-cluster-controller";

/// Observed lifecycle state of a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Not yet picked up by the controller
    NoFinalizer,
    /// Creation started; steady state
    FinalizerSet,
    /// Deletion requested while the finalizer still holds the object
    Deleting,
    /// Deletion requested and no finalizer of ours left
    Released,
}

impl LifecycleState {
    /// Derive the state from the finalizer marker and deletion timestamp
    pub fn observe(cluster: &PatroniCluster) -> Self {
        let deleting = cluster.metadata.deletion_timestamp.is_some();
        match (has_finalizer(cluster), deleting) {
            (false, false) => LifecycleState::NoFinalizer,
            (true, false) => LifecycleState::FinalizerSet,
            (true, true) => LifecycleState::Deleting,
            (false, true) => LifecycleState::Released,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::NoFinalizer => write!(f, "NoFinalizer"),
            LifecycleState::FinalizerSet => write!(f, "FinalizerSet"),
            LifecycleState::Deleting => write!(f, "Deleting"),
            LifecycleState::Released => write!(f, "Released"),
        }
    }
}

/// Events that move a cluster between lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Finalizer added and status set to Initialized
    CreationStarted,
    /// Deletion timestamp set by the API server
    DeletionRequested,
    /// Finalizer removed after cleanup
    FinalizerReleased,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::CreationStarted => write!(f, "CreationStarted"),
            LifecycleEvent::DeletionRequested => write!(f, "DeletionRequested"),
            LifecycleEvent::FinalizerReleased => write!(f, "FinalizerReleased"),
        }
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub event: LifecycleEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: LifecycleState,
        to: LifecycleState,
        event: LifecycleEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug, PartialEq, Eq)]
pub enum TransitionResult {
    Success {
        from: LifecycleState,
        to: LifecycleState,
        event: LifecycleEvent,
        description: &'static str,
    },
    InvalidTransition {
        current: LifecycleState,
        event: LifecycleEvent,
    },
}

impl TransitionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TransitionResult::Success { .. })
    }
}

const TRANSITIONS: [Transition; 4] = [
    Transition::new(
        LifecycleState::NoFinalizer,
        LifecycleState::FinalizerSet,
        LifecycleEvent::CreationStarted,
        "Finalizer added, creating cluster members",
    ),
    Transition::new(
        LifecycleState::NoFinalizer,
        LifecycleState::Released,
        LifecycleEvent::DeletionRequested,
        "Cluster deleted before creation started",
    ),
    Transition::new(
        LifecycleState::FinalizerSet,
        LifecycleState::Deleting,
        LifecycleEvent::DeletionRequested,
        "Cluster deletion requested",
    ),
    Transition::new(
        LifecycleState::Deleting,
        LifecycleState::Released,
        LifecycleEvent::FinalizerReleased,
        "Finalizer removed, cluster handed to garbage collection",
    ),
];

/// State machine over the finalizer lifecycle
#[derive(Debug, Default, Clone, Copy)]
pub struct LifecycleStateMachine;

impl LifecycleStateMachine {
    pub fn new() -> Self {
        Self
    }

    /// Attempt to transition to a new state based on an event
    pub fn transition(&self, current: LifecycleState, event: LifecycleEvent) -> TransitionResult {
        match TRANSITIONS
            .iter()
            .find(|t| t.from == current && t.event == event)
        {
            Some(t) => TransitionResult::Success {
                from: t.from,
                to: t.to,
                event,
                description: t.description,
            },
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    /// Events accepted in `state`
    pub fn valid_events(&self, state: LifecycleState) -> Vec<LifecycleEvent> {
        TRANSITIONS
            .iter()
            .filter(|t| t.from == state)
            .map(|t| t.event)
            .collect()
    }
}

/// Check if the cluster carries the controller's finalizer
pub fn has_finalizer(cluster: &PatroniCluster) -> bool {
    cluster
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == FINALIZER))
}
