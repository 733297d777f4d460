//! Drain requests and their acknowledgement, recorded as pod annotations
//!
//! An external drainer asks for a tablet pod to be drained by setting the
//! `started` annotation. The controller answers by adding `acknowledged` and,
//! once the tablet is no longer needed, `finished`. The drainer deletes the pod
//! only after it sees `finished`. Removing `started` aborts the drain.
//!
//! At most one pod of a shard is ever marked `finished`, see
//! [`state_transitions`].

mod markers;
mod transitions;

pub use markers::{
    drain_state, set_drain_state, DrainMarkers, InvalidDrainState, DRAIN_ACKNOWLEDGED_ANNOTATION,
    DRAIN_FINISHED_ANNOTATION, DRAIN_STARTED_ANNOTATION,
};
pub use transitions::state_transitions;

use std::fmt;

/// Where a pod is in the drain lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DrainState {
    /// No drain was requested
    NotDraining,
    /// The drainer requested a drain that the controller has not seen yet
    Draining,
    /// The controller saw the request and is preparing the tablet to go away
    Acknowledged,
    /// The tablet is no longer needed and the pod may be deleted
    Finished,
}

impl fmt::Display for DrainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DrainState::NotDraining => "NotDraining",
            DrainState::Draining => "Draining",
            DrainState::Acknowledged => "Acknowledged",
            DrainState::Finished => "Finished",
        })
    }
}
