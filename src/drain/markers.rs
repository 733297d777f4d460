//! Typed access to the drain annotations on a pod

use std::collections::BTreeMap;

use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;
use thiserror::Error;

use super::DrainState;

/// Set by the drainer to request a drain
pub const DRAIN_STARTED_ANNOTATION: &str = "drain.shardops.io/started";
/// Set by the controller once it has seen the request
pub const DRAIN_ACKNOWLEDGED_ANNOTATION: &str = "drain.shardops.io/acknowledged";
/// Set by the controller once the pod may be deleted
pub const DRAIN_FINISHED_ANNOTATION: &str = "drain.shardops.io/finished";

/// Snapshot of which drain annotations are present on a pod
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainMarkers {
    pub started: bool,
    pub acknowledged: bool,
    pub finished: bool,
}

impl DrainMarkers {
    pub fn from_pod(pod: &Pod) -> Self {
        let annotations = pod.metadata.annotations.as_ref();
        let has = |key: &str| annotations.is_some_and(|a| a.contains_key(key));
        Self {
            started: has(DRAIN_STARTED_ANNOTATION),
            acknowledged: has(DRAIN_ACKNOWLEDGED_ANNOTATION),
            finished: has(DRAIN_FINISHED_ANNOTATION),
        }
    }

    /// Whether the pod carries any marker at all
    pub fn any(&self) -> bool {
        self.started || self.acknowledged || self.finished
    }

    /// Controller markers left behind after the drainer withdrew its request
    pub fn is_aborted(&self) -> bool {
        !self.started && (self.acknowledged || self.finished)
    }
}

/// A started pod whose controller markers are inconsistent
#[derive(Debug, Error, PartialEq, Eq)]
#[error("drain annotations are inconsistent: {reason}")]
pub struct InvalidDrainState {
    /// State the pod is treated as being in regardless
    pub state: DrainState,
    pub reason: &'static str,
}

/// Read a pod's drain state.
///
/// A pod marked `finished` without `acknowledged` is reported as invalid but
/// still treated as finished, so it is never silently un-finished.
pub fn drain_state(pod: &Pod) -> Result<DrainState, InvalidDrainState> {
    let markers = DrainMarkers::from_pod(pod);
    if !markers.started {
        return Ok(DrainState::NotDraining);
    }
    match (markers.acknowledged, markers.finished) {
        (false, true) => Err(InvalidDrainState {
            state: DrainState::Finished,
            reason: "finished without acknowledged",
        }),
        (true, true) => Ok(DrainState::Finished),
        (true, false) => Ok(DrainState::Acknowledged),
        (false, false) => Ok(DrainState::Draining),
    }
}

/// Move the pod's controller-owned annotations towards `state`.
///
/// Returns whether the pod object was changed and needs to be written back.
/// Moving to `Acknowledged` never removes `finished`; only `NotDraining`
/// clears the controller's markers.
///
/// # Panics
///
/// `Draining` is owned by the drainer; asking the controller to set it is a
/// programming error.
pub fn set_drain_state(pod: &mut Pod, state: DrainState) -> bool {
    let markers = DrainMarkers::from_pod(pod);
    match state {
        DrainState::Finished => {
            let mut changed = false;
            if !markers.acknowledged {
                insert_marker(pod, DRAIN_ACKNOWLEDGED_ANNOTATION);
                changed = true;
            }
            if !markers.finished {
                insert_marker(pod, DRAIN_FINISHED_ANNOTATION);
                changed = true;
            }
            changed
        }
        DrainState::Acknowledged => {
            if markers.acknowledged {
                return false;
            }
            insert_marker(pod, DRAIN_ACKNOWLEDGED_ANNOTATION);
            true
        }
        DrainState::NotDraining => {
            let mut changed = false;
            if let Some(annotations) = pod.metadata.annotations.as_mut() {
                changed |= annotations.remove(DRAIN_FINISHED_ANNOTATION).is_some();
                changed |= annotations.remove(DRAIN_ACKNOWLEDGED_ANNOTATION).is_some();
            }
            changed
        }
        DrainState::Draining => {
            panic!("programming error: the controller must never mark a pod as Draining")
        }
    }
}

fn insert_marker(pod: &mut Pod, key: &str) {
    pod.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), Utc::now().to_rfc3339());
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn pod_with(keys: &[&str]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("tablet-0".to_string()),
                annotations: Some(
                    keys.iter()
                        .map(|k| (k.to_string(), "2026-01-01T00:00:00Z".to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_drain_state_from_annotations() {
        assert_eq!(drain_state(&Pod::default()), Ok(DrainState::NotDraining));
        assert_eq!(
            drain_state(&pod_with(&[DRAIN_STARTED_ANNOTATION])),
            Ok(DrainState::Draining)
        );
        assert_eq!(
            drain_state(&pod_with(&[
                DRAIN_STARTED_ANNOTATION,
                DRAIN_ACKNOWLEDGED_ANNOTATION
            ])),
            Ok(DrainState::Acknowledged)
        );
        assert_eq!(
            drain_state(&pod_with(&[
                DRAIN_STARTED_ANNOTATION,
                DRAIN_ACKNOWLEDGED_ANNOTATION,
                DRAIN_FINISHED_ANNOTATION
            ])),
            Ok(DrainState::Finished)
        );
    }

    #[test]
    fn test_finished_without_acknowledged_is_invalid_but_finished() {
        let err = drain_state(&pod_with(&[
            DRAIN_STARTED_ANNOTATION,
            DRAIN_FINISHED_ANNOTATION,
        ]))
        .unwrap_err();
        assert_eq!(err.state, DrainState::Finished);
    }

    #[test]
    fn test_controller_markers_without_request_are_aborted() {
        assert!(DrainMarkers::from_pod(&pod_with(&[DRAIN_ACKNOWLEDGED_ANNOTATION])).is_aborted());
        assert!(DrainMarkers::from_pod(&pod_with(&[DRAIN_FINISHED_ANNOTATION])).is_aborted());
        assert!(!DrainMarkers::from_pod(&pod_with(&[
            DRAIN_STARTED_ANNOTATION,
            DRAIN_ACKNOWLEDGED_ANNOTATION
        ]))
        .is_aborted());
        assert!(!DrainMarkers::from_pod(&Pod::default()).is_aborted());
    }

    #[test]
    fn test_set_drain_state_reports_changes() {
        let mut pod = pod_with(&[DRAIN_STARTED_ANNOTATION]);
        assert!(set_drain_state(&mut pod, DrainState::Acknowledged));
        assert!(!set_drain_state(&mut pod, DrainState::Acknowledged));
        assert!(set_drain_state(&mut pod, DrainState::Finished));
        assert!(!set_drain_state(&mut pod, DrainState::Finished));
        assert_eq!(drain_state(&pod), Ok(DrainState::Finished));
    }

    #[test]
    fn test_acknowledge_never_unfinishes() {
        let mut pod = pod_with(&[
            DRAIN_STARTED_ANNOTATION,
            DRAIN_ACKNOWLEDGED_ANNOTATION,
            DRAIN_FINISHED_ANNOTATION,
        ]);
        assert!(!set_drain_state(&mut pod, DrainState::Acknowledged));
        assert!(DrainMarkers::from_pod(&pod).finished);
    }

    #[test]
    fn test_not_draining_clears_controller_markers_only() {
        let mut pod = pod_with(&[
            DRAIN_STARTED_ANNOTATION,
            DRAIN_ACKNOWLEDGED_ANNOTATION,
            DRAIN_FINISHED_ANNOTATION,
        ]);
        assert!(set_drain_state(&mut pod, DrainState::NotDraining));
        let markers = DrainMarkers::from_pod(&pod);
        assert!(markers.started);
        assert!(!markers.acknowledged);
        assert!(!markers.finished);
        assert!(!set_drain_state(&mut pod, DrainState::NotDraining));
    }

    #[test]
    #[should_panic(expected = "never mark a pod as Draining")]
    fn test_setting_draining_is_a_programming_error() {
        let mut pod = Pod::default();
        set_drain_state(&mut pod, DrainState::Draining);
    }
}
