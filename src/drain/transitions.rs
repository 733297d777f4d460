//! The drain state machine

use std::collections::BTreeMap;

use super::DrainState;

/// Compute the next drain state of every pod that has a drain request.
///
/// Rules, applied to the whole shard at once:
/// - `Draining` always becomes `Acknowledged` first.
/// - A `Finished` pod stays `Finished`, and while one exists no other pod
///   is promoted.
/// - Otherwise, once no pod is still `Draining`, one `Acknowledged` pod becomes
///   `Finished`. Pods other than `primary` go first, by alias order. The
///   primary is only picked when it is the sole `Acknowledged` pod.
///
/// The result never holds more than one `Finished` entry. Should the input hold
/// several, the first by alias order keeps it and the rest are reported as
/// `Acknowledged`. `NotDraining` entries are ignored.
pub fn state_transitions(
    current: &BTreeMap<String, DrainState>,
    primary: Option<&str>,
) -> BTreeMap<String, DrainState> {
    let mut next = BTreeMap::new();
    let mut have_finished = false;
    let mut any_draining = false;

    for (alias, state) in current {
        let target = match state {
            DrainState::NotDraining => continue,
            DrainState::Draining => {
                any_draining = true;
                DrainState::Acknowledged
            }
            DrainState::Acknowledged => DrainState::Acknowledged,
            DrainState::Finished if have_finished => DrainState::Acknowledged,
            DrainState::Finished => {
                have_finished = true;
                DrainState::Finished
            }
        };
        next.insert(alias.clone(), target);
    }

    if !have_finished && !any_draining {
        let acknowledged = |alias: &&String| next[*alias] == DrainState::Acknowledged;
        let pick = next
            .keys()
            .filter(acknowledged)
            .find(|alias| Some(alias.as_str()) != primary)
            .or_else(|| next.keys().find(acknowledged))
            .cloned();
        if let Some(alias) = pick {
            next.insert(alias, DrainState::Finished);
        }
    }

    next
}
