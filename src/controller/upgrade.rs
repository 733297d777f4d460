//! mysqld upgrade safety
//!
//! MySQL releases before 8.0.34 may change the on-disk format in patch
//! releases. Restarting into such a version with fast shutdown enabled is
//! unsafe, so before those upgrades the tablet's mysqld is told to do a slow
//! shutdown.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use kube::Resource;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::crd::MYSQLD_CONTAINER_NAME;
use crate::error::{Error, Result};
use crate::topo::{Tablet, TabletManager};

use super::events::{EventRecorder, EventType};
use super::pods::container_image;

const DISABLE_FAST_SHUTDOWN: &str = "set @@global.innodb_fast_shutdown = 0";

/// From 8.0.34 on, 8.0.x patch releases are bugfix-only
const FIRST_BUGFIX_ONLY_PATCH: u32 = 34;

static MYSQL_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\.(\d+)\.(\d+)").expect("version pattern is valid"));

fn parse_version(version: &str) -> Option<[u32; 3]> {
    let captures = MYSQL_VERSION.captures(version)?;
    let mut parts = [0u32; 3];
    for (i, part) in parts.iter_mut().enumerate() {
        *part = captures.get(i + 1)?.as_str().parse().ok()?;
    }
    Some(parts)
}

/// Whether moving mysqld from `current` to `desired` version needs fast
/// shutdown disabled first.
///
/// Versions that do not start with `major.minor.patch` are assumed to need it.
///
/// # Errors
///
/// Returns [`Error::UnsupportedDowngrade`] for major or minor downgrades, and
/// for 8.0.x patch downgrades that are not both at or above 8.0.34.
pub fn safe_version_change(current: &str, desired: &str) -> Result<bool> {
    let (Some(cur), Some(dst)) = (parse_version(current), parse_version(desired)) else {
        return Ok(true);
    };
    if cur == dst {
        return Ok(false);
    }

    if dst[0] < cur[0] {
        return Err(Error::UnsupportedDowngrade(format!(
            "cannot downgrade major version from {} to {}",
            current, desired
        )));
    }
    if dst[0] == cur[0] && dst[1] < cur[1] {
        return Err(Error::UnsupportedDowngrade(format!(
            "cannot downgrade minor version from {} to {}",
            current, desired
        )));
    }

    if cur[..2] == [8, 0] && dst[..2] == [8, 0] {
        if cur[2] >= FIRST_BUGFIX_ONLY_PATCH && dst[2] >= FIRST_BUGFIX_ONLY_PATCH {
            return Ok(false);
        }
        if dst[2] < cur[2] {
            return Err(Error::UnsupportedDowngrade(format!(
                "cannot downgrade patch version from {} to {}",
                current, desired
            )));
        }
        return Ok(dst[2] != cur[2]);
    }

    Ok(dst[0] != cur[0] || dst[1] != cur[1])
}

/// [`safe_version_change`] for two `repository:tag` image references.
///
/// Unknown images, identical images, and images without a tag need nothing.
pub fn safe_mysqld_upgrade(current_image: &str, desired_image: &str) -> Result<bool> {
    if current_image.is_empty() || desired_image.is_empty() || current_image == desired_image {
        return Ok(false);
    }
    let (Some((_, current)), Some((_, desired))) =
        (current_image.split_once(':'), desired_image.split_once(':'))
    else {
        return Ok(false);
    };
    safe_version_change(current, desired)
}

/// Disable fast shutdown on every tablet whose mysqld is about to be moved to
/// `desired_image` in a way that needs it.
///
/// Stops at the first failure: handing over the primary while an upgrade is
/// not known to be safe is not allowed.
pub async fn disable_fast_shutdown(
    tmc: &dyn TabletManager,
    events: &dyn EventRecorder,
    pods: &BTreeMap<String, Pod>,
    tablets: &BTreeMap<String, Tablet>,
    desired_image: &str,
) -> Result<()> {
    for (alias, pod) in pods {
        let Some(tablet) = tablets.get(alias) else {
            continue;
        };
        let current = container_image(pod, MYSQLD_CONTAINER_NAME).unwrap_or_default();

        if !safe_mysqld_upgrade(current, desired_image)? {
            continue;
        }

        tmc.execute_fetch_as_dba(tablet, DISABLE_FAST_SHUTDOWN)
            .await
            .map_err(|e| {
                Error::RpcError(format!(
                    "failed to disable fast shutdown for tablet {}: {}",
                    alias, e
                ))
            })?;

        events
            .publish(
                &pod.object_ref(&()),
                EventType::Normal,
                "MySQL_Upgrade",
                "innodb_fast_shutdown = 0 to prepare MySQL upgrade",
            )
            .await;
        info!(
            "innodb_fast_shutdown = 0 to prepare MySQL upgrade on pod {}",
            pod.metadata.name.as_deref().unwrap_or_default()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::{tablet, CapturingEvents, FakeTabletManager, PodBuilder};
    use crate::topo::TabletType;

    #[test]
    fn test_version_changes() {
        assert!(safe_version_change("8.0.33", "8.0.34").unwrap());
        assert!(!safe_version_change("8.0.35", "8.0.36").unwrap());
        assert!(!safe_version_change("8.0.36", "8.0.35").unwrap());
        assert!(safe_version_change("5.7.9", "8.0.1").unwrap());
        assert!(safe_version_change("8.0.20", "8.0.30").unwrap());
        assert!(!safe_version_change("8.0.20", "8.0.20").unwrap());
        assert!(safe_version_change("8.0.40", "8.4.0").unwrap());
    }

    #[test]
    fn test_downgrades_are_rejected() {
        assert!(matches!(
            safe_version_change("8.0.34", "8.0.20"),
            Err(Error::UnsupportedDowngrade(_))
        ));
        assert!(matches!(
            safe_version_change("8.0.30", "5.7.40"),
            Err(Error::UnsupportedDowngrade(_))
        ));
        assert!(matches!(
            safe_version_change("8.4.0", "8.0.40"),
            Err(Error::UnsupportedDowngrade(_))
        ));
    }

    #[test]
    fn test_unparseable_versions_need_safe_mode() {
        assert!(safe_version_change("latest", "8.0.34").unwrap());
        assert!(safe_version_change("8.0.34", "8.0").unwrap());
    }

    #[test]
    fn test_image_references() {
        assert!(!safe_mysqld_upgrade("", "mysql:8.0.34").unwrap());
        assert!(!safe_mysqld_upgrade("mysql:8.0.20", "").unwrap());
        assert!(!safe_mysqld_upgrade("mysql:8.0.20", "mysql:8.0.20").unwrap());
        assert!(!safe_mysqld_upgrade("mysql", "mysql:8.0.34").unwrap());
        assert!(safe_mysqld_upgrade("mysql:8.0.20", "mysql:8.0.30").unwrap());
        assert!(safe_mysqld_upgrade("mysql:8.0.20", "percona:8.0.30-22").unwrap());
        assert!(safe_mysqld_upgrade("mysql:8.0.20", "mysql:8.0.34").is_ok());
    }

    fn fixture(images: &[(u32, &str)]) -> (BTreeMap<String, Pod>, BTreeMap<String, Tablet>) {
        let mut pods = BTreeMap::new();
        let mut tablets = BTreeMap::new();
        for &(uid, image) in images {
            let t = tablet(uid, TabletType::Replica);
            pods.insert(
                t.alias_string(),
                PodBuilder::new(uid).ready().mysqld_image(image).build(),
            );
            tablets.insert(t.alias_string(), t);
        }
        (pods, tablets)
    }

    #[tokio::test]
    async fn test_disables_fast_shutdown_where_needed() {
        let (pods, tablets) = fixture(&[(101, "mysql:8.0.20"), (102, "mysql:8.0.36")]);
        let tmc = FakeTabletManager::default();
        let events = CapturingEvents::default();

        disable_fast_shutdown(&tmc, &events, &pods, &tablets, "mysql:8.0.36")
            .await
            .unwrap();

        assert_eq!(
            tmc.fetches(),
            vec![("zone1-0000000101".to_string(), DISABLE_FAST_SHUTDOWN.to_string())]
        );
        assert_eq!(events.reasons(), vec!["MySQL_Upgrade".to_string()]);
    }

    #[tokio::test]
    async fn test_downgrade_aborts() {
        let (pods, tablets) = fixture(&[(101, "mysql:8.0.30")]);
        let tmc = FakeTabletManager::default();
        let events = CapturingEvents::default();

        let result = disable_fast_shutdown(&tmc, &events, &pods, &tablets, "mysql:8.0.20").await;
        assert!(matches!(result, Err(Error::UnsupportedDowngrade(_))));
        assert!(tmc.fetches().is_empty());
    }

    #[tokio::test]
    async fn test_command_failure_aborts() {
        let (pods, tablets) = fixture(&[(101, "mysql:8.0.20")]);
        let tmc = FakeTabletManager::default().failing_fetches();
        let events = CapturingEvents::default();

        let result = disable_fast_shutdown(&tmc, &events, &pods, &tablets, "mysql:8.0.30").await;
        assert!(matches!(result, Err(Error::RpcError(_))));
        assert!(events.reasons().is_empty());
    }
}
