//! vtctld HTTP adapter
//!
//! Topology reads go through the REST endpoints (`/api/shards/`, `/api/tablets/`);
//! everything else is sent as a vtctl command line to `/api/vtctl/`, which
//! answers with `{"Error": "...", "Output": "..."}`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use super::client::{PlannedReparentRequest, ReplicationStatus, TabletManager, TopologyStore};
use super::types::{ShardRecord, Tablet, TabletAlias, TabletType};
use crate::error::{Error, Result};

/// Client for a vtctld HTTP endpoint
#[derive(Clone)]
pub struct VtctldClient {
    http_client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct VtctlResponse {
    #[serde(rename = "Error", default)]
    error: String,
    #[serde(rename = "Output", default)]
    output: String,
}

#[derive(Debug, Deserialize)]
struct AliasJson {
    cell: String,
    #[serde(default)]
    uid: u32,
}

impl From<AliasJson> for TabletAlias {
    fn from(alias: AliasJson) -> Self {
        TabletAlias::new(alias.cell, alias.uid)
    }
}

#[derive(Debug, Deserialize)]
struct ShardJson {
    #[serde(default, alias = "master_alias")]
    primary_alias: Option<AliasJson>,
}

#[derive(Debug, Deserialize)]
struct TabletJson {
    alias: AliasJson,
    #[serde(default)]
    hostname: String,
    #[serde(default)]
    keyspace: String,
    #[serde(default)]
    shard: String,
    /// Either the enum name or its numeric value, depending on the vtctld version
    #[serde(rename = "type", default)]
    tablet_type: Value,
}

#[derive(Debug, Deserialize)]
struct FullStatusJson {
    #[serde(default)]
    replication_status: Option<ReplicationStatusJson>,
    #[serde(default)]
    primary_status: Option<ReplicationStatusJson>,
}

#[derive(Debug, Deserialize)]
struct ReplicationStatusJson {
    #[serde(default)]
    position: String,
}

impl VtctldClient {
    /// Create a client for the vtctld at `base_url` (e.g. `http://vtctld:15000`)
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("shard-drain-operator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Run a vtctl command and return its output
    async fn run_command(&self, args: &[String]) -> Result<String> {
        let url = format!("{}/api/vtctl/", self.base_url);
        debug!("Running vtctl command {:?}", args);

        let response = self
            .http_client
            .post(&url)
            .json(args)
            .send()
            .await?
            .error_for_status()?;
        let body: VtctlResponse = response.json().await?;

        if !body.error.is_empty() {
            let command = args.first().map(String::as_str).unwrap_or_default();
            return Err(Error::RpcError(format!("{}: {}", command, body.error)));
        }
        Ok(body.output)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("Querying vtctld {}", url);

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::TopologyError(format!("GET {}: {}", path, e)))?;
        if !response.status().is_success() {
            return Err(Error::TopologyError(format!(
                "GET {} returned HTTP {}",
                path,
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| Error::TopologyError(format!("GET {}: {}", path, e)))
    }

    async fn get_tablet(&self, alias: &TabletAlias) -> Result<Tablet> {
        let tablet: TabletJson = self.get_json(&format!("/api/tablets/{}", alias)).await?;
        let tablet_type = match &tablet.tablet_type {
            Value::Number(n) => TabletType::from_code(n.as_i64().unwrap_or_default()),
            Value::String(s) => s.parse()?,
            _ => TabletType::Unknown,
        };
        Ok(Tablet {
            alias: tablet.alias.into(),
            tablet_type,
            keyspace: tablet.keyspace,
            shard: tablet.shard,
            hostname: tablet.hostname,
        })
    }
}

#[async_trait]
impl TopologyStore for VtctldClient {
    #[instrument(skip(self))]
    async fn get_shard(&self, keyspace: &str, shard: &str) -> Result<ShardRecord> {
        let record: ShardJson = self
            .get_json(&format!("/api/shards/{}/{}", keyspace, shard))
            .await?;
        Ok(ShardRecord {
            keyspace: keyspace.to_string(),
            name: shard.to_string(),
            primary_alias: record
                .primary_alias
                .map(TabletAlias::from)
                .filter(|alias| !alias.cell.is_empty()),
        })
    }

    #[instrument(skip(self))]
    async fn get_tablet_map(
        &self,
        keyspace: &str,
        shard: &str,
        cells: &[String],
    ) -> Result<BTreeMap<String, Tablet>> {
        let mut tablets = BTreeMap::new();
        for cell in cells {
            let aliases: Vec<AliasJson> = self
                .get_json(&format!(
                    "/api/tablets/?shard={}/{}&cell={}",
                    keyspace, shard, cell
                ))
                .await?;
            for alias in aliases {
                let tablet = self.get_tablet(&alias.into()).await?;
                tablets.insert(tablet.alias_string(), tablet);
            }
        }
        Ok(tablets)
    }
}

#[async_trait]
impl TabletManager for VtctldClient {
    async fn replication_status(&self, tablet: &Tablet) -> Result<ReplicationStatus> {
        let output = self
            .run_command(&["GetFullStatus".to_string(), tablet.alias_string()])
            .await?;
        let status: FullStatusJson = serde_json::from_str(&output)?;
        let position = status
            .replication_status
            .or(status.primary_status)
            .map(|s| s.position)
            .ok_or_else(|| {
                Error::RpcError(format!(
                    "tablet {} reported no replication status",
                    tablet.alias
                ))
            })?;
        Ok(ReplicationStatus { position })
    }

    async fn execute_fetch_as_dba(&self, tablet: &Tablet, query: &str) -> Result<()> {
        self.run_command(&[
            "ExecuteFetchAsDba".to_string(),
            "--max_rows=0".to_string(),
            "--disable_binlogs=false".to_string(),
            "--reload_schema=false".to_string(),
            tablet.alias_string(),
            query.to_string(),
        ])
        .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(keyspace = %request.keyspace, shard = %request.shard))]
    async fn planned_reparent_shard(&self, request: &PlannedReparentRequest) -> Result<()> {
        let mut args = vec![
            "PlannedReparentShard".to_string(),
            format!("--keyspace_shard={}/{}", request.keyspace, request.shard),
            format!("--new_primary={}", request.new_primary),
            format!(
                "--wait_replicas_timeout={}s",
                request.wait_replicas_timeout.as_secs()
            ),
            format!(
                "--tolerable_replication_lag={}s",
                request.tolerable_replication_lag.as_secs()
            ),
        ];
        if let Some(avoid) = &request.avoid_primary {
            args.push(format!("--avoid_tablet={}", avoid));
        }
        self.run_command(&args).await?;
        Ok(())
    }

    async fn tablet_externally_reparented(&self, new_primary: &TabletAlias) -> Result<()> {
        self.run_command(&[
            "TabletExternallyReparented".to_string(),
            new_primary.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn change_tablet_type(
        &self,
        alias: &TabletAlias,
        tablet_type: TabletType,
    ) -> Result<()> {
        self.run_command(&[
            "ChangeTabletType".to_string(),
            alias.to_string(),
            tablet_type.as_str().to_ascii_lowercase(),
        ])
        .await?;
        Ok(())
    }
}
