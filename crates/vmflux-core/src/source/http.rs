//! HTTP implementation of the Metrics Source.
//!
//! Speaks a small JSON API:
//! - `POST /api/session` with Basic credentials -> session token
//! - `GET  /api/inventory` -> entity catalog
//! - `POST /api/perf/query` -> point samples
//!
//! All requests carry explicit connect/request timeouts; the client is
//! blocking throughout.

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Inventory, InventoryEntity, InventoryVolume, MetricsSource, SourceError};
use crate::models::{EntityKind, EntityRef, MetricSample, SampleValue, StorageClass};

/// Session token header, sent on every request after login.
const SESSION_HEADER: &str = "x-api-session";

/// Timeouts applied to every source request.
#[derive(Debug, Clone, Copy)]
pub struct SourceTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for SourceTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            request: Duration::from_secs(60),
        }
    }
}

#[derive(Deserialize)]
struct SessionResponse {
    token: String,
}

#[derive(Deserialize)]
struct EntityDto {
    id: String,
    name: String,
    kind: String,
    connected: bool,
}

#[derive(Deserialize)]
struct VolumeDto {
    id: String,
    name: String,
    class: String,
}

#[derive(Deserialize)]
struct InventoryResponse {
    entities: Vec<EntityDto>,
    volumes: Vec<VolumeDto>,
    #[serde(default)]
    residency: HashMap<String, Vec<String>>,
}

#[derive(Serialize)]
struct PerfQuery<'a> {
    entities: Vec<&'a str>,
    metrics: &'a [String],
    /// 1 selects "most recent single sample" mode.
    max_samples: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    window_secs: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ValueDto {
    Num(f64),
    Text(String),
}

#[derive(Deserialize)]
struct SampleDto {
    entity: String,
    metric: String,
    value: ValueDto,
    unit: String,
    /// Absent for classes the source reports no interval for.
    interval_secs: Option<i64>,
    #[serde(default)]
    instance: String,
    timestamp: DateTime<Utc>,
}

/// Blocking JSON-over-HTTP Metrics Source client.
pub struct HttpSource {
    base_url: String,
    client: reqwest::blocking::Client,
    session: String,
}

impl HttpSource {
    /// Connects to the source and establishes a session.
    ///
    /// Authentication or connectivity failure here is fatal for the run.
    pub fn connect(
        base_url: impl Into<String>,
        user: &str,
        password: &str,
        timeouts: SourceTimeouts,
    ) -> Result<Self, SourceError> {
        let base_url = base_url.into();
        let base_url = base_url.trim_end_matches('/').to_string();

        let client = reqwest::blocking::Client::builder()
            .connect_timeout(timeouts.connect)
            .timeout(timeouts.request)
            .build()
            .map_err(|e| SourceError::Connection(e.to_string()))?;

        let basic = STANDARD.encode(format!("{}:{}", user, password));
        let response = client
            .post(format!("{}/api/session", base_url))
            .header("authorization", format!("Basic {}", basic))
            .send()
            .map_err(|e| SourceError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Session(format!(
                "login rejected with status {}",
                status
            )));
        }

        let session: SessionResponse = response
            .json()
            .map_err(|e| SourceError::Session(e.to_string()))?;

        info!("source session established with {}", base_url);
        Ok(Self {
            base_url,
            client,
            session: session.token,
        })
    }

    fn parse_kind(kind: &str) -> Option<EntityKind> {
        match kind {
            "host" => Some(EntityKind::Host),
            "vm" => Some(EntityKind::Vm),
            _ => None,
        }
    }

    fn parse_class(class: &str) -> Option<StorageClass> {
        match class {
            "block" => Some(StorageClass::Block),
            "nfs" => Some(StorageClass::NetworkAttached),
            "vsan" => Some(StorageClass::Distributed),
            _ => None,
        }
    }

    fn query(
        &self,
        entities: &[EntityRef],
        metric_ids: &[String],
        window_secs: Option<u64>,
        nominal_interval_secs: i64,
    ) -> Result<Vec<MetricSample>, SourceError> {
        let body = PerfQuery {
            entities: entities.iter().map(|e| e.id.as_str()).collect(),
            metrics: metric_ids,
            max_samples: 1,
            window_secs,
        };

        let response = self
            .client
            .post(format!("{}/api/perf/query", self.base_url))
            .header(SESSION_HEADER, &self.session)
            .json(&body)
            .send()
            .map_err(|e| SourceError::Query(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Query(format!(
                "perf query rejected with status {}",
                status
            )));
        }

        let dtos: Vec<SampleDto> = response
            .json()
            .map_err(|e| SourceError::Query(e.to_string()))?;

        debug!(
            samples = dtos.len(),
            entities = entities.len(),
            "perf query returned"
        );

        Ok(dtos
            .into_iter()
            .map(|dto| MetricSample {
                entity_id: dto.entity,
                metric_id: dto.metric,
                value: match dto.value {
                    ValueDto::Num(n) => SampleValue::Num(n),
                    ValueDto::Text(s) => SampleValue::Text(s),
                },
                unit: dto.unit,
                interval_secs: dto.interval_secs.unwrap_or(nominal_interval_secs),
                instance: dto.instance,
                captured_at: dto.timestamp,
            })
            .collect())
    }
}

impl MetricsSource for HttpSource {
    fn inventory(&self) -> Result<Inventory, SourceError> {
        let response = self
            .client
            .get(format!("{}/api/inventory", self.base_url))
            .header(SESSION_HEADER, &self.session)
            .send()
            .map_err(|e| SourceError::Enumeration(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Enumeration(format!(
                "inventory rejected with status {}",
                status
            )));
        }

        let dto: InventoryResponse = response
            .json()
            .map_err(|e| SourceError::Enumeration(e.to_string()))?;

        // Rows with an unknown kind/class come from API versions newer than
        // this client; skip them rather than failing the whole catalog.
        let entities = dto
            .entities
            .into_iter()
            .filter_map(|e| {
                Self::parse_kind(&e.kind).map(|kind| InventoryEntity {
                    id: e.id,
                    name: e.name,
                    kind,
                    connected: e.connected,
                })
            })
            .collect();

        let volumes = dto
            .volumes
            .into_iter()
            .filter_map(|v| {
                Self::parse_class(&v.class).map(|class| InventoryVolume {
                    id: v.id,
                    name: v.name,
                    class,
                })
            })
            .collect();

        Ok(Inventory {
            entities,
            volumes,
            residency: dto.residency,
        })
    }

    fn query_latest(
        &self,
        entities: &[EntityRef],
        metric_ids: &[String],
    ) -> Result<Vec<MetricSample>, SourceError> {
        self.query(entities, metric_ids, None, 0)
    }

    fn query_window(
        &self,
        entities: &[EntityRef],
        metric_ids: &[String],
        window: Duration,
        nominal_interval_secs: i64,
    ) -> Result<Vec<MetricSample>, SourceError> {
        self.query(
            entities,
            metric_ids,
            Some(window.as_secs()),
            nominal_interval_secs,
        )
    }
}
