//! Request/response client for the non-realtime endpoints: health, device
//! info, event history and the movement/obstacle helpers.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use shared::domain::DeviceId;
use tracing::{debug, warn};

use crate::error::ApiError;

pub const DEFAULT_EVENT_LIMIT: u32 = 50;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub device_id: Option<i64>,
    pub device_name: Option<String>,
    pub client_ip: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeviceResponse {
    pub success: bool,
    pub device: Option<DeviceInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DevicesResponse {
    pub success: bool,
    pub devices: Vec<DeviceInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeviceEvent {
    pub event_ts: Option<String>,
    pub status_clave: Option<String>,
    pub status_description: Option<String>,
    /// JSON text as stored by the server.
    pub meta: Option<String>,
}

impl DeviceEvent {
    pub fn label(&self) -> &str {
        self.status_description
            .as_deref()
            .or(self.status_clave.as_deref())
            .unwrap_or("-")
    }

    /// `duration_ms` from the event metadata, if the metadata parses and
    /// carries one.
    pub fn duration_ms(&self) -> Option<u64> {
        let meta: Value = serde_json::from_str(self.meta.as_deref()?).ok()?;
        meta.get("duration_ms").and_then(Value::as_u64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EventsResponse {
    pub success: bool,
    pub events: Vec<DeviceEvent>,
}

#[derive(Debug, Serialize)]
struct SendMovementRequest<'a> {
    device_id: DeviceId,
    command: &'a str,
    duration_ms: u64,
    meta: &'a Value,
}

#[derive(Debug, Serialize)]
struct SimulateObstacleRequest {
    device_id: DeviceId,
    distance_cm: u32,
    timestamp: String,
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health_check(&self) -> Result<Value> {
        self.get("/api/health", &[]).await
    }

    pub async fn devices(&self) -> Result<DevicesResponse> {
        self.get("/api/devices", &[]).await
    }

    pub async fn device(&self, device_id: DeviceId) -> Result<DeviceResponse> {
        self.get(&format!("/api/devices/{device_id}"), &[]).await
    }

    pub async fn events(&self, device_id: DeviceId, limit: u32) -> Result<EventsResponse> {
        self.get(
            &format!("/api/events/{device_id}"),
            &[("limit", limit.to_string())],
        )
        .await
    }

    pub async fn operational_status(&self) -> Result<Value> {
        self.get("/api/status/operational", &[]).await
    }

    pub async fn last_movement(&self, device_id: DeviceId) -> Result<Value> {
        self.get(&format!("/api/movements/last/{device_id}"), &[])
            .await
    }

    pub async fn last_obstacle(&self, device_id: DeviceId) -> Result<Value> {
        self.get(&format!("/api/obstacles/last/{device_id}"), &[])
            .await
    }

    /// Records a movement through the REST path rather than the channel.
    pub async fn send_movement(
        &self,
        device_id: DeviceId,
        command: &str,
        duration_ms: u64,
        meta: &Value,
    ) -> Result<Value> {
        self.post(
            "/api/movements/send",
            &SendMovementRequest {
                device_id,
                command,
                duration_ms,
                meta,
            },
        )
        .await
    }

    pub async fn simulate_obstacle(&self, device_id: DeviceId, distance_cm: u32) -> Result<Value> {
        self.post(
            "/api/simulate/obstacle",
            &SimulateObstacleRequest {
                device_id,
                distance_cm,
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            },
        )
        .await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "api: GET");
        let response = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;
        decode(response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "api: POST");
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let err = ApiError::Status {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("unknown").to_string(),
        };
        warn!(url = %response.url(), %err, "api: request rejected");
        return Err(err.into());
    }
    response
        .json()
        .await
        .context("failed to decode api response")
}

/// Distance reported by the obstacle simulator, 5 to 34 cm.
pub fn random_obstacle_distance() -> u32 {
    rand::thread_rng().gen_range(5..35)
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
