//! Thermostat device operations
//!
//! Status reads go through the cache; settings writes go straight to the API
//! and the status the API answers with is written through to the cache, so
//! the next read reflects the write without another request.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::cache::StatusCache;
use crate::error::{ClientError, Result};
use crate::executor::{RequestExecutor, RequestSpec};

/// Entry in the account's device list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub device_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Current state of one thermostat.
///
/// Fields the client does not model are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub device_id: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub current_temperature: Option<f64>,
    #[serde(default)]
    pub current_humidity: Option<f64>,
    #[serde(default)]
    pub heat_setpoint: Option<f64>,
    #[serde(default)]
    pub cool_setpoint: Option<f64>,
    #[serde(default)]
    pub fan_mode: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Partial settings update. Only fields that are set are sent.
///
/// Heat and cool setpoints are submitted as given; the API enforces any
/// deadband between them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heat_setpoint: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cool_setpoint: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan_mode: Option<String>,
}

pub struct DeviceClient {
    executor: RequestExecutor,
    cache: StatusCache<DeviceStatus>,
}

impl DeviceClient {
    pub fn new(executor: RequestExecutor, cache_ttl: Duration) -> Self {
        Self {
            executor,
            cache: StatusCache::new(cache_ttl),
        }
    }

    pub fn cache(&self) -> &StatusCache<DeviceStatus> {
        &self.cache
    }

    /// All devices on the account (uncached).
    pub async fn list_devices(&self) -> Result<Vec<DeviceSummary>> {
        let devices: Vec<DeviceSummary> = self.executor.request(&RequestSpec::get(&["devices"])).await?;
        debug!(count = devices.len(), "listed devices");
        Ok(devices)
    }

    /// Device status, served from the cache while fresh.
    pub async fn status(&self, device_id: &str) -> Result<DeviceStatus> {
        let spec = RequestSpec::get(&["devices", device_id, "status"]);
        self.cache
            .get_or_fetch(device_id, || self.executor.request::<DeviceStatus>(&spec))
            .await
    }

    /// Apply settings and write the resulting status through to the cache.
    pub async fn update_settings(&self, device_id: &str, settings: &DeviceSettings) -> Result<DeviceStatus> {
        let body = serde_json::to_value(settings)
            .map_err(|e| ClientError::Decode(format!("encoding settings: {e}")))?;
        let spec = RequestSpec::put(&["devices", device_id, "settings"], body);

        let status: DeviceStatus = self.executor.request(&spec).await?;
        self.cache.put(device_id, status.clone()).await;
        info!(device_id, mode = ?status.mode, "device settings updated");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use axum::Json;
    use axum::extract::{Path, State};
    use axum::routing::{get, put};
    use reqwest::Url;

    use crate::test_support::StaticToken;

    #[derive(Default)]
    struct Hits {
        list: AtomicU64,
        status: AtomicU64,
        settings: AtomicU64,
    }

    fn envelope(body: Value) -> Json<Value> {
        Json(serde_json::json!({"errorNumber": 0, "errorMessage": null, "body": body}))
    }

    async fn device_api() -> (Url, Arc<Hits>) {
        let hits = Arc::new(Hits::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = axum::Router::new()
            .route(
                "/v1/devices",
                get(|State(hits): State<Arc<Hits>>| async move {
                    hits.list.fetch_add(1, Ordering::SeqCst);
                    envelope(serde_json::json!([
                        {"deviceId": "d1", "name": "Hallway", "model": "TL-400"},
                        {"deviceId": "d2"}
                    ]))
                }),
            )
            .route(
                "/v1/devices/{id}/status",
                get(|State(hits): State<Arc<Hits>>, Path(id): Path<String>| async move {
                    hits.status.fetch_add(1, Ordering::SeqCst);
                    envelope(serde_json::json!({
                        "deviceId": id,
                        "online": true,
                        "mode": "heat",
                        "currentTemperature": 20.5,
                        "heatSetpoint": 21.0,
                        "firmware": "4.2.1"
                    }))
                }),
            )
            .route(
                "/v1/devices/{id}/settings",
                put(
                    |State(hits): State<Arc<Hits>>, Path(id): Path<String>, Json(settings): Json<Value>| async move {
                        hits.settings.fetch_add(1, Ordering::SeqCst);
                        envelope(serde_json::json!({
                            "deviceId": id,
                            "online": true,
                            "mode": settings["mode"],
                            "heatSetpoint": settings["heatSetpoint"],
                            "coolSetpoint": settings["coolSetpoint"]
                        }))
                    },
                ),
            )
            .with_state(hits.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (Url::parse(&format!("http://{addr}/v1/")).unwrap(), hits)
    }

    fn client(base_url: Url) -> DeviceClient {
        let executor = RequestExecutor::new(reqwest::Client::new(), base_url, Arc::new(StaticToken::ok("tok"))).unwrap();
        DeviceClient::new(executor, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn list_devices_decodes_summaries() {
        let (base, hits) = device_api().await;
        let devices = client(base).list_devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].device_id, "d1");
        assert_eq!(devices[0].name.as_deref(), Some("Hallway"));
        assert_eq!(devices[1].model, None);
        assert_eq!(hits.list.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn status_is_cached_and_keeps_unknown_fields() {
        let (base, hits) = device_api().await;
        let client = client(base);

        let first = client.status("d1").await.unwrap();
        let second = client.status("d1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.current_temperature, Some(20.5));
        assert_eq!(first.extra.get("firmware"), Some(&Value::from("4.2.1")));
        assert_eq!(hits.status.load(Ordering::SeqCst), 1);

        client.status("d2").await.unwrap();
        assert_eq!(hits.status.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn update_settings_writes_through_to_cache() {
        let (base, hits) = device_api().await;
        let client = client(base);
        client.status("d1").await.unwrap();

        let settings = DeviceSettings {
            mode: Some("auto".into()),
            heat_setpoint: Some(20.0),
            cool_setpoint: Some(20.5),
            ..DeviceSettings::default()
        };
        let updated = client.update_settings("d1", &settings).await.unwrap();
        assert_eq!(updated.mode.as_deref(), Some("auto"));
        // Narrow deadband is passed through untouched
        assert_eq!(updated.cool_setpoint, Some(20.5));

        let read = client.status("d1").await.unwrap();
        assert_eq!(read, updated);
        assert_eq!(hits.status.load(Ordering::SeqCst), 1);
        assert_eq!(hits.settings.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn settings_serialize_only_present_fields() {
        let settings = DeviceSettings {
            heat_setpoint: Some(19.5),
            ..DeviceSettings::default()
        };
        assert_eq!(
            serde_json::to_value(&settings).unwrap(),
            serde_json::json!({"heatSetpoint": 19.5})
        );
    }
}
