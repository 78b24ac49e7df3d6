use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use reqwest::{header::CONTENT_TYPE, Client};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use shared_config::{AppConfig, VitalsSourceKind};

use crate::error::VitalsFetchError;
use crate::models::{BloodPressure, VitalsSnapshot};

/// Produces a vitals snapshot for a user. Implementations report only the
/// vitals they actually have.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VitalsSource: Send + Sync {
    async fn fetch_health_data(&self, user_id: &str) -> Result<VitalsSnapshot, VitalsFetchError>;
}

pub fn vitals_source_from_config(config: &AppConfig) -> Arc<dyn VitalsSource> {
    match config.vitals_source {
        VitalsSourceKind::Simulated => {
            info!("Using simulated vitals source");
            Arc::new(SimulatedVitalsSource)
        }
        VitalsSourceKind::Wearable if config.is_wearable_configured() => {
            info!("Using wearable vitals source at {}", config.wearable_api_url);
            Arc::new(WearableVitalsSource::new(config))
        }
        VitalsSourceKind::Wearable => {
            warn!("WEARABLE_API_URL is empty, falling back to simulated vitals");
            Arc::new(SimulatedVitalsSource)
        }
    }
}

// =====================================================================================
// SIMULATED SOURCE
// =====================================================================================

/// Random but plausible resting vitals.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedVitalsSource;

#[async_trait]
impl VitalsSource for SimulatedVitalsSource {
    async fn fetch_health_data(&self, user_id: &str) -> Result<VitalsSnapshot, VitalsFetchError> {
        let mut rng = rand::thread_rng();

        let snapshot = VitalsSnapshot {
            heart_rate: Some(rng.gen_range(60..100) as f64),
            blood_pressure: Some(BloodPressure {
                systolic: rng.gen_range(110..140) as f64,
                diastolic: rng.gen_range(70..90) as f64,
            }),
            temperature: Some(36.5 + rng.gen_range(0.0..0.5)),
            oxygen_saturation: Some(rng.gen_range(95..100) as f64),
        };

        debug!("Simulated vitals for user {}: {:?}", user_id, snapshot);
        Ok(snapshot)
    }
}

// =====================================================================================
// WEARABLE API SOURCE
// =====================================================================================

#[derive(Debug, Deserialize)]
struct HealthDataSummary {
    #[serde(default)]
    heart_rate: Option<HeartRateSummary>,
    #[serde(default)]
    blood_oxygen: Option<BloodOxygenSummary>,
}

#[derive(Debug, Deserialize)]
struct HeartRateSummary {
    average_hr: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct BloodOxygenSummary {
    average: Option<f64>,
}

impl From<HealthDataSummary> for VitalsSnapshot {
    // The summary endpoint carries no blood pressure or temperature.
    fn from(summary: HealthDataSummary) -> Self {
        VitalsSnapshot {
            heart_rate: summary.heart_rate.and_then(|hr| hr.average_hr),
            blood_pressure: None,
            temperature: None,
            oxygen_saturation: summary.blood_oxygen.and_then(|o2| o2.average),
        }
    }
}

pub struct WearableVitalsSource {
    client: Client,
    base_url: String,
}

impl WearableVitalsSource {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.wearable_api_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl VitalsSource for WearableVitalsSource {
    async fn fetch_health_data(&self, user_id: &str) -> Result<VitalsSnapshot, VitalsFetchError> {
        let url = format!("{}/wearable/summary/{}", self.base_url, user_id);
        debug!("Fetching wearable summary from {}", url);

        let response = self
            .client
            .get(&url)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Wearable API error ({}): {}", status, body);
            return Err(VitalsFetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let summary = response
            .json::<HealthDataSummary>()
            .await
            .map_err(|e| VitalsFetchError::Decode(e.to_string()))?;

        Ok(summary.into())
    }
}
