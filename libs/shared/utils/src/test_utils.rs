use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use shared_config::{AppConfig, VitalsSourceKind};
use shared_models::auth::User;

pub struct TestConfig {
    pub jwt_secret: String,
    pub wearable_api_url: String,
    pub vitals_source: VitalsSourceKind,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "test-secret-key-for-jwt-validation-must-be-long-enough".to_string(),
            wearable_api_url: "http://localhost:8000".to_string(),
            vitals_source: VitalsSourceKind::Simulated,
        }
    }
}

impl TestConfig {
    pub fn wearable(api_url: &str) -> Self {
        Self {
            wearable_api_url: api_url.to_string(),
            vitals_source: VitalsSourceKind::Wearable,
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_jwt_secret: self.jwt_secret.clone(),
            vitals_source: self.vitals_source,
            wearable_api_url: self.wearable_api_url.clone(),
            vitals_fetch_timeout_seconds: 2,
            ..AppConfig::default()
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "patient".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn doctor(email: &str) -> Self {
        Self::new(email, "doctor")
    }

    pub fn patient(email: &str) -> Self {
        Self::new(email, "patient")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": user.role,
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }
}

/// Canned payloads of the wearable integration API.
pub struct MockWearableResponses;

impl MockWearableResponses {
    pub fn summary_response(user_id: &str, average_hr: f64, average_spo2: f64) -> serde_json::Value {
        json!({
            "user_id": user_id,
            "period": "day",
            "start_date": "2024-04-01",
            "end_date": "2024-04-01",
            "heart_rate": {
                "average_hr": average_hr,
                "resting_hr": 62,
                "max_hr": 142,
                "min_hr": 55
            },
            "activity": {
                "total_steps": 8540,
                "total_calories": 420
            },
            "sleep": {},
            "blood_oxygen": {
                "average": average_spo2,
                "min": 95
            }
        })
    }

    pub fn sparse_summary_response(user_id: &str) -> serde_json::Value {
        json!({
            "user_id": user_id,
            "period": "day",
            "heart_rate": {},
            "blood_oxygen": {}
        })
    }
}
