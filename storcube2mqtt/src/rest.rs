use std::time::Duration;

use log::debug;
use reqwest::blocking::{Client, Response};
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::Command;
use crate::error::{AuthError, CommandError};

pub static DEFAULT_LOGIN_URL: &str = "http://baterway.com/api/user/app/login";
pub static DEFAULT_SET_POWER_URL: &str = "http://baterway.com/api/slb/equip/set/power";
pub static DEFAULT_SET_THRESHOLD_URL: &str = "http://baterway.com/api/scene/threshold/set";
pub static DEFAULT_OUTPUT_URL: &str = "http://baterway.com/api/scene/user/list/V2";
pub static DEFAULT_FIRMWARE_URL: &str = "http://baterway.com/api/equip/version/need/upgrade";

// every vendor call is bounded so a hung endpoint cannot wedge the caller
static REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Vendor account credentials, serialized verbatim as the login body.
#[derive(Clone, Debug, Serialize)]
pub struct Credentials {
    #[serde(rename = "appCode")]
    pub app_code: String,
    #[serde(rename = "loginName")]
    pub login_name: String,
    pub password: String,
}

/// Every vendor response wraps its payload in this envelope; `code` 200
/// means success regardless of the HTTP status.
#[derive(Debug, Deserialize)]
struct VendorEnvelope {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Source of session tokens. The session manager owns the retry policy;
/// implementations perform exactly one network call per invocation.
pub trait TokenSource {
    fn fetch_token(&self) -> Result<String, AuthError>;
}

/// Read side of the vendor REST API: the user's scene output settings and
/// the device firmware upgrade status, republished next to the telemetry.
/// `Ok(None)` means the vendor had nothing to say (empty `data`).
pub trait StatusSource {
    fn fetch_output(&self) -> Result<Option<Vec<u8>>, CommandError>;

    fn fetch_firmware(&self, device_id: &str) -> Result<Option<Vec<u8>>, CommandError>;
}

#[derive(Clone, Debug)]
pub struct VendorUrls {
    pub login: String,
    pub set_power: String,
    pub set_threshold: String,
    pub output: String,
    pub firmware: String,
}

impl Default for VendorUrls {
    fn default() -> Self {
        Self {
            login: DEFAULT_LOGIN_URL.to_string(),
            set_power: DEFAULT_SET_POWER_URL.to_string(),
            set_threshold: DEFAULT_SET_THRESHOLD_URL.to_string(),
            output: DEFAULT_OUTPUT_URL.to_string(),
            firmware: DEFAULT_FIRMWARE_URL.to_string(),
        }
    }
}

/// Blocking client for the vendor REST API: token login plus the two
/// control calls. No state beyond the connection pool; a fresh token is
/// fetched for every control call, mirroring the vendor app.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    credentials: Credentials,
    urls: VendorUrls,
}

impl RestClient {
    pub fn new(credentials: Credentials, urls: VendorUrls) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            credentials,
            urls,
        })
    }

    /// Forwards one MQTT command to the vendor, authenticating first.
    pub fn execute(&self, device_id: &str, command: Command) -> Result<(), CommandError> {
        let token = self.fetch_token()?;
        match command {
            Command::SetPower(watts) => self.set_power(&token, device_id, watts),
            Command::SetThreshold(percent) => self.set_threshold(&token, device_id, percent),
        }
    }

    fn set_power(&self, token: &str, device_id: &str, watts: u32) -> Result<(), CommandError> {
        debug!("set power: {watts}W for {device_id}");
        let response = self
            .http
            .get(&self.urls.set_power)
            .header("Authorization", token)
            .header("appCode", &self.credentials.app_code)
            .query(&[
                ("equipId", device_id.to_string()),
                ("power", watts.to_string()),
            ])
            .send()
            .map_err(|e| CommandError::Request(e.to_string()))?;
        Self::check_command_response(response)
    }

    fn set_threshold(&self, token: &str, device_id: &str, percent: u8) -> Result<(), CommandError> {
        debug!("set threshold: {percent}% for {device_id}");
        // the vendor spells the threshold field "reserved" and wants a string
        let body = serde_json::json!({
            "reserved": percent.to_string(),
            "equipId": device_id,
        });
        let response = self
            .http
            .post(&self.urls.set_threshold)
            .header("Authorization", token)
            .header("appCode", &self.credentials.app_code)
            .json(&body)
            .send()
            .map_err(|e| CommandError::Request(e.to_string()))?;
        Self::check_command_response(response)
    }

    fn check_command_response(response: Response) -> Result<(), CommandError> {
        Self::unwrap_envelope(response).map(|_| ())
    }

    fn extract_data(response: Response) -> Result<Option<Vec<u8>>, CommandError> {
        let data = match prune_data(Self::unwrap_envelope(response)?) {
            Some(data) => data,
            None => return Ok(None),
        };
        serde_json::to_vec(&data)
            .map(Some)
            .map_err(|e| CommandError::Request(e.to_string()))
    }

    fn unwrap_envelope(response: Response) -> Result<Option<Value>, CommandError> {
        let status = response.status();
        if !status.is_success() {
            return Err(CommandError::Status(status.as_u16()));
        }
        let envelope: VendorEnvelope = response
            .json()
            .map_err(|e| CommandError::Request(e.to_string()))?;
        if envelope.code != 200 {
            return Err(CommandError::Vendor {
                code: envelope.code,
                message: envelope.message.unwrap_or_default(),
            });
        }
        Ok(envelope.data)
    }
}

// empty payloads are skipped, not published
fn prune_data(data: Option<Value>) -> Option<Value> {
    match data {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) if map.is_empty() => None,
        Some(Value::Array(items)) if items.is_empty() => None,
        Some(data) => Some(data),
    }
}

impl StatusSource for RestClient {
    fn fetch_output(&self) -> Result<Option<Vec<u8>>, CommandError> {
        let token = self.fetch_token()?;
        debug!("fetching scene output settings");
        let response = self
            .http
            .get(&self.urls.output)
            .header("Authorization", token)
            .send()
            .map_err(|e| CommandError::Request(e.to_string()))?;
        Self::extract_data(response)
    }

    fn fetch_firmware(&self, device_id: &str) -> Result<Option<Vec<u8>>, CommandError> {
        let token = self.fetch_token()?;
        debug!("fetching firmware upgrade status for {device_id}");
        let response = self
            .http
            .get(&self.urls.firmware)
            .header("Authorization", token)
            .query(&[("equipId", device_id)])
            .send()
            .map_err(|e| CommandError::Request(e.to_string()))?;
        Self::extract_data(response)
    }
}

impl TokenSource for RestClient {
    fn fetch_token(&self) -> Result<String, AuthError> {
        debug!("requesting session token from {}", self.urls.login);
        let response = self
            .http
            .post(&self.urls.login)
            .json(&self.credentials)
            .send()
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Status(status.as_u16()));
        }

        let envelope: VendorEnvelope = response
            .json()
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        if envelope.code != 200 {
            return Err(AuthError::Vendor {
                code: envelope.code,
                message: envelope.message.unwrap_or_default(),
            });
        }

        envelope
            .data
            .as_ref()
            .and_then(|data| data.get("token"))
            .and_then(|token| token.as_str())
            .map(str::to_owned)
            .ok_or(AuthError::MissingToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_serialize_with_vendor_field_names() {
        let body = serde_json::to_value(Credentials {
            app_code: "Storcube".into(),
            login_name: "user@example.com".into(),
            password: "hunter2".into(),
        })
        .unwrap();
        assert_eq!(body["appCode"], "Storcube");
        assert_eq!(body["loginName"], "user@example.com");
        assert_eq!(body["password"], "hunter2");
    }

    #[test]
    fn envelope_tolerates_missing_message_and_data() {
        let envelope: VendorEnvelope = serde_json::from_str(r#"{"code":200}"#).unwrap();
        assert_eq!(envelope.code, 200);
        assert!(envelope.message.is_none());
        assert!(envelope.data.is_none());
    }

    #[test]
    fn empty_status_data_is_pruned() {
        assert_eq!(prune_data(None), None);
        assert_eq!(prune_data(Some(serde_json::json!(null))), None);
        assert_eq!(prune_data(Some(serde_json::json!({}))), None);
        assert_eq!(prune_data(Some(serde_json::json!([]))), None);
        assert_eq!(
            prune_data(Some(serde_json::json!({"reserved": "80"}))),
            Some(serde_json::json!({"reserved": "80"}))
        );
        assert_eq!(
            prune_data(Some(serde_json::json!([{"sceneName": "day"}]))),
            Some(serde_json::json!([{"sceneName": "day"}]))
        );
    }

    #[test]
    fn token_lives_under_data() {
        let envelope: VendorEnvelope = serde_json::from_str(
            r#"{"code":200,"message":"ok","data":{"token":"abc123","other":1}}"#,
        )
        .unwrap();
        let token = envelope
            .data
            .as_ref()
            .and_then(|data| data.get("token"))
            .and_then(|token| token.as_str());
        assert_eq!(token, Some("abc123"));
    }
}
