//! The control-plane client (component B): typed JSON request/response over
//! HTTPS, with selectable transport credentials and rotation awareness.
//! Only the request/response contracts are in scope here — the HTTP
//! transport itself is a thin `ureq`-backed implementation, in the style of
//! the teacher's `HttpClientUreq`.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::control_plane::auth::{AgentKey, Authenticator, Credentials, MtlsMaterial, RotationState};
use crate::error::ControlPlaneError;
use crate::model::{MetricSample, NodeId, OltConfig, OltId, OnuData, TelemetryData};

const ROTATE_KEY_HEADER: &str = "X-Rotate-Key";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct HeartbeatRequest {
    pub node_id: String,
    pub timestamp: i64,
    pub vpp_status: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct HeartbeatResponse {
    pub acknowledged: bool,
    pub message: String,
    #[serde(default)]
    pub config_update_hint: bool,
    #[serde(default)]
    pub rotation_required: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct OltConfigResponse {
    pub version: u64,
    pub olts: Vec<OltConfig>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PushOnusResponse {
    pub success: bool,
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
    pub online_count: u32,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PushAckResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct PushMetricsResponse {
    pub success: bool,
    pub count: u32,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct RotateKeyResponse {
    pub success: bool,
    pub agent_id: String,
    pub agent_api_key: String,
    pub agent_api_key_prefix: String,
    pub old_key_valid_until: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct WhoAmI {
    pub agent_id: String,
    pub org_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollVersion {
    V1,
    V2,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct EnrollRequest {
    pub node_id: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct EnrollResponse {
    pub cert_pem: String,
    pub key_pem: String,
    pub ca_pem: String,
    #[serde(default)]
    pub agent_api_key: Option<String>,
    #[serde(default)]
    pub agent_api_key_prefix: Option<String>,
}

fn onu_endpoint(base: &Url, olt_id: &OltId) -> Result<Url, ControlPlaneError> {
    base.join(&format!("onus/{olt_id}"))
        .map_err(|e| ControlPlaneError::Unreachable(e.to_string()))
}

/// Pusher interfaces (§9 design note): the core only depends on these, so
/// any transport (this client, a mock, a future gRPC implementation) can
/// satisfy the result processor.
pub trait OnuPusher {
    fn push_onus(&self, olt_id: &OltId, onus: &[OnuData]) -> Result<PushOnusResponse, ControlPlaneError>;
}

pub trait TelemetryPusher {
    fn push_telemetry(&self, olt_id: &OltId, telemetry: &TelemetryData) -> Result<PushAckResponse, ControlPlaneError>;
}

pub trait MetricsPusher {
    fn push_metrics(&self, batch: &[MetricSample]) -> Result<PushMetricsResponse, ControlPlaneError>;
}

pub struct ControlPlaneClient {
    agent: ureq::Agent,
    base_url: Url,
    rotation: Arc<RotationState>,
    timeout: Duration,
}

impl ControlPlaneClient {
    pub fn new(base_url: Url, credentials: &Credentials, mtls_cert_exists: impl Fn(&MtlsMaterial) -> bool) -> Result<Self, ControlPlaneError> {
        let authenticator = Authenticator::select(credentials, mtls_cert_exists)
            .ok_or(ControlPlaneError::NoAuthConfigured)?;
        let agent = ureq::AgentBuilder::new().timeout(DEFAULT_TIMEOUT).build();
        Ok(Self {
            agent,
            base_url,
            rotation: Arc::new(RotationState::new(authenticator)),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn rotation_state(&self) -> Arc<RotationState> {
        Arc::clone(&self.rotation)
    }

    fn authed_request(&self, method: &str, url: &Url) -> ureq::Request {
        let mut req = self
            .agent
            .request(method, url.as_str())
            .timeout(self.timeout);
        if let Some(bearer) = self.rotation.current().bearer_header() {
            req = req.set("Authorization", &bearer);
        }
        req
    }

    fn handle_response(&self, response: Result<ureq::Response, ureq::Error>) -> Result<ureq::Response, ControlPlaneError> {
        match response {
            Ok(resp) => {
                if resp.header(ROTATE_KEY_HEADER) == Some("1") {
                    debug!("control plane signaled key rotation");
                    self.rotation.mark_rotation_needed();
                }
                Ok(resp)
            }
            Err(ureq::Error::Status(401, resp)) | Err(ureq::Error::Status(403, resp)) => {
                if resp.header(ROTATE_KEY_HEADER) == Some("1") {
                    self.rotation.mark_rotation_needed();
                    return Err(ControlPlaneError::RotationRequired);
                }
                Err(ControlPlaneError::Unauthenticated)
            }
            Err(e @ ureq::Error::Status(_, _)) => Err(ControlPlaneError::Transport(Box::new(e))),
            Err(e @ ureq::Error::Transport(_)) => Err(ControlPlaneError::Unreachable(e.to_string())),
        }
    }

    pub fn check_health(&self) -> Result<(), ControlPlaneError> {
        let url = self
            .base_url
            .join("health")
            .map_err(|e| ControlPlaneError::Unreachable(e.to_string()))?;
        self.handle_response(self.authed_request("GET", &url).call())?;
        Ok(())
    }

    pub fn enroll(&self, version: EnrollVersion, req: &EnrollRequest) -> Result<EnrollResponse, ControlPlaneError> {
        let path = match version {
            EnrollVersion::V1 => "enroll",
            EnrollVersion::V2 => "v2/enroll",
        };
        let url = self
            .base_url
            .join(path)
            .map_err(|e| ControlPlaneError::Unreachable(e.to_string()))?;
        let resp = self.handle_response(self.authed_request("POST", &url).send_json(serde_json::to_value(req)?))?;
        Ok(resp.into_json()?)
    }

    pub fn heartbeat(&self, req: &HeartbeatRequest) -> Result<HeartbeatResponse, ControlPlaneError> {
        let url = self
            .base_url
            .join("heartbeat")
            .map_err(|e| ControlPlaneError::Unreachable(e.to_string()))?;
        let resp = self.handle_response(self.authed_request("POST", &url).send_json(serde_json::to_value(req)?))?;
        let body: HeartbeatResponse = resp.into_json()?;
        if body.rotation_required {
            self.rotation.mark_rotation_needed();
        }
        Ok(body)
    }

    pub fn get_olt_config(&self, node_id: &NodeId) -> Result<OltConfigResponse, ControlPlaneError> {
        let url = self
            .base_url
            .join(&format!("config/{node_id}"))
            .map_err(|e| ControlPlaneError::Unreachable(e.to_string()))?;
        let resp = self.handle_response(self.authed_request("GET", &url).call())?;
        Ok(resp.into_json()?)
    }

    pub fn rotate_agent_key(&self) -> Result<RotateKeyResponse, ControlPlaneError> {
        let url = self
            .base_url
            .join("agents/rotate-key")
            .map_err(|e| ControlPlaneError::Unreachable(e.to_string()))?;
        let resp = self.handle_response(self.authed_request("POST", &url).call())?;
        let body: RotateKeyResponse = resp.into_json()?;
        if body.success {
            self.rotation.apply_rotation(AgentKey {
                key: body.agent_api_key.clone(),
                prefix: body.agent_api_key_prefix.clone(),
            });
        }
        Ok(body)
    }

    pub fn validate_api_key(&self) -> Result<WhoAmI, ControlPlaneError> {
        let url = self
            .base_url
            .join("whoami")
            .map_err(|e| ControlPlaneError::Unreachable(e.to_string()))?;
        let resp = self.handle_response(self.authed_request("GET", &url).call())?;
        Ok(resp.into_json()?)
    }
}

impl OnuPusher for ControlPlaneClient {
    fn push_onus(&self, olt_id: &OltId, onus: &[OnuData]) -> Result<PushOnusResponse, ControlPlaneError> {
        let url = onu_endpoint(&self.base_url, olt_id)?;
        #[derive(Serialize)]
        struct Body<'a> {
            onus: &'a [OnuData],
        }
        let resp = self.handle_response(
            self.authed_request("POST", &url)
                .send_json(serde_json::to_value(Body { onus })?),
        )?;
        Ok(resp.into_json()?)
    }
}

impl TelemetryPusher for ControlPlaneClient {
    fn push_telemetry(&self, olt_id: &OltId, telemetry: &TelemetryData) -> Result<PushAckResponse, ControlPlaneError> {
        let url = self
            .base_url
            .join(&format!("telemetry/{olt_id}"))
            .map_err(|e| ControlPlaneError::Unreachable(e.to_string()))?;
        let resp = self.handle_response(
            self.authed_request("POST", &url)
                .send_json(serde_json::to_value(telemetry)?),
        )?;
        Ok(resp.into_json()?)
    }
}

impl MetricsPusher for ControlPlaneClient {
    fn push_metrics(&self, batch: &[MetricSample]) -> Result<PushMetricsResponse, ControlPlaneError> {
        let url = self
            .base_url
            .join("metrics")
            .map_err(|e| ControlPlaneError::Unreachable(e.to_string()))?;
        #[derive(Serialize)]
        struct Body<'a> {
            metrics: &'a [MetricSample],
        }
        let resp = self.handle_response(
            self.authed_request("POST", &url)
                .send_json(serde_json::to_value(Body { metrics: batch })?),
        )?;
        Ok(resp.into_json()?)
    }
}

/// Rotation's grace period, returned alongside the new key: the old key
/// remains accepted by the server until this timestamp.
pub fn rotation_grace_from(response: &RotateKeyResponse) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(response.old_key_valid_until.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::auth::AgentKey;
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;

    fn client_with_key(base: &Url, key: &str, prefix: &str) -> ControlPlaneClient {
        let credentials = Credentials {
            agent_key: Some(AgentKey {
                key: key.into(),
                prefix: prefix.into(),
            }),
            mtls: None,
            user_key: None,
        };
        ControlPlaneClient::new(base.clone(), &credentials, |_| false).unwrap()
    }

    #[test]
    fn enroll_parses_response() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v2/enroll");
            then.status(200).json_body(serde_json::json!({
                "cert_pem": "CERT", "key_pem": "KEY", "ca_pem": "CA"
            }));
        });
        let base = Url::parse(&server.base_url()).unwrap();
        let client = client_with_key(&base, "k", "nrak_p");
        let req = EnrollRequest {
            node_id: "node-1".into(),
            labels: HashMap::new(),
        };
        let resp = client.enroll(EnrollVersion::V2, &req).unwrap();
        assert_eq!(resp.cert_pem, "CERT");
        mock.assert();
    }

    #[test]
    fn heartbeat_response_flagging_rotation_sets_rotation_state() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/heartbeat");
            then.status(200).json_body(serde_json::json!({
                "acknowledged": true, "message": "ok", "rotation_required": true
            }));
        });
        let base = Url::parse(&server.base_url()).unwrap();
        let client = client_with_key(&base, "k", "nrak_p");
        let req = HeartbeatRequest {
            node_id: "n".into(),
            timestamp: 0,
            vpp_status: "running".into(),
        };
        client.heartbeat(&req).unwrap();
        assert!(client.rotation_state().needs_rotation());
    }

    #[test]
    fn x_rotate_key_response_header_marks_rotation_needed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/whoami");
            then.status(200).header("X-Rotate-Key", "1").json_body(serde_json::json!({
                "agent_id": "a", "org_id": "o"
            }));
        });
        let base = Url::parse(&server.base_url()).unwrap();
        let client = client_with_key(&base, "k", "nrak_p");
        client.validate_api_key().unwrap();
        assert!(client.rotation_state().needs_rotation());
    }

    /// End-to-end scenario: a heartbeat signals rotation, then `RotateAgentKey`
    /// atomically swaps the bearer header from the old prefix to the new one.
    #[test]
    fn rotation_scenario_bearer_header_changes_atomically_after_rotate() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/heartbeat");
            then.status(200).json_body(serde_json::json!({
                "acknowledged": true, "message": "ok", "rotation_required": true
            }));
        });
        server.mock(|when, then| {
            when.method(POST).path("/agents/rotate-key");
            then.status(200).json_body(serde_json::json!({
                "success": true,
                "agent_id": "a",
                "agent_api_key": "new-key",
                "agent_api_key_prefix": "nrak_new",
                "old_key_valid_until": 0
            }));
        });
        let base = Url::parse(&server.base_url()).unwrap();
        let client = client_with_key(&base, "old-key", "nrak_old");

        let before = client.rotation_state().current().bearer_header().unwrap();
        assert!(before.contains("old-key"));

        let req = HeartbeatRequest {
            node_id: "n".into(),
            timestamp: 0,
            vpp_status: "running".into(),
        };
        client.heartbeat(&req).unwrap();
        assert!(client.rotation_state().needs_rotation());

        client.rotate_agent_key().unwrap();
        assert!(!client.rotation_state().needs_rotation());

        let after = client.rotation_state().current().bearer_header().unwrap();
        assert!(after.contains("new-key"));
    }
}
