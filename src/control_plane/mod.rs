pub mod auth;
pub mod client;

pub use auth::{AgentKey, Authenticator, Credentials, MtlsMaterial, RotationState, UserApiKey};
pub use client::{ControlPlaneClient, MetricsPusher, OnuPusher, TelemetryPusher};
