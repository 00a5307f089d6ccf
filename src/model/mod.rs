pub mod ids;
pub mod metrics;
pub mod olt_config;
pub mod olt_state;
pub mod onu;
pub mod telemetry;

pub use ids::{NodeId, OltId};
pub use metrics::{BufferedBatch, MetricSample};
pub use olt_config::{OltConfig, OltProtocols, PollingPolicy, ProtocolKind};
pub use olt_state::{OltState, PollJob, PollResult};
pub use onu::{OnuData, OnuStatus, RawOnuSignal};
pub use telemetry::TelemetryData;
