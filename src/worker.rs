//! The worker pool (component F): parallel job consumers. Each worker opens
//! a vendor session, lists/normalizes ONUs, optionally reads telemetry, and
//! always disconnects before submitting a result.
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender};
use tracing::{info_span, warn};

use crate::driver::{DriverCapabilities, DriverError, OltDriverExt, OnuFilter};
use crate::error::PollError;
use crate::model::{OltConfig, OltId, PollJob, PollResult, ProtocolKind};
use crate::registry::Registry;

pub const DEFAULT_WORKER_COUNT: usize = 5;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolves which protocol a worker should use for this poll, per §4.5
/// step 2: explicit primary, else first enabled in probe order, else CLI.
pub fn resolve_protocol(config: &OltConfig) -> ProtocolKind {
    config.protocols.selected_protocol()
}

/// Factory abstraction standing in for the out-of-scope vendor driver
/// instantiation (`(vendor, protocol) -> driver`).
pub trait DriverFactory: Send + Sync {
    fn build(&self, config: &OltConfig, protocol: ProtocolKind) -> Option<Box<dyn OltDriverExt>>;
}

/// No vendor drivers are implemented in this core; every job fails with
/// `unsupported_driver` until a real `DriverFactory` is wired in by whatever
/// deployment supplies vendor-specific drivers.
#[derive(Default)]
pub struct NullDriverFactory;

impl DriverFactory for NullDriverFactory {
    fn build(&self, _config: &OltConfig, _protocol: ProtocolKind) -> Option<Box<dyn OltDriverExt>> {
        None
    }
}

pub struct Worker<F: DriverFactory> {
    registry: std::sync::Arc<Registry>,
    jobs: Receiver<PollJob>,
    results: Sender<PollResult>,
    factory: std::sync::Arc<F>,
    connect_timeout: Duration,
}

impl<F: DriverFactory> Worker<F> {
    pub fn new(
        registry: std::sync::Arc<Registry>,
        jobs: Receiver<PollJob>,
        results: Sender<PollResult>,
        factory: std::sync::Arc<F>,
    ) -> Self {
        Self {
            registry,
            jobs,
            results,
            factory,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Runs until the job channel closes (shutdown). Each job is handled
    /// independently; a panic-free poll never blocks the loop beyond its
    /// own timeouts.
    pub fn run(&self) {
        while let Ok(job) = self.jobs.recv() {
            self.handle(job);
        }
    }

    fn handle(&self, job: PollJob) {
        let started = Instant::now();
        self.registry.mark_polled(&job.olt_id, started);
        let _span = info_span!("poll", olt_id = %job.olt_id).entered();

        let Some(config) = self.registry.get(&job.olt_id).map(|s| s.config) else {
            return; // dropped mid-flight; nothing to poll.
        };

        let result = self.poll_one(&job.olt_id, &config, started);
        if self.results.send(result).is_err() {
            warn!(olt_id = %job.olt_id, "result channel closed, dropping result");
        }
    }

    fn poll_one(&self, olt_id: &OltId, config: &OltConfig, started: Instant) -> PollResult {
        let protocol = resolve_protocol(config);
        let Some(driver) = self.factory.build(config, protocol) else {
            return failure(olt_id.clone(), started, PollError::UnsupportedDriver);
        };

        let mut driver = match connect_with_timeout(driver, config, self.connect_timeout) {
            Ok(driver) => driver,
            Err(e) => return failure(olt_id.clone(), started, e),
        };

        if !driver.capabilities().contains(DriverCapabilities::EXTENDED) {
            driver.disconnect();
            return failure(olt_id.clone(), started, PollError::UnsupportedDriver);
        }

        let onus = match driver.get_onu_list(None as Option<&OnuFilter>) {
            Ok(list) => list,
            Err(e) => {
                driver.disconnect();
                return failure(olt_id.clone(), started, map_driver_error(e));
            }
        };

        let telemetry = match driver.get_olt_status() {
            Ok(t) => Some(t),
            Err(e) => {
                warn!(olt_id = %olt_id, error = %e, "telemetry read failed, continuing without it");
                None
            }
        };

        driver.disconnect();

        PollResult {
            olt_id: olt_id.clone(),
            onus,
            telemetry,
            error: None,
            duration: started.elapsed(),
            timestamp: Instant::now(),
        }
    }
}

/// Bounds `driver.connect()` to `timeout` by running it on a helper thread
/// and waiting on a channel rather than trusting the call to return in time.
/// A driver whose `connect()` never returns leaves that thread running
/// forever, but the caller is unblocked at `timeout` regardless; Rust has no
/// way to preempt an arbitrary blocking call.
fn connect_with_timeout(
    mut driver: Box<dyn OltDriverExt>,
    config: &OltConfig,
    timeout: Duration,
) -> Result<Box<dyn OltDriverExt>, PollError> {
    let (tx, rx) = crossbeam::channel::bounded(1);
    let config = config.clone();
    std::thread::spawn(move || {
        let result = driver.connect(&config);
        let _ = tx.send((driver, result));
    });

    match rx.recv_timeout(timeout) {
        Ok((driver, Ok(()))) => Ok(driver),
        Ok((_, Err(e))) => Err(map_driver_error(e)),
        Err(_) => Err(PollError::ConnectTimeout(timeout)),
    }
}

fn map_driver_error(e: DriverError) -> PollError {
    match e {
        DriverError::Unsupported => PollError::UnsupportedDriver,
        DriverError::Connect(msg) | DriverError::Transport(msg) => PollError::TransientIo(msg),
        DriverError::NotFound => PollError::TransientIo("not found".into()),
    }
}

fn failure(olt_id: OltId, started: Instant, error: PollError) -> PollResult {
    PollResult {
        olt_id,
        onus: vec![],
        telemetry: None,
        error: Some(error),
        duration: started.elapsed(),
        timestamp: Instant::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::test_support::StubDriver;
    use crate::model::{OltProtocols, PollingPolicy};

    struct StubFactory;
    impl DriverFactory for StubFactory {
        fn build(&self, _config: &OltConfig, _protocol: ProtocolKind) -> Option<Box<dyn OltDriverExt>> {
            Some(Box::new(StubDriver {
                caps: DriverCapabilities::EXTENDED,
                ..Default::default()
            }))
        }
    }

    struct BasicOnlyFactory;
    impl DriverFactory for BasicOnlyFactory {
        fn build(&self, _config: &OltConfig, _protocol: ProtocolKind) -> Option<Box<dyn OltDriverExt>> {
            Some(Box::new(StubDriver::default()))
        }
    }

    struct RefusingFactory;
    impl DriverFactory for RefusingFactory {
        fn build(&self, _config: &OltConfig, _protocol: ProtocolKind) -> Option<Box<dyn OltDriverExt>> {
            None
        }
    }

    fn cfg(id: &str) -> OltConfig {
        OltConfig {
            id: OltId::new(id).unwrap(),
            name: id.into(),
            vendor: "vsol".into(),
            model: "m".into(),
            address: "10.0.0.1".into(),
            protocols: OltProtocols {
                snmp: Some(crate::model::olt_config::SnmpCredentials::V2c {
                    community: "public".into(),
                }),
                ..Default::default()
            },
            polling: PollingPolicy {
                enabled: true,
                interval_seconds: Some(60),
                metric_list: vec![],
            },
            discovery: Default::default(),
        }
    }

    #[test]
    fn unsupported_driver_factory_yields_unsupported_error() {
        let registry = std::sync::Arc::new(Registry::new());
        registry.replace(vec![cfg("a")]);
        let (_job_tx, job_rx) = crossbeam::channel::bounded(1);
        let (res_tx, res_rx) = crossbeam::channel::bounded(1);
        let worker = Worker::new(registry, job_rx, res_tx, std::sync::Arc::new(RefusingFactory));

        worker.handle(PollJob {
            olt_id: OltId::new("a").unwrap(),
        });

        let result = res_rx.try_recv().unwrap();
        assert!(matches!(result.error, Some(PollError::UnsupportedDriver)));
    }

    #[test]
    fn successful_poll_normalizes_onus_and_clears_error() {
        let registry = std::sync::Arc::new(Registry::new());
        registry.replace(vec![cfg("a")]);
        let (_job_tx, job_rx) = crossbeam::channel::bounded(1);
        let (res_tx, res_rx) = crossbeam::channel::bounded(1);
        let worker = Worker::new(registry, job_rx, res_tx, std::sync::Arc::new(StubFactory));

        worker.handle(PollJob {
            olt_id: OltId::new("a").unwrap(),
        });
        let result = res_rx.try_recv().unwrap();
        assert!(result.is_success());
    }

    #[test]
    fn driver_without_extended_capability_fails_before_listing_onus() {
        let registry = std::sync::Arc::new(Registry::new());
        registry.replace(vec![cfg("a")]);
        let (_job_tx, job_rx) = crossbeam::channel::bounded(1);
        let (res_tx, res_rx) = crossbeam::channel::bounded(1);
        let worker = Worker::new(registry, job_rx, res_tx, std::sync::Arc::new(BasicOnlyFactory));

        worker.handle(PollJob {
            olt_id: OltId::new("a").unwrap(),
        });
        let result = res_rx.try_recv().unwrap();
        assert!(matches!(result.error, Some(PollError::UnsupportedDriver)));
    }

    #[test]
    fn connect_exceeding_timeout_is_reported_as_connect_timeout() {
        let registry = std::sync::Arc::new(Registry::new());
        registry.replace(vec![cfg("a")]);
        let (_job_tx, job_rx) = crossbeam::channel::bounded(1);
        let (res_tx, res_rx) = crossbeam::channel::bounded(1);

        struct SlowFactory;
        impl DriverFactory for SlowFactory {
            fn build(&self, _config: &OltConfig, _protocol: ProtocolKind) -> Option<Box<dyn OltDriverExt>> {
                Some(Box::new(StubDriver {
                    caps: DriverCapabilities::EXTENDED,
                    connect_delay: Some(Duration::from_millis(50)),
                    ..Default::default()
                }))
            }
        }

        let mut worker = Worker::new(registry, job_rx, res_tx, std::sync::Arc::new(SlowFactory));
        worker.connect_timeout = Duration::from_millis(5);

        worker.handle(PollJob {
            olt_id: OltId::new("a").unwrap(),
        });
        let result = res_rx.try_recv().unwrap();
        assert!(matches!(result.error, Some(PollError::ConnectTimeout(_))));
    }

    #[test]
    fn resolve_protocol_falls_back_to_cli_when_nothing_enabled() {
        let mut config = cfg("a");
        config.protocols = OltProtocols::default();
        assert_eq!(resolve_protocol(&config), ProtocolKind::Cli);
    }
}
