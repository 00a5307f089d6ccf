use std::error::Error;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{error, info};

use nano_agent::cli::{parse_labels, Cli, Command};
use nano_agent::config::{FileStore, PersistedConfig};
use nano_agent::control_plane::auth::Credentials;
use nano_agent::control_plane::client::{ControlPlaneClient, EnrollRequest, EnrollVersion};
use nano_agent::control_plane::{MetricsPusher, OnuPusher, TelemetryPusher};
use nano_agent::logging::Logging;
use nano_agent::model::NodeId;
use nano_agent::processor::{Pushers, ResultProcessor};
use nano_agent::registry::Registry;
use nano_agent::scheduler::Scheduler;
use nano_agent::sync_loop::{ShutdownFlag, SyncLoop};
use nano_agent::worker::{NullDriverFactory, Worker, DEFAULT_WORKER_COUNT};

fn main() -> Result<(), Box<dyn Error>> {
    Logging::try_init()?;

    let cli = Cli::parse_args();

    if cli.print_debug_info() {
        println!("CLI: {:#?}", cli);
        println!("hostname: {}", nix::unistd::gethostname()?.to_string_lossy());
        println!("uid: {}", nix::unistd::Uid::current());
        return Ok(());
    }

    let store = FileStore::new(cli.config_dir());
    let persisted = store.load_config()?;

    let base_url = url::Url::parse(&persisted.api_url)?;
    let credentials = credentials_from(&persisted);
    let client = Arc::new(ControlPlaneClient::new(base_url, &credentials, |m| m.cert_file.exists())?);

    match cli.command() {
        Command::WhoAmI => {
            let who = client.validate_api_key()?;
            println!("agent_id={} org_id={}", who.agent_id, who.org_id);
            Ok(())
        }
        Command::Enroll { labels } => {
            let req = EnrollRequest {
                node_id: persisted.node_id.clone(),
                labels: parse_labels(&labels),
            };
            let resp = client.enroll(EnrollVersion::V2, &req)?;
            store.store_pem("client.crt", &resp.cert_pem)?;
            store.store_pem("client.key", &resp.key_pem)?;
            store.store_pem("ca.crt", &resp.ca_pem)?;
            let mut updated = persisted;
            updated.agent_api_key = resp.agent_api_key;
            updated.agent_api_key_prefix = resp.agent_api_key_prefix;
            store.store_config(&updated)?;
            info!("enrollment complete");
            Ok(())
        }
        Command::Run => run(cli, store, persisted, client),
    }
}

fn credentials_from(config: &PersistedConfig) -> Credentials {
    Credentials {
        agent_key: config
            .agent_api_key
            .clone()
            .zip(config.agent_api_key_prefix.clone())
            .map(|(key, prefix)| nano_agent::control_plane::auth::AgentKey { key, prefix }),
        mtls: None,
        user_key: None,
    }
}

fn run(
    _cli: Cli,
    store: FileStore,
    persisted: PersistedConfig,
    client: Arc<ControlPlaneClient>,
) -> Result<(), Box<dyn Error>> {
    let node_id = NodeId::new(persisted.node_id.clone())?;
    let registry = Arc::new(Registry::new());
    let buffer = Arc::new(nano_agent::buffer::RetryBuffer::default());

    let shutdown = Arc::new(ShutdownFlag::default());
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            info!("shutdown signal received");
            shutdown.request();
        })?;
    }

    let (job_tx, job_rx) = crossbeam::channel::bounded(2 * DEFAULT_WORKER_COUNT);
    let (result_tx, result_rx) = crossbeam::channel::bounded(2 * DEFAULT_WORKER_COUNT);

    let factory = Arc::new(NullDriverFactory);
    let mut worker_handles = Vec::new();
    for _ in 0..DEFAULT_WORKER_COUNT {
        let registry = Arc::clone(&registry);
        let job_rx = job_rx.clone();
        let result_tx = result_tx.clone();
        let factory = Arc::clone(&factory);
        worker_handles.push(thread::spawn(move || {
            Worker::new(registry, job_rx, result_tx, factory).run();
        }));
    }
    drop(job_rx);
    drop(result_tx);

    let pushers = Pushers {
        onus: Some(client.clone() as Arc<dyn OnuPusher + Send + Sync>),
        telemetry: Some(client.clone() as Arc<dyn TelemetryPusher + Send + Sync>),
        metrics: Some(client.clone() as Arc<dyn MetricsPusher + Send + Sync>),
    };
    let processor = ResultProcessor::new(Arc::clone(&registry), Arc::clone(&buffer), pushers);
    let processor_handle = {
        let result_rx = result_rx.clone();
        thread::spawn(move || processor.run(result_rx))
    };
    drop(result_rx);

    let sync_loop = SyncLoop::new(Arc::clone(&client), Arc::clone(&registry), node_id);
    // Populate the registry before the scheduler's staggered wave reads it;
    // the periodic loop below still runs its own first sync on schedule.
    sync_loop.config_sync_once();
    let sync_shutdown = Arc::clone(&shutdown);
    let sync_handle = thread::spawn(move || {
        sync_loop.run(&sync_shutdown, Duration::from_millis(500), |d| thread::sleep(d));
    });

    let scheduler = Scheduler::new(Arc::clone(&registry), job_tx);
    scheduler.run_initial_wave(|d| thread::sleep(d));
    let sched_shutdown = Arc::clone(&shutdown);
    scheduler.run(|d| thread::sleep(d), move || sched_shutdown.requested());

    for handle in worker_handles {
        if handle.join().is_err() {
            error!("worker thread panicked");
        }
    }
    if processor_handle.join().is_err() {
        error!("result processor thread panicked");
    }
    if sync_handle.join().is_err() {
        error!("sync loop thread panicked");
    }

    let mut state = store.load_state().unwrap_or_default();
    state.last_sync = Some(now_ms());
    let _ = store.store_state(&state);

    Ok(())
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
