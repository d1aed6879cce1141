//! Cluster lifecycle tests against the in-memory runtime.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pulsar_it_orchestrator::runtime::{InMemoryRuntime, RuntimeEventKind};
use pulsar_it_orchestrator::topology::ADMIN_SCRIPT;
use pulsar_it_orchestrator::{
    Cluster, ClusterSpec, ClusterState, ContainerState, ExecResult, ExternalService,
    FunctionRuntime, NodeRole, OrchestratorConfig, OrchestratorError,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pulsar_it_orchestrator=debug,container_log=info")
        .with_test_writer()
        .try_init();
}

fn config(output: &Path) -> OrchestratorConfig {
    OrchestratorConfig {
        output_root: output.to_path_buf(),
        startup_timeout_secs: 5,
        readiness_poll_interval_ms: 20,
        exec_poll_interval_ms: 10,
        capture_timeout_secs: 5,
        ..Default::default()
    }
}

fn small_spec(name: &str) -> ClusterSpec {
    ClusterSpec::builder(name)
        .with_coordination_count(1)
        .with_storage_count(1)
        .with_broker_count(2)
        .with_proxy_count(1)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_start_exposes_declared_counts() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let spec = ClusterSpec::builder("counts")
        .with_coordination_count(2)
        .with_storage_count(3)
        .with_broker_count(2)
        .build()
        .unwrap();

    let mut cluster = Cluster::for_spec(spec, runtime.clone(), config(dir.path()));
    cluster.start().await.unwrap();

    assert_eq!(cluster.state(), ClusterState::Running);
    assert_eq!(cluster.get_all_of(NodeRole::Coordination).len(), 2);
    assert_eq!(cluster.get_all_of(NodeRole::Storage).len(), 3);
    assert_eq!(cluster.get_brokers().len(), 2);

    let hostnames: HashSet<&str> = cluster.handles().iter().map(|h| h.hostname()).collect();
    assert_eq!(hostnames.len(), cluster.handles().len());
    assert!(cluster
        .handles()
        .iter()
        .all(|h| h.state() == ContainerState::Running));
    assert_eq!(runtime.running_containers().len(), 8);

    cluster.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let mut cluster = Cluster::for_spec(small_spec("idem"), runtime.clone(), config(dir.path()));

    cluster.start().await.unwrap();
    cluster.stop().await;
    cluster.stop().await;

    assert_eq!(cluster.state(), ClusterState::Stopped);
    assert_eq!(runtime.networks_created(), vec!["idem".to_string()]);
    assert_eq!(runtime.networks_removed(), vec!["idem".to_string()]);
    assert_eq!(runtime.container_count(), 0);
}

#[tokio::test]
async fn test_stop_without_start() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let mut cluster = Cluster::for_spec(small_spec("never"), runtime.clone(), config(dir.path()));

    cluster.stop().await;

    assert_eq!(cluster.state(), ClusterState::Stopped);
    assert!(runtime.events().is_empty());
    assert!(cluster.start().await.is_err());
}

#[tokio::test]
async fn test_start_order_follows_dependencies() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let spec = ClusterSpec::builder("order")
        .with_coordination_count(2)
        .with_storage_count(2)
        .with_broker_count(2)
        .with_function_worker_count(1)
        .with_external_service("mysql", ExternalService::new("mysql:8").with_service_port(3306))
        .build()
        .unwrap();

    let mut cluster = Cluster::for_spec(spec, runtime.clone(), config(dir.path()));
    cluster.start().await.unwrap();

    let events = runtime.events();
    let started_at = |prefix: &str| -> Vec<std::time::Instant> {
        events
            .iter()
            .filter(|e| {
                e.kind == RuntimeEventKind::ContainerStarted
                    && e.target.starts_with(&format!("order-{prefix}"))
            })
            .map(|e| e.at)
            .collect()
    };

    let zk = started_at("zookeeper");
    let bookies = started_at("bookkeeper");
    let brokers = started_at("pulsar-broker");
    let proxies = started_at("pulsar-proxy");
    let externals = started_at("mysql");
    let workers = started_at("pulsar-worker");

    let last = |v: &[std::time::Instant]| *v.iter().max().unwrap();
    let first = |v: &[std::time::Instant]| *v.iter().min().unwrap();

    assert!(last(&zk) <= first(&bookies));
    assert!(last(&zk) <= first(&brokers));
    assert!(last(&bookies) <= first(&brokers));
    assert!(last(&brokers) <= first(&proxies));
    assert!(last(&proxies) <= first(&externals));
    assert!(last(&externals) <= first(&workers));

    // Metadata is initialised once the coordination stage is up.
    let init = events
        .iter()
        .position(|e| e.kind == RuntimeEventKind::Exec && e.target.contains("init-cluster.sh"))
        .unwrap();
    let first_bookie = events
        .iter()
        .position(|e| {
            e.kind == RuntimeEventKind::ContainerStarted && e.target.starts_with("order-bookkeeper")
        })
        .unwrap();
    assert!(init < first_bookie);
    assert!(events[init].target.starts_with("order-zookeeper-0"));

    cluster.stop().await;
}

#[tokio::test]
async fn test_storage_waits_for_listener_inside_coordination() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new().with_late_listener("gate-zookeeper-0", 3));
    let mut cluster = Cluster::for_spec(small_spec("gate"), runtime.clone(), config(dir.path()));
    cluster.start().await.unwrap();

    let events = runtime.events();
    let zk_checks: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| {
            e.kind == RuntimeEventKind::Exec
                && e.target.starts_with("gate-zookeeper-0:")
                && e.target.contains("/proc/net/tcp")
        })
        .map(|(i, _)| i)
        .collect();
    let first_bookie = events
        .iter()
        .position(|e| {
            e.kind == RuntimeEventKind::ContainerStarted && e.target.starts_with("gate-bookkeeper")
        })
        .unwrap();

    // Three failed checks, then the one that lets the stage finish.
    assert_eq!(zk_checks.len(), 4);
    assert!(zk_checks.iter().all(|&i| i < first_bookie));
    assert!(events[first_bookie].at - events[zk_checks[0]].at >= Duration::from_millis(60));

    cluster.stop().await;
}

#[tokio::test]
async fn test_stop_order_is_reverse_of_start() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let mut cluster = Cluster::for_spec(small_spec("rev"), runtime.clone(), config(dir.path()));

    cluster.start().await.unwrap();
    cluster.stop().await;

    let stopped: Vec<String> = runtime
        .events()
        .into_iter()
        .filter(|e| e.kind == RuntimeEventKind::ContainerStopped)
        .map(|e| e.target)
        .collect();
    let mut started = runtime.started_order();
    started.reverse();
    assert_eq!(stopped, started);
}

#[tokio::test]
async fn test_run_command_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let mut cluster = Cluster::for_spec(small_spec("echo"), runtime, config(dir.path()));
    cluster.start().await.unwrap();

    let broker = cluster.get_any_broker().unwrap();
    let result = broker.exec_cmd(&["echo", "hello"]).await.unwrap();
    assert_eq!(result, ExecResult::new(0, "hello\n", ""));

    let failed = broker.exec_cmd(&["false"]).await.unwrap();
    assert_eq!(failed.exit_code, 1);

    let err = broker.exec_cmd_checked(&["false"]).await.unwrap_err();
    assert_eq!(err.exec_result().map(|r| r.exit_code), Some(1));

    cluster.stop().await;
}

#[tokio::test]
async fn test_admin_command_creates_tenant() {
    let dir = tempfile::tempdir().unwrap();
    let tenants = Arc::new(Mutex::new(vec!["public".to_string()]));
    let state = tenants.clone();
    let runtime = Arc::new(InMemoryRuntime::new().with_exec_handler(move |_, cmd| {
        let args: Vec<&str> = cmd.iter().map(String::as_str).collect();
        match args.as_slice() {
            [ADMIN_SCRIPT, "tenants", "create", name, ..] => {
                state.lock().unwrap().push(name.to_string());
                ExecResult::new(0, "", "")
            }
            [ADMIN_SCRIPT, "tenants", "list"] => {
                ExecResult::new(0, state.lock().unwrap().join("\n") + "\n", "")
            }
            _ => ExecResult::new(0, "", ""),
        }
    }));

    let mut cluster = Cluster::for_spec(small_spec("tenants"), runtime, config(dir.path()));
    cluster.start().await.unwrap();

    let created = cluster
        .run_admin_command_on_any_broker(&["tenants", "create", "acme", "--allowed-clusters", "tenants"])
        .await
        .unwrap();
    assert!(created.success());

    let listed = cluster
        .run_admin_command_on_any_broker(&["tenants", "list"])
        .await
        .unwrap();
    assert!(listed.stdout_lines().contains(&"acme"));

    cluster.stop().await;
    assert_eq!(tenants.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_startup_timeout_leaves_started_containers() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new().with_unready_container("slow-pulsar-broker-0"));
    let mut config = config(dir.path());
    config.startup_timeout_secs = 1;

    let mut cluster = Cluster::for_spec(small_spec("slow"), runtime.clone(), config);
    let err = cluster.start().await.unwrap_err();

    match &err {
        OrchestratorError::StartupTimeout { container, .. } => {
            assert_eq!(container, "slow-pulsar-broker-0")
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(cluster.state(), ClusterState::Failed);
    assert_eq!(
        runtime.running_containers(),
        vec![
            "slow-bookkeeper-0".to_string(),
            "slow-pulsar-broker-0".to_string(),
            "slow-zookeeper-0".to_string(),
        ]
    );

    cluster.stop().await;
    assert!(runtime.running_containers().is_empty());
    assert_eq!(runtime.networks_removed().len(), 1);
    assert!(dir
        .path()
        .join("container-logs/slow-pulsar-broker-0/docker.log")
        .exists());
}

#[tokio::test]
async fn test_failed_metadata_init_aborts_start() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new().with_exec_handler(|_, cmd| {
        if cmd[0].ends_with("init-cluster.sh") {
            ExecResult::new(2, "", "metadata store unreachable\n")
        } else {
            ExecResult::new(0, "", "")
        }
    }));

    let mut cluster = Cluster::for_spec(small_spec("badinit"), runtime.clone(), config(dir.path()));
    let err = cluster.start().await.unwrap_err();

    assert!(matches!(err, OrchestratorError::CommandExecution { .. }));
    assert_eq!(err.exec_result().map(|r| r.exit_code), Some(2));
    assert_eq!(runtime.started_order(), vec!["badinit-zookeeper-0".to_string()]);

    cluster.stop().await;
    assert_eq!(runtime.container_count(), 0);
}

#[tokio::test]
async fn test_log_artifacts_per_container() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let mut cluster = Cluster::for_spec(small_spec("logs"), runtime, config(dir.path()));

    cluster.start().await.unwrap();
    let names: Vec<String> = cluster
        .handles()
        .iter()
        .map(|h| h.container_name())
        .collect();
    cluster.stop().await;

    let logs = dir.path().join("container-logs");
    for name in &names {
        let container_dir = logs.join(name);
        assert!(container_dir.join("docker.log").exists(), "{name}");
        assert!(container_dir.join("var-log-pulsar.tar.gz").exists(), "{name}");
    }
    assert!(logs.join("logs").join("docker-compose.yml").exists());
}

#[tokio::test]
async fn test_failing_capture_does_not_fail_stop() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new().with_failing_downloads());
    let mut cluster = Cluster::for_spec(small_spec("flaky"), runtime.clone(), config(dir.path()));

    cluster.start().await.unwrap();
    let names: Vec<String> = cluster
        .handles()
        .iter()
        .map(|h| h.container_name())
        .collect();
    cluster.stop().await;

    assert_eq!(cluster.state(), ClusterState::Stopped);
    assert_eq!(runtime.container_count(), 0);
    assert_eq!(runtime.networks_removed().len(), 1);

    // The log capture still lands; the broken archive is discarded.
    let logs = dir.path().join("container-logs");
    for name in &names {
        let container_dir = logs.join(name);
        assert!(container_dir.join("docker.log").exists(), "{name}");
        let archives: Vec<_> = std::fs::read_dir(&container_dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tar.gz"))
            .collect();
        assert!(archives.is_empty(), "{name}: {archives:?}");
    }
}

#[tokio::test]
async fn test_service_urls_use_proxy() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let mut cluster = Cluster::for_spec(small_spec("urls"), runtime, config(dir.path()));
    cluster.start().await.unwrap();

    let proxy = cluster.proxy().unwrap();
    let binary = proxy.mapped_port(6650).unwrap();
    let http = proxy.mapped_port(8080).unwrap();

    assert_eq!(
        cluster.get_plain_text_service_url().unwrap(),
        format!("pulsar://127.0.0.1:{binary}")
    );
    assert_eq!(
        cluster.get_http_service_url().unwrap(),
        format!("http://127.0.0.1:{http}")
    );

    cluster.stop().await;
}

#[tokio::test]
async fn test_pre_start_env_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let mut cluster = Cluster::for_spec(small_spec("mutate"), runtime.clone(), config(dir.path()));

    for broker in cluster.brokers_mut() {
        broker.with_env("authenticationEnabled", "true");
    }
    if let Some(proxy) = cluster.proxy_mut() {
        proxy.with_env("authenticationEnabled", "true");
    }
    cluster.start().await.unwrap();

    let request = runtime.created_request("mutate-pulsar-broker-1").unwrap();
    assert!(request
        .env
        .contains(&("authenticationEnabled".to_string(), "true".to_string())));
    assert!(request
        .labels
        .get("cluster")
        .is_some_and(|c| c == "mutate"));

    let broker = cluster.get_any_broker().unwrap();
    assert_eq!(
        cluster
            .runner()
            .container_cluster(broker.container_id().unwrap())
            .await
            .unwrap(),
        Some("mutate".to_string())
    );
    assert!(broker.ip_address().await.is_ok());

    cluster.stop().await;
}

#[tokio::test]
async fn test_late_function_workers() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let mut cluster = Cluster::for_spec(small_spec("late"), runtime.clone(), config(dir.path()));

    assert!(cluster
        .start_function_workers(1, FunctionRuntime::Thread)
        .await
        .is_err());

    cluster.start().await.unwrap();
    assert!(cluster.get_any_worker().is_err());

    cluster
        .start_function_workers(2, FunctionRuntime::Thread)
        .await
        .unwrap();
    let workers = cluster.get_all_of(NodeRole::FunctionWorker);
    assert_eq!(workers.len(), 2);
    assert_eq!(workers[1].hostname(), "pulsar-worker-1");
    assert!(workers.iter().all(|w| w.is_running()));
    assert_eq!(cluster.spec().function_worker_count, 2);

    cluster.stop().await;
    assert_eq!(runtime.container_count(), 0);
}

#[tokio::test]
async fn test_log_following() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(InMemoryRuntime::new());
    let spec = ClusterSpec::builder("follow")
        .with_storage_count(0)
        .with_broker_count(1)
        .with_proxy_count(0)
        .with_log_capture(true)
        .build()
        .unwrap();

    let mut cluster = Cluster::for_spec(spec, runtime, config(dir.path()));
    cluster.start().await.unwrap();
    assert!(cluster.get_any_broker().unwrap().is_running());
    cluster.stop().await;
}
