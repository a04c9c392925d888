//! End-to-end tests: configuration file to delivered notifications.

use probe::Transition;
use probe_agent::{Agent, ChannelRecorder, ChannelSink, Config, RunOutcome};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_from_file() {
    let file = write_config(
        r#"
scheduler:
  tick: 200ms
  jitter: []
  repeat: 2
probes:
  - id: db
    name: Database
    interval: 5s
    socket:
      - host: 127.0.0.1
        port: 5432
        timeout: 1s
"#,
    );

    let config = assert_ok!(Config::load_from_file(file.path()));
    let settings = config.to_agent_settings();
    assert_eq!(settings.tick, Duration::from_millis(200));
    assert!(settings.jitter.is_empty());
    assert_eq!(settings.repeat, 2);

    let probes = config.probe_set().unwrap();
    assert_eq!(probes.ids().collect::<Vec<_>>(), vec!["db"]);
}

#[test]
fn test_load_from_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert_err!(Config::load_from_file(dir.path().join("absent.yaml")));
}

#[test]
fn test_duplicate_probe_ids_rejected() {
    let file = write_config(
        r#"
probes:
  - id: same
    socket: [{ host: 127.0.0.1, port: 1 }]
  - id: same
    socket: [{ host: 127.0.0.1, port: 2 }]
"#,
    );
    let config = assert_ok!(Config::load_from_file(file.path()));
    assert_err!(config.probe_set());
}

/// A refused TCP target goes DOWN, then comes back UP once a listener
/// appears on its port.
#[tokio::test]
async fn test_tcp_probe_incident_and_recovery() {
    // Reserve a port, then free it so the first checks are refused
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let file = write_config(&format!(
        r#"
scheduler:
  tick: 20ms
  jitter: []
retry:
  initial_delay: 10ms
  max_delay: 20ms
batching:
  delay: 10ms
probes:
  - id: tcp
    interval: 20ms
    incidentThreshold: 1
    recoveryThreshold: 1
    socket:
      - host: 127.0.0.1
        port: {port}
        timeout: 500ms
"#
    ));
    let config = Config::load_from_file(file.path()).unwrap();

    let (sink_tx, mut sink_rx) = mpsc::channel(16);
    let (record_tx, mut record_rx) = mpsc::channel(1024);
    let cancel = CancellationToken::new();
    let running = Agent::new(config.to_agent_settings())
        .with_sinks(vec![Arc::new(ChannelSink::new(sink_tx))])
        .with_recorder(Arc::new(ChannelRecorder::new(record_tx)))
        .start(config.probe_set().unwrap(), cancel.clone())
        .await;

    let incident = tokio::time::timeout(Duration::from_secs(5), sink_rx.recv())
        .await
        .expect("Timeout waiting for incident")
        .unwrap();
    assert_eq!(incident.direction, Transition::Incident);
    assert_eq!(incident.probe_id, "tcp");
    assert_eq!(incident.result.status, 0);

    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let accept = tokio::spawn(async move {
        loop {
            if listener.accept().await.is_err() {
                break;
            }
        }
    });

    let recovery = tokio::time::timeout(Duration::from_secs(5), sink_rx.recv())
        .await
        .expect("Timeout waiting for recovery")
        .unwrap();
    assert_eq!(recovery.direction, Transition::Recovery);
    assert_eq!(recovery.result.status, 200);

    let state = running.handle().alert_state("tcp", "target-unreachable").unwrap();
    assert!(!state.is_down());

    running.shutdown();
    assert_eq!(running.wait().await.unwrap(), RunOutcome::Cancelled);
    accept.abort();

    let record = record_rx.recv().await.unwrap();
    assert_eq!(record.probe_id, "tcp");
    assert_eq!(record.triggered_rule_ids, vec!["target-unreachable".to_string()]);
}

#[tokio::test]
async fn test_repeat_run_exits() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let accept = tokio::spawn(async move {
        loop {
            if listener.accept().await.is_err() {
                break;
            }
        }
    });

    let config = Config::from_yaml(&format!(
        r#"
scheduler:
  tick: 10ms
  jitter: []
  repeat: 3
probes:
  - id: up
    interval: 10ms
    socket: [{{ host: 127.0.0.1, port: {port} }}]
"#
    ))
    .unwrap();

    let (sink_tx, mut sink_rx) = mpsc::channel(16);
    let running = Agent::new(config.to_agent_settings())
        .with_sinks(vec![Arc::new(ChannelSink::new(sink_tx))])
        .start(config.probe_set().unwrap(), CancellationToken::new())
        .await;
    let handle = running.handle().clone();

    let outcome = tokio::time::timeout(Duration::from_secs(10), running.wait())
        .await
        .expect("run should end after the repeat budget")
        .unwrap();
    assert_eq!(outcome, RunOutcome::Exhausted);
    assert_eq!(handle.execution_state("up").unwrap().cycle_count, 3);

    // Healthy from the start: no notifications
    assert!(sink_rx.recv().await.is_none());
    accept.abort();
}
