//! Integration tests for Notifier component

use async_trait::async_trait;
use probe::{ProbeResult, Transition};
use probe_agent::{ChannelSink, NotificationEvent, NotificationSink, Notifier, SinkError};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;

/// Helper to create a notification
fn notification(n: usize, direction: Transition) -> NotificationEvent {
    NotificationEvent {
        probe_id: format!("probe-{}", n),
        probe_name: format!("Probe {}", n),
        alert_rule_id: "status-not-2xx".to_string(),
        direction,
        message: format!("Test message for {}", n),
        result: ProbeResult::with_status(0, 500, Duration::from_millis(10)),
        timestamp: SystemTime::now(),
    }
}

/// Sink that always fails, counting the attempts
#[derive(Default)]
struct FailingSink {
    attempts: AtomicUsize,
}

#[async_trait]
impl NotificationSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    async fn send(&self, _event: &NotificationEvent) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Delivery("endpoint unavailable".to_string()))
    }
}

/// Sink that accepts the call and never answers
#[derive(Default)]
struct StuckSink {
    calls: AtomicUsize,
}

#[async_trait]
impl NotificationSink for StuckSink {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn send(&self, _event: &NotificationEvent) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }
}

fn spawn_notifier(
    sinks: Vec<Arc<dyn NotificationSink>>,
    batch_delay: Duration,
    batch_size: usize,
) -> (mpsc::Sender<NotificationEvent>, tokio::task::JoinHandle<()>) {
    let (notify_tx, notify_rx) = mpsc::channel::<NotificationEvent>(100);
    let notifier = Notifier::new(notify_rx, sinks, batch_delay, batch_size);
    let task = tokio::spawn(async move {
        notifier.run().await;
    });
    (notify_tx, task)
}

async fn recv(rx: &mut mpsc::Receiver<NotificationEvent>, wait: Duration) -> NotificationEvent {
    tokio::time::timeout(wait, rx.recv())
        .await
        .expect("Timeout waiting for notification")
        .expect("Channel closed")
}

#[tokio::test]
async fn test_notifier_batches_notifications() {
    let (sink_tx, mut sink_rx) = mpsc::channel(100);
    let (notify_tx, _task) = spawn_notifier(
        vec![Arc::new(ChannelSink::new(sink_tx))],
        Duration::from_millis(10),
        5,
    );

    for i in 1..=3 {
        notify_tx.send(notification(i, Transition::Incident)).await.unwrap();
    }

    // Below the batch size, delivered once the delay elapses
    for i in 1..=3 {
        let event = recv(&mut sink_rx, Duration::from_millis(200)).await;
        assert_eq!(event.probe_id, format!("probe-{}", i));
    }
}

#[tokio::test]
async fn test_notifier_sends_full_batch_immediately() {
    let (sink_tx, mut sink_rx) = mpsc::channel(100);
    let (notify_tx, _task) = spawn_notifier(
        vec![Arc::new(ChannelSink::new(sink_tx))],
        Duration::from_secs(10),
        3,
    );

    for i in 1..=3 {
        notify_tx.send(notification(i, Transition::Incident)).await.unwrap();
    }

    for _ in 1..=3 {
        recv(&mut sink_rx, Duration::from_millis(500)).await;
    }
}

#[tokio::test]
async fn test_notifier_handles_multiple_batches() {
    let (sink_tx, mut sink_rx) = mpsc::channel(100);
    let (notify_tx, _task) = spawn_notifier(
        vec![Arc::new(ChannelSink::new(sink_tx))],
        Duration::from_millis(20),
        3,
    );

    for i in 1..=3 {
        notify_tx.send(notification(i, Transition::Incident)).await.unwrap();
    }
    for _ in 1..=3 {
        recv(&mut sink_rx, Duration::from_millis(200)).await;
    }

    for i in 4..=5 {
        notify_tx.send(notification(i, Transition::Recovery)).await.unwrap();
    }
    for i in 4..=5 {
        let event = recv(&mut sink_rx, Duration::from_millis(200)).await;
        assert_eq!(event.probe_id, format!("probe-{}", i));
        assert_eq!(event.direction, Transition::Recovery);
    }
}

#[tokio::test]
async fn test_failing_sink_does_not_block_others() {
    let failing = Arc::new(FailingSink::default());
    let (sink_tx, mut sink_rx) = mpsc::channel(100);
    let (notify_tx, _task) = spawn_notifier(
        vec![failing.clone(), Arc::new(ChannelSink::new(sink_tx))],
        Duration::from_millis(10),
        10,
    );

    notify_tx.send(notification(1, Transition::Incident)).await.unwrap();
    notify_tx.send(notification(2, Transition::Incident)).await.unwrap();

    recv(&mut sink_rx, Duration::from_millis(200)).await;
    recv(&mut sink_rx, Duration::from_millis(200)).await;
    assert_eq!(failing.attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_notifier_flushes_on_close() {
    let (sink_tx, mut sink_rx) = mpsc::channel(100);
    let (notify_tx, task) = spawn_notifier(
        vec![Arc::new(ChannelSink::new(sink_tx))],
        Duration::from_secs(60),
        100,
    );

    notify_tx.send(notification(1, Transition::Incident)).await.unwrap();
    notify_tx.send(notification(2, Transition::Recovery)).await.unwrap();
    drop(notify_tx);

    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("Notifier should stop when all senders are dropped")
        .unwrap();

    assert_eq!(sink_rx.recv().await.unwrap().probe_id, "probe-1");
    assert_eq!(sink_rx.recv().await.unwrap().probe_id, "probe-2");
}

#[tokio::test]
async fn test_stuck_sink_times_out() {
    let stuck = Arc::new(StuckSink::default());
    let (sink_tx, mut sink_rx) = mpsc::channel(100);
    let (notify_tx, notify_rx) = mpsc::channel::<NotificationEvent>(100);
    let notifier = Notifier::new(
        notify_rx,
        vec![stuck.clone(), Arc::new(ChannelSink::new(sink_tx))],
        Duration::from_millis(10),
        1,
    )
    .with_sink_timeout(Duration::from_millis(50));
    let task = tokio::spawn(notifier.run());

    for i in 1..=3 {
        notify_tx.send(notification(i, Transition::Incident)).await.unwrap();
    }

    // Each event waits out the stuck sink once, then moves on
    for i in 1..=3 {
        let event = recv(&mut sink_rx, Duration::from_secs(1)).await;
        assert_eq!(event.probe_id, format!("probe-{}", i));
    }

    drop(notify_tx);
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("Notifier should stop despite the stuck sink")
        .unwrap();
    assert_eq!(stuck.calls.load(Ordering::SeqCst), 3);
}
