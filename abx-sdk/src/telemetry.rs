//! Assignment-event fan-out.
//!
//! The decision path pushes events into a bounded broadcast queue and
//! returns immediately; a background task drains the queue and publishes
//! to the assignment topic keyed by user id. When the queue overflows the
//! oldest events are dropped and counted, so broker slowness can never
//! stretch decision latency.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use abx_broker::{EventLog, Record};
use abx_types::AssignmentEvent;

use crate::metrics::SdkMetrics;

/// Spawn the assignment publisher task.
///
/// Returns the queue sender for the decision path and the task handle.
/// On shutdown the task drains whatever is still queued before exiting,
/// so telemetry for decisions made just before close is not lost.
pub(crate) fn spawn_assignment_publisher(
    assignment_log: Arc<dyn EventLog<Record>>,
    metrics: Arc<SdkMetrics>,
    capacity: usize,
    shutdown: CancellationToken,
) -> (broadcast::Sender<AssignmentEvent>, JoinHandle<()>) {
    let (tx, mut rx) = broadcast::channel::<AssignmentEvent>(capacity);

    let handle = tokio::spawn(async move {
        info!("assignment publisher started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    drain(&mut rx, assignment_log.as_ref(), &metrics).await;
                    break;
                }
                result = rx.recv() => match result {
                    Ok(event) => publish(assignment_log.as_ref(), &metrics, event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        error!(dropped = n, "assignment queue overflowed, dropped oldest events");
                        metrics.record_errors("assignment_queue_overflow", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        info!("assignment publisher stopped");
    });

    (tx, handle)
}

/// Publish everything still buffered at shutdown.
async fn drain(
    rx: &mut broadcast::Receiver<AssignmentEvent>,
    log: &dyn EventLog<Record>,
    metrics: &SdkMetrics,
) {
    loop {
        match rx.try_recv() {
            Ok(event) => publish(log, metrics, event).await,
            Err(broadcast::error::TryRecvError::Lagged(n)) => {
                metrics.record_errors("assignment_queue_overflow", n);
            }
            Err(_) => break,
        }
    }
}

async fn publish(log: &dyn EventLog<Record>, metrics: &SdkMetrics, event: AssignmentEvent) {
    let payload = match serde_json::to_vec(&event) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error = %e, "failed to encode assignment event");
            metrics.record_error("assignment_encode_error");
            return;
        }
    };

    // Keyed by user id: all assignments of one user stay ordered.
    let record = Record::keyed(event.user_id.clone(), payload);
    if let Err(e) = log.append(record).await {
        error!(error = %e, user_id = %event.user_id, "failed to publish assignment event");
        metrics.record_error("assignment_publish_error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abx_broker::{EventConsumer, PartitionedEventLog, Record, SeekPosition};
    use chrono::Utc;
    use std::collections::HashMap;
    use std::time::Duration;

    fn event(user_id: &str) -> AssignmentEvent {
        AssignmentEvent {
            user_id: user_id.to_string(),
            experiment_id: "exp-1".to_string(),
            variant_name: "control".to_string(),
            timestamp: Utc::now(),
            context: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn events_reach_the_assignment_topic_keyed_by_user() {
        let log = Arc::new(PartitionedEventLog::new());
        let metrics = Arc::new(SdkMetrics::new().unwrap());
        let shutdown = CancellationToken::new();

        let (tx, handle) = spawn_assignment_publisher(
            log.clone() as Arc<dyn EventLog<Record>>,
            metrics,
            16,
            shutdown.clone(),
        );

        tx.send(event("u1")).unwrap();
        tx.send(event("u2")).unwrap();

        let mut consumer = log.consumer("sink").await.unwrap();
        consumer.seek(SeekPosition::Beginning).await.unwrap();

        let mut received = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while received.len() < 2 && tokio::time::Instant::now() < deadline {
            let batch = consumer.poll(10, Duration::from_millis(50)).await.unwrap();
            received.extend(batch);
        }

        assert_eq!(received.len(), 2);
        let mut keys: Vec<Option<String>> =
            received.iter().map(|r: &Record| r.key.clone()).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![Some("u1".to_string()), Some("u2".to_string())]
        );

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_drains_buffered_events() {
        let log = Arc::new(PartitionedEventLog::new());
        let metrics = Arc::new(SdkMetrics::new().unwrap());
        let shutdown = CancellationToken::new();

        let (tx, handle) = spawn_assignment_publisher(
            log.clone() as Arc<dyn EventLog<Record>>,
            metrics,
            16,
            shutdown.clone(),
        );

        for i in 0..5 {
            tx.send(event(&format!("u{i}"))).unwrap();
        }

        // Cancel immediately; the drain must still flush the queue.
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(log.total_count().await, 5);
    }
}
