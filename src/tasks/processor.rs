use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, Semaphore},
    task::{JoinHandle, JoinSet},
    time::timeout,
};

use crate::{
    domain::{IncomingMessage, PostOutcome},
    infrastructure::shutdown::ShutdownListener,
};

use super::pipeline::RelayPipeline;

pub struct MessageProcessor {
    pipeline: Arc<RelayPipeline>,
    max_in_flight: usize,
    shutdown_grace: Duration,
}

impl MessageProcessor {
    pub fn new(pipeline: Arc<RelayPipeline>, max_in_flight: usize, shutdown_grace: Duration) -> Self {
        Self {
            pipeline,
            max_in_flight: max_in_flight.max(1),
            shutdown_grace,
        }
    }

    pub fn spawn(
        self: Arc<Self>,
        jobs: mpsc::Receiver<IncomingMessage>,
        shutdown: ShutdownListener,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_loop(jobs, shutdown).await })
    }

    async fn run_loop(&self, mut jobs: mpsc::Receiver<IncomingMessage>, mut shutdown: ShutdownListener) {
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut workers = JoinSet::new();
        let mut held = None;

        loop {
            let job = tokio::select! {
                _ = shutdown.notified() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = shutdown.notified() => {
                    held = Some(job);
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let pipeline = self.pipeline.clone();
            workers.spawn(async move {
                let _permit = permit;
                let outcomes = pipeline.run(&job).await;
                tracing::debug!(
                    target: "processor",
                    chat_id = job.chat_id.0,
                    message_id = job.message_id.0,
                    posts = outcomes.len(),
                    delivered = outcomes.iter().filter(|o| o.is_delivered()).count(),
                    failed = ?outcomes
                        .iter()
                        .filter(|o| !o.is_delivered())
                        .map(PostOutcome::post_id)
                        .collect::<Vec<_>>(),
                    "message processed"
                );
            });

            while let Some(result) = workers.try_join_next() {
                log_worker_exit(result);
            }
        }

        jobs.close();
        let dropped = usize::from(held.is_some()) + drain_queue(&mut jobs);
        if dropped > 0 {
            tracing::warn!(
                target: "processor",
                dropped,
                held_chat_id = held.as_ref().map(|job| job.chat_id.0),
                "shutdown left queued messages unprocessed"
            );
        }
        let in_flight = workers.len();
        if in_flight > 0 {
            tracing::info!(target: "processor", in_flight, "waiting for in-flight jobs");
        }
        let drain = async {
            while let Some(result) = workers.join_next().await {
                log_worker_exit(result);
            }
        };
        if timeout(self.shutdown_grace, drain).await.is_err() {
            tracing::warn!(
                target: "processor",
                grace_secs = self.shutdown_grace.as_secs(),
                "in-flight jobs did not finish in time; aborting them"
            );
            workers.abort_all();
        }
        tracing::info!(target: "processor", "message processor stopped");
    }
}

fn drain_queue(jobs: &mut mpsc::Receiver<IncomingMessage>) -> usize {
    let mut count = 0;
    while jobs.try_recv().is_ok() {
        count += 1;
    }
    count
}

fn log_worker_exit(result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        if err.is_panic() {
            tracing::error!(target: "processor", error = %err, "pipeline task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use teloxide::types::{ChatId, MessageId};

    use super::*;
    use crate::{
        domain::{AssetRequest, MediaAsset, Post, PostId, PostReference, RelayError, UserId},
        infrastructure::shutdown::Shutdown,
        tasks::{
            pipeline::{AssetSource, PipelineLimits, PostSource, Responder},
            retry::RetryPolicy,
        },
    };

    struct SlowSource {
        delay: Duration,
        current: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl SlowSource {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PostSource for SlowSource {
        async fn resolve(&self, reference: &PostReference) -> Result<Post, RelayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Err(RelayError::NotFound {
                post_id: reference.post_id,
            })
        }

        async fn user_posts(&self, user_id: UserId, _: usize) -> Result<Vec<PostId>, RelayError> {
            Err(RelayError::UserNotFound { user_id })
        }
    }

    struct NoAssets;

    #[async_trait]
    impl AssetSource for NoAssets {
        async fn fetch(&self, request: &AssetRequest) -> Result<MediaAsset, RelayError> {
            Err(RelayError::Upstream {
                reason: format!("unexpected fetch of {}", request.url),
            })
        }
    }

    struct SilentResponder;

    #[async_trait]
    impl Responder for SilentResponder {
        async fn send_status(&self, _: ChatId, _: MessageId, _: &str) -> Option<MessageId> {
            None
        }
        async fn clear_status(&self, _: ChatId, _: MessageId) {}
        async fn deliver(
            &self,
            _: ChatId,
            _: MessageId,
            _: &[MediaAsset],
            _: &str,
        ) -> Result<(), RelayError> {
            Ok(())
        }
        async fn send_notice(&self, _: ChatId, _: MessageId, _: &str) {}
        async fn report_failure(&self, _: ChatId, _: MessageId, _: &str) {}
    }

    fn processor(source: Arc<SlowSource>, limit: usize, grace: Duration) -> Arc<MessageProcessor> {
        let pipeline = RelayPipeline::new(
            source,
            Arc::new(NoAssets),
            Arc::new(SilentResponder),
            RetryPolicy {
                retries: 0,
                base_delay: Duration::from_millis(1),
            },
            PipelineLimits {
                max_posts: 10,
                max_user_works: 10,
                archive_bytes: 1024,
            },
        );
        Arc::new(MessageProcessor::new(Arc::new(pipeline), limit, grace))
    }

    fn message(id: i32) -> IncomingMessage {
        IncomingMessage {
            chat_id: ChatId(i64::from(id)),
            message_id: MessageId(id),
            from_id: None,
            text: format!("{}", 1000 + id),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let source = Arc::new(SlowSource::new(Duration::from_millis(30)));
        let (tx, rx) = mpsc::channel(16);
        let (shutdown, listener) = Shutdown::new();
        let handle = processor(source.clone(), 2, Duration::from_secs(5)).spawn(rx, listener);

        for id in 0..6 {
            tx.send(message(id)).await.expect("queue open");
        }
        drop(tx);
        handle.await.expect("processor exits cleanly");
        drop(shutdown);

        assert_eq!(source.calls.load(Ordering::SeqCst), 6);
        assert_eq!(source.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_abandons_stuck_jobs_after_grace() {
        let source = Arc::new(SlowSource::new(Duration::from_secs(60)));
        let (tx, rx) = mpsc::channel(16);
        let (shutdown, listener) = Shutdown::new();
        let handle = processor(source.clone(), 2, Duration::from_millis(50)).spawn(rx, listener);

        tx.send(message(1)).await.expect("queue open");
        while source.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.trigger();

        let finished = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(finished.is_ok(), "processor should stop after the grace period");
    }

    #[tokio::test]
    async fn messages_waiting_for_a_worker_are_not_started_after_shutdown() {
        let source = Arc::new(SlowSource::new(Duration::from_secs(60)));
        let (tx, rx) = mpsc::channel(16);
        let (shutdown, listener) = Shutdown::new();
        let handle = processor(source.clone(), 1, Duration::from_millis(50)).spawn(rx, listener);

        for id in 0..3 {
            tx.send(message(id)).await.expect("queue open");
        }
        while source.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("processor stops")
            .expect("processor exits cleanly");
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_queue_reports_leftover_messages() {
        let (tx, mut rx) = mpsc::channel(4);
        for id in 0..3 {
            tx.send(message(id)).await.expect("queue open");
        }
        rx.close();
        assert_eq!(drain_queue(&mut rx), 3);
        assert_eq!(drain_queue(&mut rx), 0);
    }
}
