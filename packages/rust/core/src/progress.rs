//! Progress reporting and the per-job broadcast hub.
//!
//! The research agent reports through a [`ProgressSink`]. Workers bind the
//! sink to a [`ProgressHub`] topic keyed by job id, and observers read the
//! topic through a [`Subscription`].
//!
//! Delivery is live only: an event published while nobody is subscribed is
//! dropped, and a late subscriber never sees earlier events.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use leadscout_shared::{JobId, ProgressEvent};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Buffered events per topic before slow subscribers start lagging.
const TOPIC_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Sink trait
// ---------------------------------------------------------------------------

/// Receives progress events as a run produces them.
///
/// `emit` must not block; it is called inline from the research loop.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

/// No-op sink for headless/test usage.
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

// ---------------------------------------------------------------------------
// Hub
// ---------------------------------------------------------------------------

struct HubInner {
    topics: DashMap<JobId, broadcast::Sender<ProgressEvent>>,
    /// Jobs that reached a final status, with the time they did.
    finished: DashMap<JobId, Instant>,
}

/// Registry of per-job broadcast topics. Cheap to clone.
#[derive(Clone)]
pub struct ProgressHub {
    inner: Arc<HubInner>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                topics: DashMap::new(),
                finished: DashMap::new(),
            }),
        }
    }

    /// Fire-and-forget publish to every current subscriber of `job_id`.
    pub fn publish(&self, job_id: &JobId, event: ProgressEvent) {
        if let Some(sender) = self.inner.topics.get(job_id) {
            // Err only means every receiver is gone.
            let _ = sender.send(event);
        }
    }

    /// Open an observation session for `job_id`.
    ///
    /// If the job already finished, the subscription is closed from the start.
    pub fn subscribe(&self, job_id: &JobId) -> Subscription {
        let receiver = if self.inner.finished.contains_key(job_id) {
            debug!(%job_id, "subscribe to finished job");
            None
        } else {
            let sender = self
                .inner
                .topics
                .entry(job_id.clone())
                .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);
            Some(sender.subscribe())
        };

        let mut subscription = Subscription {
            job_id: job_id.clone(),
            receiver,
            hub: Arc::clone(&self.inner),
        };
        // The job may have finished between the check and the insert.
        if self.inner.finished.contains_key(job_id) {
            subscription.close();
        }
        subscription
    }

    /// Record that `job_id` reached a final status and close its topic.
    ///
    /// Open subscriptions still drain events already published, then end.
    pub fn mark_finished(&self, job_id: &JobId) {
        self.inner.finished.insert(job_id.clone(), Instant::now());
        self.inner.topics.remove(job_id);
    }

    /// Forget finished markers older than `retention`. Returns how many were dropped.
    pub fn reap(&self, retention: Duration) -> usize {
        let before = self.inner.finished.len();
        self.inner
            .finished
            .retain(|_, finished_at| finished_at.elapsed() < retention);
        before - self.inner.finished.len()
    }

    /// Number of topics with at least one live subscriber.
    pub fn topic_count(&self) -> usize {
        self.inner.topics.len()
    }

    /// A sink that publishes onto `job_id`'s topic.
    pub fn publisher(&self, job_id: JobId) -> TopicPublisher {
        TopicPublisher {
            hub: self.clone(),
            job_id,
        }
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

/// [`ProgressSink`] bound to one hub topic.
pub struct TopicPublisher {
    hub: ProgressHub,
    job_id: JobId,
}

impl ProgressSink for TopicPublisher {
    fn emit(&self, event: ProgressEvent) {
        self.hub.publish(&self.job_id, event);
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// One observer's view of a job's progress.
///
/// Dropping the last subscription of a topic removes the topic.
pub struct Subscription {
    job_id: JobId,
    receiver: Option<broadcast::Receiver<ProgressEvent>>,
    hub: Arc<HubInner>,
}

impl Subscription {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Whether the session has ended.
    pub fn is_closed(&self) -> bool {
        self.receiver.is_none()
    }

    /// Next event in publish order.
    ///
    /// Returns `None` once a terminal event has been delivered, the topic
    /// closed, or the job had already finished when subscribing.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            let receiver = self.receiver.as_mut()?;
            let received = receiver.recv().await;
            match received {
                Ok(event) => {
                    if event.is_terminal() {
                        self.close();
                    }
                    return Some(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(job_id = %self.job_id, skipped, "progress subscriber lagged");
                }
                Err(RecvError::Closed) => {
                    self.close();
                    return None;
                }
            }
        }
    }

    fn close(&mut self) {
        if self.receiver.take().is_some() {
            self.hub
                .topics
                .remove_if(&self.job_id, |_, sender| sender.receiver_count() == 0);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadscout_shared::ProgressStep;
    use std::sync::Mutex;

    fn event(step: ProgressStep, message: &str) -> ProgressEvent {
        ProgressEvent::new(step, message)
    }

    #[test]
    fn closure_sink_receives_events() {
        let seen = Mutex::new(Vec::new());
        let sink = |e: ProgressEvent| seen.lock().unwrap().push(e.step);
        sink.emit(event(ProgressStep::Start, "go"));
        SilentProgress.emit(event(ProgressStep::Start, "ignored"));
        assert_eq!(*seen.lock().unwrap(), vec![ProgressStep::Start]);
    }

    #[tokio::test]
    async fn every_subscriber_gets_every_event_in_order() {
        let hub = ProgressHub::new();
        let job = JobId::new();
        let mut first = hub.subscribe(&job);
        let mut second = hub.subscribe(&job);

        let publisher = hub.publisher(job.clone());
        publisher.emit(event(ProgressStep::Start, "Fetching initial data..."));
        publisher.emit(event(ProgressStep::Search, "Searching"));
        publisher.emit(event(ProgressStep::Complete, "Enrichment complete!"));

        for sub in [&mut first, &mut second] {
            assert_eq!(sub.recv().await.unwrap().step, ProgressStep::Start);
            assert_eq!(sub.recv().await.unwrap().step, ProgressStep::Search);
            assert_eq!(sub.recv().await.unwrap().step, ProgressStep::Complete);
            assert!(sub.recv().await.is_none());
            assert!(sub.is_closed());
        }
        assert_eq!(hub.topic_count(), 0);
    }

    #[tokio::test]
    async fn events_without_subscribers_are_dropped() {
        let hub = ProgressHub::new();
        let job = JobId::new();
        hub.publish(&job, event(ProgressStep::Start, "nobody listening"));
        assert_eq!(hub.topic_count(), 0);

        let mut late = hub.subscribe(&job);
        hub.publish(&job, event(ProgressStep::Info, "live"));
        assert_eq!(late.recv().await.unwrap().message, "live");
    }

    #[tokio::test]
    async fn subscriber_after_completion_gets_nothing() {
        let hub = ProgressHub::new();
        let job = JobId::new();
        hub.publish(&job, event(ProgressStep::Complete, "Enrichment complete!"));
        hub.mark_finished(&job);

        let mut late = hub.subscribe(&job);
        assert!(late.is_closed());
        assert!(late.recv().await.is_none());
        assert_eq!(hub.topic_count(), 0);
    }

    #[tokio::test]
    async fn mark_finished_drains_then_closes() {
        let hub = ProgressHub::new();
        let job = JobId::new();
        let mut sub = hub.subscribe(&job);

        hub.publish(&job, event(ProgressStep::Validation, "Validating final payload..."));
        hub.mark_finished(&job);

        assert_eq!(sub.recv().await.unwrap().step, ProgressStep::Validation);
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn dropping_last_subscription_releases_topic() {
        let hub = ProgressHub::new();
        let job = JobId::new();
        let a = hub.subscribe(&job);
        let b = hub.subscribe(&job);
        assert_eq!(hub.topic_count(), 1);
        drop(a);
        assert_eq!(hub.topic_count(), 1);
        drop(b);
        assert_eq!(hub.topic_count(), 0);
    }

    #[test]
    fn reap_forgets_old_markers() {
        let hub = ProgressHub::new();
        let job = JobId::new();
        hub.mark_finished(&job);
        assert_eq!(hub.reap(Duration::from_secs(3600)), 0);
        assert_eq!(hub.reap(Duration::ZERO), 1);
        assert!(!hub.subscribe(&job).is_closed());
    }
}
