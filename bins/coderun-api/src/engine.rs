// Job engine client: the only way the API reaches the execution backend

use async_trait::async_trait;
use coderun_common::broker::{self, BrokerError};
use coderun_common::types::{InvalidJob, Job, JobInput};
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Callback invoked by the engine on job state changes.
/// May be called from any task; must not block.
pub type JobListener = Box<dyn Fn(&Job) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    InvalidJob(#[from] InvalidJob),
    #[error("broker unavailable: {0}")]
    Broker(#[from] BrokerError),
}

/// Execution backend
///
/// Implementations must invoke `listener` once the job reaches a terminal
/// state, and must not invoke it for jobs they rejected.
#[async_trait]
pub trait JobEngine: Send + Sync {
    async fn submit_job(&self, job: JobInput, listener: JobListener) -> Result<Job, EngineError>;
}

struct Registration {
    listener: Arc<dyn Fn(&Job) + Send + Sync>,
    registered_at: Instant,
}

/// Listeners waiting for events, keyed by job id
#[derive(Clone, Default)]
struct ListenerRegistry {
    inner: Arc<Mutex<HashMap<Uuid, Registration>>>,
}

impl ListenerRegistry {
    fn register(&self, id: Uuid, listener: JobListener) {
        let registration = Registration {
            listener: Arc::from(listener),
            registered_at: Instant::now(),
        };
        self.lock().insert(id, registration);
    }

    fn remove(&self, id: &Uuid) {
        self.lock().remove(id);
    }

    /// Route one event to its listener. Terminal events retire the registration.
    fn dispatch(&self, job: &Job) {
        let listener = {
            let mut map = self.lock();
            if job.state.is_terminal() {
                map.remove(&job.id).map(|r| r.listener)
            } else {
                map.get(&job.id).map(|r| Arc::clone(&r.listener))
            }
        };

        match listener {
            Some(listener) => listener(job),
            None => debug!(job_id = %job.id, state = %job.state, "No listener for job event"),
        }
    }

    /// Drop registrations older than `ttl`; returns how many were dropped
    fn prune(&self, ttl: Duration) -> usize {
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, r| r.registered_at.elapsed() < ttl);
        before - map.len()
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Registration>> {
        // a listener that panicked cannot leave the map half-updated
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Engine backed by the shared Redis queue and the worker fleet
pub struct RedisEngine {
    conn: ConnectionManager,
    listeners: ListenerRegistry,
}

impl RedisEngine {
    /// Connect and start the event subscriber.
    /// Returns only once the subscription is active so no event is missed.
    pub async fn connect(redis_url: &str, listener_ttl: Duration) -> Result<Self, EngineError> {
        let client = redis::Client::open(redis_url).map_err(BrokerError::from)?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(BrokerError::from)?;

        let pubsub = subscribe(&client).await?;
        let listeners = ListenerRegistry::default();
        tokio::spawn(event_loop(client, pubsub, listeners.clone()));
        tokio::spawn(prune_periodically(listeners.clone(), listener_ttl));

        Ok(Self { conn, listeners })
    }
}

#[async_trait]
impl JobEngine for RedisEngine {
    async fn submit_job(&self, input: JobInput, listener: JobListener) -> Result<Job, EngineError> {
        input.validate()?;

        let job = Job::new(input);
        self.listeners.register(job.id, listener);

        let mut conn = self.conn.clone();
        if let Err(e) = broker::push_job(&mut conn, &job).await {
            self.listeners.remove(&job.id);
            return Err(e.into());
        }

        debug!(job_id = %job.id, pending = self.listeners.len(), "Job queued");
        Ok(job)
    }
}

async fn subscribe(client: &redis::Client) -> Result<redis::aio::PubSub, EngineError> {
    #[allow(deprecated)]
    let conn = client
        .get_async_connection()
        .await
        .map_err(BrokerError::from)?;
    let mut pubsub = conn.into_pubsub();
    pubsub
        .subscribe(broker::EVENTS_CHANNEL)
        .await
        .map_err(BrokerError::from)?;
    Ok(pubsub)
}

/// Background task: dispatch job events to listeners, reconnecting when the
/// subscription drops
async fn event_loop(
    client: redis::Client,
    mut pubsub: redis::aio::PubSub,
    listeners: ListenerRegistry,
) {
    info!("Job event subscriber started on {}", broker::EVENTS_CHANNEL);

    loop {
        {
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Unreadable job event payload: {}", e);
                        continue;
                    }
                };

                match broker::decode_event(&payload) {
                    Ok(job) => listeners.dispatch(&job),
                    Err(e) => warn!("Dropping malformed job event: {}", e),
                }
            }
        }

        error!("Job event subscription closed, reconnecting");
        pubsub = loop {
            tokio::time::sleep(Duration::from_secs(1)).await;
            match subscribe(&client).await {
                Ok(p) => break p,
                Err(e) => error!("Failed to resubscribe to job events: {}", e),
            }
        };
        info!("Job event subscriber reconnected");
    }
}

/// Background task: drop listeners older than `ttl`, whether or not any
/// events are arriving
async fn prune_periodically(listeners: ListenerRegistry, ttl: Duration) {
    let mut tick = tokio::time::interval((ttl / 2).max(Duration::from_millis(100)));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tick.tick().await;
        let pruned = listeners.prune(ttl);
        if pruned > 0 {
            warn!(pruned, "Dropped listeners for jobs that never finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderun_common::types::JobState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn job(state: JobState) -> Job {
        let mut job = Job::new(JobInput {
            name: "code execution".to_string(),
            tasks: vec![],
        });
        job.state = state;
        job
    }

    fn counting_listener(counter: &Arc<AtomicUsize>) -> JobListener {
        let counter = Arc::clone(counter);
        Box::new(move |_: &Job| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_dispatch_keeps_listener_until_terminal() {
        let registry = ListenerRegistry::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut j = job(JobState::Running);
        registry.register(j.id, counting_listener(&calls));

        registry.dispatch(&j);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);

        j.state = JobState::Completed;
        registry.dispatch(&j);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 0);

        // a duplicate terminal event finds nobody
        registry.dispatch(&j);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dispatch_ignores_unknown_jobs() {
        let registry = ListenerRegistry::default();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register(Uuid::new_v4(), counting_listener(&calls));

        registry.dispatch(&job(JobState::Completed));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_prune_drops_stale_registrations() {
        let registry = ListenerRegistry::default();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register(Uuid::new_v4(), counting_listener(&calls));

        assert_eq!(registry.prune(Duration::from_secs(60)), 0);
        assert_eq!(registry.prune(Duration::ZERO), 1);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_listeners_pruned_without_events() {
        let registry = ListenerRegistry::default();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register(Uuid::new_v4(), counting_listener(&calls));
        let pruner = tokio::spawn(prune_periodically(registry.clone(), Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(registry.len(), 1);

        // no event ever arrives; the timer alone retires the registration
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(registry.len(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        pruner.abort();
    }
}
