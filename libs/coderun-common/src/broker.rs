use redis::aio::ConnectionLike;

use crate::types::Job;

/// Redis queue semantics shared by the API and the worker
/// Keeps key names in one place so the two sides never drift

pub const QUEUE_KEY: &str = "coderun:queue:jobs";
pub const EVENTS_CHANNEL: &str = "coderun:events:jobs";

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("malformed job payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Append a job to the tail of the queue
pub async fn push_job<C: ConnectionLike>(conn: &mut C, job: &Job) -> Result<(), BrokerError> {
    let payload = serde_json::to_string(job)?;
    redis::cmd("RPUSH")
        .arg(QUEUE_KEY)
        .arg(payload)
        .query_async::<_, ()>(conn)
        .await?;
    Ok(())
}

/// Block for up to `timeout_secs` waiting for the next job
/// Returns `Ok(None)` when the wait expired with an empty queue
pub async fn pop_job<C: ConnectionLike>(
    conn: &mut C,
    timeout_secs: f64,
) -> Result<Option<Job>, BrokerError> {
    let popped: Option<(String, String)> = redis::cmd("BLPOP")
        .arg(QUEUE_KEY)
        .arg(timeout_secs)
        .query_async(conn)
        .await?;

    match popped {
        Some((_, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
        None => Ok(None),
    }
}

/// Broadcast a job state change to every subscribed API instance
pub async fn publish_event<C: ConnectionLike>(conn: &mut C, job: &Job) -> Result<(), BrokerError> {
    let payload = serde_json::to_string(job)?;
    redis::cmd("PUBLISH")
        .arg(EVENTS_CHANNEL)
        .arg(payload)
        .query_async::<_, ()>(conn)
        .await?;
    Ok(())
}

/// Decode an event received on `EVENTS_CHANNEL`
pub fn decode_event(payload: &str) -> Result<Job, BrokerError> {
    Ok(serde_json::from_str(payload)?)
}
