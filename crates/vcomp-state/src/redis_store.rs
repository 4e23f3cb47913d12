//! Redis-backed job store and callback ledger.
//!
//! Job records are hashes (`state`, `version`, `doc`). A transition reads
//! the record, applies the transition in Rust, then writes it back through
//! a Lua script that checks `state` and `version` have not moved. Losing the
//! version race is retried; a changed state is reported as a conflict.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use vcomp_models::{CallbackRecord, DeliveryState, Job, JobId, JobState, JobTransition, SharedClock};

use crate::error::{StateError, StateResult};
use crate::store::{CallbackLedger, ClaimOutcome, JobStore};

const MAX_CAS_RETRIES: u32 = 5;

const CREATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], 'state', ARGV[1], 'version', ARGV[2], 'doc', ARGV[3])
redis.call('EXPIRE', KEYS[1], ARGV[4])
return 1
"#;

const TRANSITION_SCRIPT: &str = r#"
local cur = redis.call('HMGET', KEYS[1], 'state', 'version')
if not cur[1] then
  return -1
end
if cur[1] ~= ARGV[1] then
  return 0
end
if cur[2] ~= ARGV[2] then
  return 2
end
redis.call('HSET', KEYS[1], 'state', ARGV[3], 'version', ARGV[4], 'doc', ARGV[5])
redis.call('EXPIRE', KEYS[1], ARGV[6])
if ARGV[7] ~= '' then
  redis.call('SET', KEYS[2], ARGV[7], 'EX', ARGV[6])
end
return 1
"#;

const CLAIM_SCRIPT: &str = r#"
local cur = redis.call('HMGET', KEYS[1], 'state', 'lease_ms', 'doc')
if cur[1] then
  if cur[1] ~= 'pending' then
    return {'settled', cur[3]}
  end
  if tonumber(cur[2]) > tonumber(ARGV[2]) then
    return {'in_progress', cur[3]}
  end
end
redis.call('HSET', KEYS[1], 'state', 'pending', 'lease_ms', ARGV[3], 'doc', ARGV[1])
redis.call('EXPIRE', KEYS[1], ARGV[4])
return {'claimed', ARGV[1]}
"#;

/// State store configuration.
#[derive(Debug, Clone)]
pub struct StateConfig {
    pub redis_url: String,
    pub key_prefix: String,
    /// How long job and callback records are kept after their last write
    pub retention: Duration,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "vcomp".to_string(),
            retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

impl StateConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            key_prefix: std::env::var("STATE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            retention: std::env::var("STATE_RETENTION_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention),
        }
    }
}

pub struct RedisJobStore {
    client: redis::Client,
    config: StateConfig,
    clock: SharedClock,
    create_script: redis::Script,
    transition_script: redis::Script,
    claim_script: redis::Script,
}

impl RedisJobStore {
    pub fn new(config: StateConfig, clock: SharedClock) -> StateResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            clock,
            create_script: redis::Script::new(CREATE_SCRIPT),
            transition_script: redis::Script::new(TRANSITION_SCRIPT),
            claim_script: redis::Script::new(CLAIM_SCRIPT),
        })
    }

    async fn conn(&self) -> StateResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    pub async fn ping(&self) -> StateResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    fn job_key(&self, job_id: &JobId) -> String {
        format!("{}:job:{}", self.config.key_prefix, job_id)
    }

    fn handle_key(&self, handle: &str) -> String {
        format!("{}:handle:{}", self.config.key_prefix, handle)
    }

    fn callback_key(&self, job_id: &JobId) -> String {
        format!("{}:callback:{}", self.config.key_prefix, job_id)
    }

    fn ttl_secs(&self) -> u64 {
        self.config.retention.as_secs().max(1)
    }

    fn decode_record(doc: Option<String>, job_id: &JobId) -> StateResult<CallbackRecord> {
        let doc = doc.ok_or_else(|| StateError::Corrupt(format!("callback record for {} has no doc", job_id)))?;
        Ok(serde_json::from_str(&doc)?)
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, job: Job) -> StateResult<Job> {
        let mut conn = self.conn().await?;
        let doc = serde_json::to_string(&job)?;

        let created: i32 = self
            .create_script
            .key(self.job_key(&job.id))
            .arg(job.state.as_str())
            .arg(job.version)
            .arg(doc)
            .arg(self.ttl_secs())
            .invoke_async(&mut conn)
            .await?;

        if created == 0 {
            return Err(StateError::AlreadyExists(job.id));
        }
        debug!(job_id = %job.id, "Created job record");
        Ok(job)
    }

    async fn get(&self, job_id: &JobId) -> StateResult<Job> {
        let mut conn = self.conn().await?;
        let doc: Option<String> = redis::cmd("HGET")
            .arg(self.job_key(job_id))
            .arg("doc")
            .query_async(&mut conn)
            .await?;

        let doc = doc.ok_or_else(|| StateError::NotFound(job_id.clone()))?;
        Ok(serde_json::from_str(&doc)?)
    }

    async fn transition(&self, job_id: &JobId, expected: JobState, transition: JobTransition) -> StateResult<Job> {
        let handle = match &transition {
            JobTransition::Stage1Submitted { external_handle } => external_handle.clone(),
            _ => String::new(),
        };

        for attempt in 0..MAX_CAS_RETRIES {
            let current = self.get(job_id).await?;
            if current.state != expected {
                return Err(StateError::Conflict {
                    job_id: job_id.clone(),
                    expected,
                    actual: current.state,
                });
            }

            let mut next = current.clone();
            next.apply(transition.clone(), self.clock.now())?;
            let doc = serde_json::to_string(&next)?;

            let mut conn = self.conn().await?;
            let outcome: i32 = self
                .transition_script
                .key(self.job_key(job_id))
                .key(self.handle_key(&handle))
                .arg(current.state.as_str())
                .arg(current.version)
                .arg(next.state.as_str())
                .arg(next.version)
                .arg(doc)
                .arg(self.ttl_secs())
                .arg(if handle.is_empty() { "" } else { job_id.as_str() })
                .invoke_async(&mut conn)
                .await?;

            match outcome {
                1 => {
                    debug!(job_id = %job_id, state = %next.state, "Job transitioned");
                    return Ok(next);
                }
                -1 => return Err(StateError::NotFound(job_id.clone())),
                // State moved underneath us; the next read reports the conflict
                0 => continue,
                _ => {
                    debug!(job_id = %job_id, attempt = attempt + 1, "Job version moved, retrying");
                    tokio::time::sleep(Duration::from_millis(20 * (attempt as u64 + 1))).await;
                }
            }
        }

        warn!(job_id = %job_id, "Job transition failed after {} attempts", MAX_CAS_RETRIES);
        Err(StateError::Contention(job_id.clone()))
    }

    async fn find_by_external_handle(&self, handle: &str) -> StateResult<Option<JobId>> {
        let mut conn = self.conn().await?;
        let id: Option<String> = redis::cmd("GET")
            .arg(self.handle_key(handle))
            .query_async(&mut conn)
            .await?;
        Ok(id.map(JobId::from_string))
    }
}

#[async_trait]
impl CallbackLedger for RedisJobStore {
    async fn claim_callback(&self, job_id: &JobId, lease: Duration) -> StateResult<ClaimOutcome> {
        let now = self.clock.now();
        let lease_expires_at = now + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::hours(1));
        let fresh = CallbackRecord::claimed(job_id.clone(), now, lease_expires_at);

        let mut conn = self.conn().await?;
        let (outcome, doc): (String, Option<String>) = self
            .claim_script
            .key(self.callback_key(job_id))
            .arg(serde_json::to_string(&fresh)?)
            .arg(millis(now))
            .arg(millis(lease_expires_at))
            .arg(self.ttl_secs())
            .invoke_async(&mut conn)
            .await?;

        let record = Self::decode_record(doc, job_id)?;
        Ok(match outcome.as_str() {
            "claimed" => ClaimOutcome::Claimed(record),
            "settled" => ClaimOutcome::Settled(record),
            _ => ClaimOutcome::InProgress(record),
        })
    }

    async fn settle_callback(
        &self,
        job_id: &JobId,
        state: DeliveryState,
        attempts: u32,
        last_error: Option<String>,
    ) -> StateResult<CallbackRecord> {
        let now = self.clock.now();
        let mut record = match self.get_callback(job_id).await? {
            Some(record) => record,
            None => CallbackRecord::claimed(job_id.clone(), now, now),
        };
        record.state = state;
        record.attempts = attempts;
        record.last_error = last_error;
        record.updated_at = now;

        let state_name = serde_json::to_value(state)?
            .as_str()
            .map(str::to_string)
            .unwrap_or_default();

        let mut conn = self.conn().await?;
        let key = self.callback_key(job_id);
        redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(&key)
            .arg("state")
            .arg(state_name)
            .arg("doc")
            .arg(serde_json::to_string(&record)?)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(self.ttl_secs())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(record)
    }

    async fn get_callback(&self, job_id: &JobId) -> StateResult<Option<CallbackRecord>> {
        let mut conn = self.conn().await?;
        let doc: Option<String> = redis::cmd("HGET")
            .arg(self.callback_key(job_id))
            .arg("doc")
            .query_async(&mut conn)
            .await?;
        doc.map(|d| serde_json::from_str(&d).map_err(StateError::from))
            .transpose()
    }
}
