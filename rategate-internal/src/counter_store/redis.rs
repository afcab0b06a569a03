use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tokio::time::timeout;

use crate::counter_store::{CounterSnapshot, CounterStore, EvalOutcome};
use crate::error::{Error, ErrorDetails};

/// The atomic multi-limit evaluator, as one server-side script.
///
/// KEYS[1..n] are the counter keys; ARGV[1..n] the ceilings; ARGV[n+1..2n]
/// the TTLs to establish on first write. Phase 1 only reads: the first key
/// whose count already meets its ceiling aborts the whole operation before
/// anything is written. Phase 2 increments every key and sets the TTL on
/// keys it created. The read-then-write sequence is safe because Redis runs
/// the script without interleaving any other command.
const CHECK_AND_INCREMENT_SCRIPT: &str = r#"
local n = #KEYS
for i = 1, n do
    local current = tonumber(redis.call('GET', KEYS[i]) or '0')
    local limit = tonumber(ARGV[i])
    if current >= limit then
        local ttl = redis.call('TTL', KEYS[i])
        if ttl < 0 then
            ttl = tonumber(ARGV[n + i])
        end
        return {0, i - 1, current, limit, ttl}
    end
end
local result = {1, 0}
local max_ttl = 0
for i = 1, n do
    local count = redis.call('INCR', KEYS[i])
    if count == 1 then
        redis.call('EXPIRE', KEYS[i], ARGV[n + i])
    end
    local ttl = tonumber(ARGV[n + i])
    if ttl > max_ttl then
        max_ttl = ttl
    end
    result[i + 2] = count
end
result[2] = max_ttl
return result
"#;

/// Counter store backed by a shared Redis instance.
pub struct RedisCounterStore {
    conn: MultiplexedConnection,
    check_and_increment_script: Script,
    op_timeout: Duration,
}

impl RedisCounterStore {
    pub async fn new(url: &str, timeout_ms: u64) -> Result<Self, Error> {
        let client = redis::Client::open(url).map_err(|e| {
            Error::new(ErrorDetails::Config {
                message: format!("Failed to create Redis client: {e}"),
            })
        })?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                Error::new(ErrorDetails::Config {
                    message: format!("Failed to connect to Redis: {e}"),
                })
            })?;

        Ok(Self {
            conn,
            check_and_increment_script: Script::new(CHECK_AND_INCREMENT_SCRIPT),
            op_timeout: Duration::from_millis(timeout_ms),
        })
    }

    /// Run a Redis future under the operation timeout, mapping both transport
    /// errors and timeouts to `CounterStore` (the admission path fails closed).
    async fn run<T>(
        &self,
        op: impl std::future::Future<Output = Result<T, redis::RedisError>>,
    ) -> Result<T, Error> {
        match timeout(self.op_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::new(ErrorDetails::CounterStore {
                message: e.to_string(),
            })),
            Err(_) => Err(Error::new(ErrorDetails::CounterStore {
                message: format!("operation timed out after {:?}", self.op_timeout),
            })),
        }
    }

    fn parse_script_result(raw: Vec<i64>) -> Result<EvalOutcome, Error> {
        let malformed = || {
            Error::new(ErrorDetails::CounterStore {
                message: format!("unexpected script reply: {raw:?}"),
            })
        };
        match raw.first() {
            Some(1) => {
                if raw.len() < 2 {
                    return Err(malformed());
                }
                Ok(EvalOutcome::Admitted {
                    max_ttl_seconds: raw[1],
                    counts: raw[2..].iter().map(|c| (*c).max(0) as u64).collect(),
                })
            }
            Some(0) => {
                if raw.len() < 5 {
                    return Err(malformed());
                }
                Ok(EvalOutcome::Denied {
                    failed_index: raw[1].max(0) as usize,
                    current: raw[2].max(0) as u64,
                    ceiling: raw[3].max(0) as u64,
                    retry_after_seconds: raw[4].max(0),
                })
            }
            _ => Err(malformed()),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn check_and_increment(
        &self,
        keys: &[String],
        ceilings: &[u64],
        ttls: &[i64],
    ) -> Result<EvalOutcome, Error> {
        let mut conn = self.conn.clone();
        let mut invocation = self.check_and_increment_script.prepare_invoke();
        for key in keys {
            invocation.key(key.as_str());
        }
        for ceiling in ceilings {
            invocation.arg(*ceiling);
        }
        for ttl in ttls {
            invocation.arg(*ttl);
        }
        let raw: Vec<i64> = self.run(invocation.invoke_async(&mut conn)).await?;
        Self::parse_script_result(raw)
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, Error> {
        let mut conn = self.conn.clone();
        self.run(conn.get::<_, Option<String>>(key)).await
    }

    async fn set_value(&self, key: &str, value: &str, ttl_seconds: i64) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        self.run(conn.set_ex::<_, _, ()>(key, value, ttl_seconds.max(1) as u64))
            .await
    }

    async fn delete(&self, key: &str) -> Result<u64, Error> {
        let mut conn = self.conn.clone();
        self.run(conn.del::<_, u64>(key)).await
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, Error> {
        let mut conn = self.conn.clone();
        let mut cursor = 0u64;
        let mut removed = 0u64;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = self
                .run(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(100)
                        .query_async(&mut conn),
                )
                .await?;
            if !keys.is_empty() {
                removed += self.run(conn.del::<_, u64>(keys)).await?;
            }
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(removed)
    }

    async fn peek_counter(&self, key: &str) -> Result<Option<CounterSnapshot>, Error> {
        let mut conn = self.conn.clone();
        let count: Option<u64> = self.run(conn.get(key)).await?;
        match count {
            None => Ok(None),
            Some(count) => {
                let ttl_seconds: i64 = self.run(conn.ttl(key)).await?;
                Ok(Some(CounterSnapshot { count, ttl_seconds }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_admitted_reply() {
        let outcome = RedisCounterStore::parse_script_result(vec![1, 60, 3, 17]).unwrap();
        assert_eq!(
            outcome,
            EvalOutcome::Admitted {
                max_ttl_seconds: 60,
                counts: vec![3, 17],
            }
        );
    }

    #[test]
    fn test_parse_denied_reply() {
        let outcome = RedisCounterStore::parse_script_result(vec![0, 1, 5, 5, 42]).unwrap();
        assert_eq!(
            outcome,
            EvalOutcome::Denied {
                failed_index: 1,
                current: 5,
                ceiling: 5,
                retry_after_seconds: 42,
            }
        );
    }

    #[test]
    fn test_parse_malformed_reply() {
        assert!(RedisCounterStore::parse_script_result(vec![]).is_err());
        assert!(RedisCounterStore::parse_script_result(vec![0, 1]).is_err());
        assert!(RedisCounterStore::parse_script_result(vec![2, 0]).is_err());
    }
}
