//! Redis-backed credential store.
//!
//! Each record is a hash at `credential:{id}` with two string indexes,
//! `credential_subject:{subject}` and `credential_fingerprint:{fingerprint}`,
//! both pointing at the record id. Every mutation runs as one Lua script so
//! the record and its indexes change together.

use super::{CredentialRecord, CredentialStore, RecordId, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ErrorKind, RedisError, Script};
use std::collections::HashMap;
use tracing::instrument;

const RECORD_PREFIX: &str = "credential:";
const SUBJECT_PREFIX: &str = "credential_subject:";
const FINGERPRINT_PREFIX: &str = "credential_fingerprint:";

static CREATE_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        local previous = redis.call('GET', KEYS[1])
        if previous then
            local previous_key = ARGV[5] .. previous
            local previous_fp = redis.call('HGET', previous_key, 'refresh_fingerprint')
            if previous_fp then
                redis.call('DEL', ARGV[6] .. previous_fp)
            end
            redis.call('DEL', previous_key)
        end
        redis.call('HSET', KEYS[2],
            'record_id', ARGV[1],
            'subject', ARGV[2],
            'bound_address', ARGV[3],
            'rotation_count', '0',
            'created_at', ARGV[4])
        redis.call('SET', KEYS[1], ARGV[1])
        return 1
        ",
    )
});

static SET_FINGERPRINT_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return 0
        end
        local previous = redis.call('HGET', KEYS[1], 'refresh_fingerprint')
        if previous then
            redis.call('DEL', ARGV[2] .. previous)
        end
        redis.call('HSET', KEYS[1], 'refresh_fingerprint', ARGV[1])
        redis.call('SET', ARGV[2] .. ARGV[1], ARGV[3])
        return 1
        ",
    )
});

static REPLACE_FINGERPRINT_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return -1
        end
        local current = redis.call('HGET', KEYS[1], 'refresh_fingerprint')
        if current ~= ARGV[1] then
            return 0
        end
        redis.call('DEL', ARGV[5] .. current)
        redis.call('HSET', KEYS[1],
            'refresh_fingerprint', ARGV[2],
            'bound_address', ARGV[3],
            'rotated_at', ARGV[4])
        redis.call('HINCRBY', KEYS[1], 'rotation_count', 1)
        redis.call('SET', ARGV[5] .. ARGV[2], ARGV[6])
        return 1
        ",
    )
});

fn record_key(record_id: RecordId) -> String {
    format!("{RECORD_PREFIX}{record_id}")
}

fn subject_key(subject: &str) -> String {
    format!("{SUBJECT_PREFIX}{subject}")
}

fn fingerprint_key(fingerprint: &str) -> String {
    format!("{FINGERPRINT_PREFIX}{fingerprint}")
}

/// Reduce a Redis error to a category that carries no addresses or payloads.
fn sanitize(operation: &'static str, err: &RedisError) -> StoreError {
    let reason = match err.kind() {
        ErrorKind::IoError => "connection failure",
        ErrorKind::AuthenticationFailed => "authentication failed",
        ErrorKind::BusyLoadingError | ErrorKind::TryAgain => "backend busy",
        ErrorKind::ResponseError | ErrorKind::ExtensionError => "command rejected",
        ErrorKind::TypeError => "unexpected reply type",
        _ => "backend error",
    };
    StoreError::backend(operation, reason)
}

fn parse_record(
    operation: &'static str,
    mut fields: HashMap<String, String>,
) -> Result<CredentialRecord, StoreError> {
    if fields.is_empty() {
        return Err(StoreError::RecordNotFound);
    }

    let mut take = |name: &str| {
        fields
            .remove(name)
            .ok_or_else(|| StoreError::backend(operation, format!("record missing {name}")))
    };
    let corrupt = |name: &str| StoreError::backend(operation, format!("record has invalid {name}"));

    let record_id = take("record_id")?
        .parse::<RecordId>()
        .map_err(|_| corrupt("record_id"))?;
    let subject = take("subject")?;
    let bound_address = take("bound_address")?;
    let rotation_count = take("rotation_count")?
        .parse::<u32>()
        .map_err(|_| corrupt("rotation_count"))?;
    let created_at = take("created_at")?
        .parse::<DateTime<Utc>>()
        .map_err(|_| corrupt("created_at"))?;
    let rotated_at = take("rotated_at")
        .ok()
        .map(|raw| raw.parse::<DateTime<Utc>>())
        .transpose()
        .map_err(|_| corrupt("rotated_at"))?;
    let refresh_fingerprint = take("refresh_fingerprint").ok();

    Ok(CredentialRecord {
        record_id,
        subject,
        bound_address,
        refresh_fingerprint,
        rotation_count,
        created_at,
        rotated_at,
    })
}

/// Credential store on Redis.
pub struct RedisCredentialStore {
    conn: ConnectionManager,
}

impl RedisCredentialStore {
    /// Connect to Redis at `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the URL is invalid or the connection fails.
    pub async fn new(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url).map_err(|e| sanitize("connect", &e))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| sanitize("connect", &e))?;

        Ok(Self { conn })
    }

    async fn load(
        &self,
        operation: &'static str,
        record_id: RecordId,
    ) -> Result<CredentialRecord, StoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(record_key(record_id))
            .await
            .map_err(|e| sanitize(operation, &e))?;
        parse_record(operation, fields)
    }
}

#[async_trait]
impl CredentialStore for RedisCredentialStore {
    #[instrument(skip(self, subject, bound_address))]
    async fn create(
        &self,
        subject: &str,
        bound_address: &str,
        now: DateTime<Utc>,
    ) -> Result<RecordId, StoreError> {
        let record = CredentialRecord::new(subject, bound_address, now);
        let mut conn = self.conn.clone();

        let _: i64 = CREATE_SCRIPT
            .key(subject_key(subject))
            .key(record_key(record.record_id))
            .arg(record.record_id.to_string())
            .arg(subject)
            .arg(bound_address)
            .arg(record.created_at.to_rfc3339())
            .arg(RECORD_PREFIX)
            .arg(FINGERPRINT_PREFIX)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| sanitize("create", &e))?;

        Ok(record.record_id)
    }

    #[instrument(skip(self, fingerprint))]
    async fn set_fingerprint(
        &self,
        record_id: RecordId,
        fingerprint: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();

        let status: i64 = SET_FINGERPRINT_SCRIPT
            .key(record_key(record_id))
            .arg(fingerprint)
            .arg(FINGERPRINT_PREFIX)
            .arg(record_id.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| sanitize("set_fingerprint", &e))?;

        match status {
            1 => Ok(()),
            _ => Err(StoreError::RecordNotFound),
        }
    }

    #[instrument(skip(self, expected, next, bound_address))]
    async fn replace_fingerprint(
        &self,
        record_id: RecordId,
        expected: &str,
        next: &str,
        bound_address: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();

        let status: i64 = REPLACE_FINGERPRINT_SCRIPT
            .key(record_key(record_id))
            .arg(expected)
            .arg(next)
            .arg(bound_address)
            .arg(now.to_rfc3339())
            .arg(FINGERPRINT_PREFIX)
            .arg(record_id.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| sanitize("replace_fingerprint", &e))?;

        match status {
            1 => Ok(()),
            0 => Err(StoreError::FingerprintConflict),
            _ => Err(StoreError::RecordNotFound),
        }
    }

    #[instrument(skip(self, fingerprint))]
    async fn get_by_fingerprint(&self, fingerprint: &str) -> Result<CredentialRecord, StoreError> {
        let mut conn = self.conn.clone();
        let record_id: Option<String> = conn
            .get(fingerprint_key(fingerprint))
            .await
            .map_err(|e| sanitize("get_by_fingerprint", &e))?;

        let record_id = record_id
            .ok_or(StoreError::RecordNotFound)?
            .parse::<RecordId>()
            .map_err(|_| StoreError::backend("get_by_fingerprint", "index has invalid record_id"))?;

        let record = self.load("get_by_fingerprint", record_id).await?;
        if record.holds_fingerprint(fingerprint) {
            Ok(record)
        } else {
            Err(StoreError::RecordNotFound)
        }
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, record_id: RecordId) -> Result<CredentialRecord, StoreError> {
        self.load("get_by_id", record_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_key_layout() {
        let id = uuid::Uuid::nil();
        assert_eq!(
            record_key(id),
            "credential:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(subject_key("user-1"), "credential_subject:user-1");
        assert_eq!(fingerprint_key("fp"), "credential_fingerprint:fp");
    }

    #[test]
    fn test_parse_empty_hash_is_not_found() {
        assert!(matches!(
            parse_record("get_by_id", HashMap::new()),
            Err(StoreError::RecordNotFound)
        ));
    }

    #[test]
    fn test_parse_provisioned_record() {
        let id = uuid::Uuid::new_v4().to_string();
        let record = parse_record(
            "get_by_id",
            fields(&[
                ("record_id", &id),
                ("subject", "user-1"),
                ("bound_address", "10.0.0.1"),
                ("rotation_count", "0"),
                ("created_at", "2025-01-01T00:00:00+00:00"),
            ]),
        )
        .unwrap();

        assert_eq!(record.record_id.to_string(), id);
        assert!(record.refresh_fingerprint.is_none());
        assert!(record.rotated_at.is_none());
    }

    #[test]
    fn test_parse_rotated_record() {
        let id = uuid::Uuid::new_v4().to_string();
        let record = parse_record(
            "get_by_id",
            fields(&[
                ("record_id", &id),
                ("subject", "user-1"),
                ("bound_address", "10.0.0.1"),
                ("rotation_count", "3"),
                ("created_at", "2025-01-01T00:00:00+00:00"),
                ("rotated_at", "2025-01-02T00:00:00+00:00"),
                ("refresh_fingerprint", "fp"),
            ]),
        )
        .unwrap();

        assert_eq!(record.rotation_count, 3);
        assert!(record.holds_fingerprint("fp"));
        assert!(record.rotated_at.is_some());
    }

    #[test]
    fn test_parse_corrupt_record() {
        let result = parse_record(
            "get_by_id",
            fields(&[
                ("record_id", "not-a-uuid"),
                ("subject", "user-1"),
                ("bound_address", "10.0.0.1"),
                ("rotation_count", "0"),
                ("created_at", "2025-01-01T00:00:00+00:00"),
            ]),
        );
        assert!(matches!(result, Err(StoreError::Backend { .. })));
    }

    #[test]
    fn test_sanitize_hides_details() {
        let err = RedisError::from((ErrorKind::IoError, "connect", "10.1.2.3:6379".to_string()));
        let StoreError::Backend { operation, reason } = sanitize("create", &err) else {
            panic!("expected backend error");
        };
        assert_eq!(operation, "create");
        assert!(!reason.contains("10.1.2.3"));
    }
}
