// =============================================================================
// ConfigStore — persistence chain
// =============================================================================
//
// One trait, three implementations: HTTP data-manager (primary, via
// `reqwest`), a JSON-document file store (fallback, atomic tmp+rename), and a
// `rusqlite`-backed
// relational store (fallback, grounded on `tesser-ledger`'s
// `SqliteLedgerRepository` — open-per-call `Connection`, WAL journal mode).
// Environment defaults are the final fallback and are handled by
// `ConfigManager` directly since they are read-only and have no audit trail.

use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::model::{AuditRecord, VersionedDocument};
use crate::error::ConfigError;

#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Human-readable name for logging ("http", "document", "relational").
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<VersionedDocument>, ConfigError>;
    async fn put(&self, key: &str, document: &VersionedDocument) -> Result<(), ConfigError>;
    async fn delete(&self, key: &str) -> Result<(), ConfigError>;
    async fn append_audit(&self, record: &AuditRecord) -> Result<(), ConfigError>;
    async fn list_audit(&self, target: &str, limit: usize) -> Result<Vec<AuditRecord>, ConfigError>;
}

// -----------------------------------------------------------------------------
// HTTP data-manager store (primary)
// -----------------------------------------------------------------------------

pub struct HttpConfigStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpConfigStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("failed to build reqwest client");
        Self {
            base_url: base_url.into(),
            client,
        }
    }
}

#[async_trait]
impl ConfigStore for HttpConfigStore {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn get(&self, key: &str) -> Result<Option<VersionedDocument>, ConfigError> {
        let url = format!("{}/documents/{key}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ConfigError::Io(format!("data-manager GET failed: {e}")))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ConfigError::Io(format!("data-manager GET returned {}", resp.status())));
        }
        let doc: VersionedDocument = resp
            .json()
            .await
            .map_err(|e| ConfigError::Io(format!("data-manager response parse failed: {e}")))?;
        Ok(Some(doc))
    }

    async fn put(&self, key: &str, document: &VersionedDocument) -> Result<(), ConfigError> {
        let url = format!("{}/documents/{key}", self.base_url);
        let resp = self
            .client
            .put(&url)
            .json(document)
            .send()
            .await
            .map_err(|e| ConfigError::Io(format!("data-manager PUT failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(ConfigError::Io(format!("data-manager PUT returned {}", resp.status())));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ConfigError> {
        let url = format!("{}/documents/{key}", self.base_url);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| ConfigError::Io(format!("data-manager DELETE failed: {e}")))?;
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(ConfigError::Io(format!("data-manager DELETE returned {}", resp.status())));
        }
        Ok(())
    }

    async fn append_audit(&self, record: &AuditRecord) -> Result<(), ConfigError> {
        let url = format!("{}/audit", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(record)
            .send()
            .await
            .map_err(|e| ConfigError::Io(format!("data-manager audit POST failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(ConfigError::Io(format!("data-manager audit POST returned {}", resp.status())));
        }
        Ok(())
    }

    async fn list_audit(&self, target: &str, limit: usize) -> Result<Vec<AuditRecord>, ConfigError> {
        let url = format!("{}/audit/{target}?limit={limit}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ConfigError::Io(format!("data-manager audit GET failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(ConfigError::Io(format!("data-manager audit GET returned {}", resp.status())));
        }
        resp.json()
            .await
            .map_err(|e| ConfigError::Io(format!("data-manager audit response parse failed: {e}")))
    }
}

// -----------------------------------------------------------------------------
// JSON-document file store (fallback 1)
// -----------------------------------------------------------------------------

/// One JSON file per document key, plus an append-only newline-delimited
/// audit log file per target. Writes are atomic (write to `.tmp`, rename),
/// matching `RuntimeConfig::save`.
pub struct DocumentConfigStore {
    data_dir: PathBuf,
}

impl DocumentConfigStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    fn document_path(&self, key: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", key.replace(':', "_")))
    }

    fn audit_path(&self, target: &str) -> PathBuf {
        self.data_dir.join(format!("audit_{}.ndjson", target.replace(':', "_")))
    }

    fn atomic_write(path: &PathBuf, content: &str) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, content).map_err(|e| ConfigError::Io(e.to_string()))?;
        fs::rename(&tmp_path, path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for DocumentConfigStore {
    fn name(&self) -> &'static str {
        "document"
    }

    async fn get(&self, key: &str) -> Result<Option<VersionedDocument>, ConfigError> {
        let path = self.document_path(key);
        match fs::read_to_string(&path) {
            Ok(content) => {
                let doc: VersionedDocument = serde_json::from_str(&content)?;
                Ok(Some(doc))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::Io(e.to_string())),
        }
    }

    async fn put(&self, key: &str, document: &VersionedDocument) -> Result<(), ConfigError> {
        let path = self.document_path(key);
        let content = serde_json::to_string_pretty(document)?;
        Self::atomic_write(&path, &content)?;
        debug!(key, path = %path.display(), "document config saved (atomic)");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ConfigError> {
        let path = self.document_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ConfigError::Io(e.to_string())),
        }
    }

    async fn append_audit(&self, record: &AuditRecord) -> Result<(), ConfigError> {
        let path = self.audit_path(&record.target);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
        }
        let line = serde_json::to_string(record)?;
        use std::io::Write;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    async fn list_audit(&self, target: &str, limit: usize) -> Result<Vec<AuditRecord>, ConfigError> {
        let path = self.audit_path(target);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ConfigError::Io(e.to_string())),
        };
        let mut records: Vec<AuditRecord> = content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect();
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }
}

// -----------------------------------------------------------------------------
// Relational store (fallback 2)
// -----------------------------------------------------------------------------

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS config_documents (
    key TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    data TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS config_audit (
    id TEXT PRIMARY KEY,
    target TEXT NOT NULL,
    action TEXT NOT NULL,
    changed_by TEXT NOT NULL,
    reason TEXT NOT NULL,
    before TEXT,
    after TEXT,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS config_audit_target_idx ON config_audit(target, timestamp);
"#;

pub struct RelationalConfigStore {
    path: PathBuf,
}

impl RelationalConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let store = Self { path: path.into() };
        store.connect()?.execute_batch(SCHEMA)?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, ConfigError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Ok(conn)
    }
}

#[async_trait]
impl ConfigStore for RelationalConfigStore {
    fn name(&self) -> &'static str {
        "relational"
    }

    async fn get(&self, key: &str) -> Result<Option<VersionedDocument>, ConfigError> {
        let conn = self.connect()?;
        let result: Option<(i64, String)> = conn
            .query_row(
                "SELECT version, data FROM config_documents WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match result {
            Some((version, data)) => Ok(Some(VersionedDocument {
                version: version as u64,
                data: serde_json::from_str(&data)?,
            })),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, document: &VersionedDocument) -> Result<(), ConfigError> {
        let conn = self.connect()?;
        let data = serde_json::to_string(&document.data)?;
        conn.execute(
            "INSERT INTO config_documents (key, version, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET version = excluded.version, data = excluded.data",
            params![key, document.version as i64, data],
        )?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ConfigError> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM config_documents WHERE key = ?1", params![key])?;
        Ok(())
    }

    async fn append_audit(&self, record: &AuditRecord) -> Result<(), ConfigError> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO config_audit (id, target, action, changed_by, reason, before, after, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id.to_string(),
                record.target,
                record.action,
                record.changed_by,
                record.reason,
                record.before.as_ref().map(|v| v.to_string()),
                record.after.as_ref().map(|v| v.to_string()),
                record.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn list_audit(&self, target: &str, limit: usize) -> Result<Vec<AuditRecord>, ConfigError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, target, action, changed_by, reason, before, after, timestamp
             FROM config_audit WHERE target = ?1 ORDER BY timestamp DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![target, limit as i64], |row| {
            let id: String = row.get(0)?;
            let before: Option<String> = row.get(5)?;
            let after: Option<String> = row.get(6)?;
            let timestamp: String = row.get(7)?;
            Ok((id, row.get::<_, String>(1)?, row.get::<_, String>(2)?, row.get::<_, String>(3)?, row.get::<_, String>(4)?, before, after, timestamp))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, target, action, changed_by, reason, before, after, timestamp) = row?;
            records.push(AuditRecord {
                id: id.parse().map_err(|_| ConfigError::Io("corrupt audit id".to_string()))?,
                target,
                action,
                changed_by,
                reason,
                before: before.and_then(|s| serde_json::from_str(&s).ok()),
                after: after.and_then(|s| serde_json::from_str(&s).ok()),
                timestamp: timestamp
                    .parse()
                    .map_err(|_| ConfigError::Io("corrupt audit timestamp".to_string()))?,
            });
        }
        Ok(records)
    }
}

/// Read the full fallback chain top-down, returning the first hit.
pub async fn read_chain(stores: &[Box<dyn ConfigStore>], key: &str) -> Option<VersionedDocument> {
    for store in stores {
        match store.get(key).await {
            Ok(Some(doc)) => return Some(doc),
            Ok(None) => continue,
            Err(e) => warn!(store = store.name(), key, error = %e, "config store read failed, trying next"),
        }
    }
    None
}

/// Write to the first store in the chain that accepts it, also writing the
/// audit record there. Returns the name of the accepting store.
pub async fn write_chain(
    stores: &[Box<dyn ConfigStore>],
    key: &str,
    document: &VersionedDocument,
    audit: &AuditRecord,
) -> Result<&'static str, ConfigError> {
    let mut last_err = String::new();
    for store in stores {
        match store.put(key, document).await {
            Ok(()) => {
                if let Err(e) = store.append_audit(audit).await {
                    warn!(store = store.name(), error = %e, "config write succeeded but audit append failed");
                }
                return Ok(store.name());
            }
            Err(e) => {
                warn!(store = store.name(), key, error = %e, "config store write failed, trying next");
                last_err = e.to_string();
            }
        }
    }
    Err(ConfigError::AllStoresUnavailable(last_err))
}
