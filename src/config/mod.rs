// =============================================================================
// Configuration Manager (C7)
// =============================================================================

pub mod model;
pub mod store;
pub mod validation;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::error::ConfigError;
use model::{ApplicationConfig, AuditRecord, ConfigScope, StrategyConfig, VersionedDocument, APPLICATION_CONFIG_KEY};
use store::ConfigStore;

struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

/// Canonical source of runtime configuration. Reads walk the persistence
/// chain top-down (`read_chain`); writes attempt the chain in order and stop
/// at the first store that accepts them (`write_chain`) — primary-only
/// write, multi-read, per the resolved persistence-chain design. A 60s TTL
/// cache sits in front of both application and strategy config reads.
pub struct ConfigManager {
    stores: Vec<Box<dyn ConfigStore>>,
    env_defaults: ApplicationConfig,
    cache_ttl: Duration,
    application_cache: RwLock<Option<CacheEntry<ApplicationConfig>>>,
    strategy_cache: RwLock<HashMap<String, CacheEntry<StrategyConfig>>>,
    /// Dry-run mode validates and reports what a write *would* do without
    /// persisting it or appending an audit record.
    dry_run: bool,
}

impl ConfigManager {
    pub fn new(stores: Vec<Box<dyn ConfigStore>>, env_defaults: ApplicationConfig, dry_run: bool) -> Self {
        Self {
            stores,
            env_defaults,
            cache_ttl: Duration::from_secs(60),
            application_cache: RwLock::new(None),
            strategy_cache: RwLock::new(HashMap::new()),
            dry_run,
        }
    }

    // -------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------

    pub async fn get_application_config(&self) -> ApplicationConfig {
        if let Some(entry) = self.application_cache.read().as_ref() {
            if entry.expires_at > Instant::now() {
                return entry.value.clone();
            }
        }

        let config = match store::read_chain(&self.stores, APPLICATION_CONFIG_KEY).await {
            Some(doc) => serde_json::from_value(doc.data).unwrap_or_else(|_| self.env_defaults.clone()),
            None => self.env_defaults.clone(),
        };

        *self.application_cache.write() = Some(CacheEntry {
            value: config.clone(),
            expires_at: Instant::now() + self.cache_ttl,
        });
        config
    }

    /// Resolve the effective parameters for `strategy_id`, applying a
    /// per-symbol override over the global default when one exists. Neither
    /// existing is not an error — callers get an empty-object params value,
    /// meaning "use the strategy's own compiled-in defaults".
    pub async fn get_strategy_config(&self, strategy_id: &str, symbol: Option<&str>) -> StrategyConfig {
        let global = self.load_scoped(strategy_id, &ConfigScope::Global).await;

        let Some(symbol) = symbol else {
            return global.unwrap_or_else(|| default_strategy_config(strategy_id, ConfigScope::Global));
        };

        match self.load_scoped(strategy_id, &ConfigScope::Symbol(symbol.to_string())).await {
            Some(mut symbol_cfg) => {
                if let Some(global_cfg) = &global {
                    if let (Value::Object(global_params), Value::Object(symbol_params)) =
                        (&global_cfg.params, &mut symbol_cfg.params)
                    {
                        for (k, v) in global_params {
                            symbol_params.entry(k.clone()).or_insert_with(|| v.clone());
                        }
                    }
                }
                symbol_cfg
            }
            None => global.unwrap_or_else(|| default_strategy_config(strategy_id, ConfigScope::Global)),
        }
    }

    async fn load_scoped(&self, strategy_id: &str, scope: &ConfigScope) -> Option<StrategyConfig> {
        let key = StrategyConfig::storage_key(strategy_id, scope);
        if let Some(entry) = self.strategy_cache.read().get(&key) {
            if entry.expires_at > Instant::now() {
                return Some(entry.value.clone());
            }
        }

        let doc = store::read_chain(&self.stores, &key).await?;
        let config: StrategyConfig = serde_json::from_value(doc.data).ok()?;

        self.strategy_cache.write().insert(
            key,
            CacheEntry {
                value: config.clone(),
                expires_at: Instant::now() + self.cache_ttl,
            },
        );
        Some(config)
    }

    pub async fn list_audit(&self, target: &str, limit: usize) -> Result<Vec<AuditRecord>, ConfigError> {
        for store in &self.stores {
            if let Ok(records) = store.list_audit(target, limit).await {
                if !records.is_empty() {
                    return Ok(records);
                }
            }
        }
        Ok(Vec::new())
    }

    pub fn invalidate_cache(&self) {
        *self.application_cache.write() = None;
        self.strategy_cache.write().clear();
    }

    // -------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------

    pub async fn update_application_config(
        &self,
        patch: Value,
        changed_by: &str,
        reason: &str,
    ) -> Result<ApplicationConfig, ConfigError> {
        let current = self.get_application_config().await;
        let before = serde_json::to_value(&current)?;
        let merged = merge_patch(&before, &patch);
        let next: ApplicationConfig = serde_json::from_value(merged.clone())?;
        validation::validate_application_config(&next)?;

        if merged == before {
            info!(target = APPLICATION_CONFIG_KEY, "idempotent application config patch, no-op");
            return Ok(next);
        }

        if self.dry_run {
            info!(target = APPLICATION_CONFIG_KEY, "dry-run: application config patch validated, not persisted");
            return Ok(next);
        }

        let current_doc = store::read_chain(&self.stores, APPLICATION_CONFIG_KEY).await;
        let version = current_doc.map(|d| d.version + 1).unwrap_or(1);
        let document = VersionedDocument { version, data: merged.clone() };
        let audit = AuditRecord {
            id: Uuid::new_v4(),
            target: APPLICATION_CONFIG_KEY.to_string(),
            action: "updated".to_string(),
            changed_by: changed_by.to_string(),
            reason: reason.to_string(),
            before: Some(before),
            after: Some(merged),
            timestamp: chrono::Utc::now(),
        };

        store::write_chain(&self.stores, APPLICATION_CONFIG_KEY, &document, &audit).await?;
        self.invalidate_cache();
        Ok(next)
    }

    pub async fn update_strategy_config(
        &self,
        strategy_id: &str,
        scope: ConfigScope,
        patch: Value,
        changed_by: &str,
        reason: &str,
    ) -> Result<StrategyConfig, ConfigError> {
        validation::validate_strategy_params(&patch)?;
        if let ConfigScope::Symbol(symbol) = &scope {
            validation::validate_symbol(symbol)?;
        }

        let key = StrategyConfig::storage_key(strategy_id, &scope);
        let current = self
            .load_scoped(strategy_id, &scope)
            .await
            .unwrap_or_else(|| default_strategy_config(strategy_id, scope.clone()));
        let before = serde_json::to_value(&current)?;
        let merged = merge_patch(&before, &patch);
        let next: StrategyConfig = serde_json::from_value(merged.clone())?;

        if merged == before {
            info!(strategy_id, scope = %scope, "idempotent strategy config patch, no-op");
            return Ok(next);
        }

        if self.dry_run {
            info!(strategy_id, scope = %scope, "dry-run: strategy config patch validated, not persisted");
            return Ok(next);
        }

        let current_doc = store::read_chain(&self.stores, &key).await;
        let version = current_doc.map(|d| d.version + 1).unwrap_or(1);
        let document = VersionedDocument { version, data: merged.clone() };
        let audit = AuditRecord {
            id: Uuid::new_v4(),
            target: key.clone(),
            action: "updated".to_string(),
            changed_by: changed_by.to_string(),
            reason: reason.to_string(),
            before: Some(before),
            after: Some(merged),
            timestamp: chrono::Utc::now(),
        };

        store::write_chain(&self.stores, &key, &document, &audit).await?;
        self.invalidate_cache();
        Ok(next)
    }

    pub async fn delete_strategy_config(
        &self,
        strategy_id: &str,
        scope: ConfigScope,
        changed_by: &str,
        reason: &str,
    ) -> Result<(), ConfigError> {
        let key = StrategyConfig::storage_key(strategy_id, &scope);

        if self.dry_run {
            info!(strategy_id, scope = %scope, "dry-run: strategy config delete validated, not persisted");
            return Ok(());
        }

        let before = store::read_chain(&self.stores, &key).await.map(|d| d.data);

        let mut last_err = None;
        for store in &self.stores {
            match store.delete(&key).await {
                Ok(()) => {
                    let audit = AuditRecord {
                        id: Uuid::new_v4(),
                        target: key.clone(),
                        action: "deleted".to_string(),
                        changed_by: changed_by.to_string(),
                        reason: reason.to_string(),
                        before,
                        after: None,
                        timestamp: chrono::Utc::now(),
                    };
                    let _ = store.append_audit(&audit).await;
                    self.invalidate_cache();
                    return Ok(());
                }
                Err(e) => last_err = Some(e.to_string()),
            }
        }
        Err(ConfigError::AllStoresUnavailable(last_err.unwrap_or_default()))
    }
}

fn default_strategy_config(strategy_id: &str, scope: ConfigScope) -> StrategyConfig {
    StrategyConfig {
        strategy_id: strategy_id.to_string(),
        scope,
        enabled: true,
        params: Value::Object(serde_json::Map::new()),
    }
}

/// Shallow JSON-merge patch: object keys in `patch` override `base`; a
/// `null` value deletes the key. Non-object inputs are replaced wholesale.
fn merge_patch(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            let mut merged = base_map.clone();
            for (k, v) in patch_map {
                if v.is_null() {
                    merged.remove(k);
                } else {
                    merged.insert(k.clone(), v.clone());
                }
            }
            Value::Object(merged)
        }
        (_, Value::Null) => base.clone(),
        _ => patch.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct InMemoryStore {
        docs: Mutex<HashMap<String, VersionedDocument>>,
        audit: Mutex<Vec<AuditRecord>>,
        fail: bool,
    }

    impl InMemoryStore {
        fn new(fail: bool) -> Self {
            Self {
                docs: Mutex::new(HashMap::new()),
                audit: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl ConfigStore for InMemoryStore {
        fn name(&self) -> &'static str {
            "memory"
        }

        async fn get(&self, key: &str) -> Result<Option<VersionedDocument>, ConfigError> {
            Ok(self.docs.lock().unwrap().get(key).cloned())
        }

        async fn put(&self, key: &str, document: &VersionedDocument) -> Result<(), ConfigError> {
            if self.fail {
                return Err(ConfigError::Io("simulated failure".to_string()));
            }
            self.docs.lock().unwrap().insert(key.to_string(), document.clone());
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), ConfigError> {
            self.docs.lock().unwrap().remove(key);
            Ok(())
        }

        async fn append_audit(&self, record: &AuditRecord) -> Result<(), ConfigError> {
            self.audit.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn list_audit(&self, target: &str, limit: usize) -> Result<Vec<AuditRecord>, ConfigError> {
            let mut records: Vec<AuditRecord> =
                self.audit.lock().unwrap().iter().filter(|r| r.target == target).cloned().collect();
            records.reverse();
            records.truncate(limit);
            Ok(records)
        }
    }

    fn manager(stores: Vec<Box<dyn ConfigStore>>) -> ConfigManager {
        ConfigManager::new(stores, ApplicationConfig::default(), false)
    }

    #[tokio::test]
    async fn update_application_config_persists_and_bumps_version() {
        let mgr = manager(vec![Box::new(InMemoryStore::new(false))]);
        let patch = serde_json::json!({"min_confidence": 0.7});
        let updated = mgr.update_application_config(patch, "tester", "tuning").await.unwrap();
        assert!((updated.min_confidence - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn reapplying_identical_patch_is_a_noop() {
        let mgr = manager(vec![Box::new(InMemoryStore::new(false))]);
        let patch = serde_json::json!({"min_confidence": 0.7});
        mgr.update_application_config(patch.clone(), "tester", "tuning").await.unwrap();
        mgr.invalidate_cache();
        let audit_before = mgr.list_audit(APPLICATION_CONFIG_KEY, 10).await.unwrap().len();
        mgr.update_application_config(patch, "tester", "tuning").await.unwrap();
        let audit_after = mgr.list_audit(APPLICATION_CONFIG_KEY, 10).await.unwrap().len();
        assert_eq!(audit_before, audit_after);
    }

    #[tokio::test]
    async fn write_falls_through_to_second_store_on_primary_failure() {
        let mgr = manager(vec![Box::new(InMemoryStore::new(true)), Box::new(InMemoryStore::new(false))]);
        let patch = serde_json::json!({"min_confidence": 0.8});
        let updated = mgr.update_application_config(patch, "tester", "tuning").await.unwrap();
        assert!((updated.min_confidence - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn all_stores_failing_surfaces_all_stores_unavailable() {
        let mgr = manager(vec![Box::new(InMemoryStore::new(true))]);
        let patch = serde_json::json!({"min_confidence": 0.8});
        let err = mgr.update_application_config(patch, "tester", "tuning").await.unwrap_err();
        assert!(matches!(err, ConfigError::AllStoresUnavailable(_)));
    }

    #[tokio::test]
    async fn dry_run_validates_without_persisting() {
        let mgr = ConfigManager::new(vec![Box::new(InMemoryStore::new(false))], ApplicationConfig::default(), true);
        let patch = serde_json::json!({"min_confidence": 0.9});
        mgr.update_application_config(patch, "tester", "tuning").await.unwrap();
        let audit = mgr.list_audit(APPLICATION_CONFIG_KEY, 10).await.unwrap();
        assert!(audit.is_empty());
    }

    #[tokio::test]
    async fn symbol_scope_inherits_unset_fields_from_global() {
        let mgr = manager(vec![Box::new(InMemoryStore::new(false))]);
        mgr.update_strategy_config(
            "momentum_pulse",
            ConfigScope::Global,
            serde_json::json!({"params": {"rsi_buy_floor": 50.0}}),
            "tester",
            "set global",
        )
        .await
        .unwrap();
        mgr.update_strategy_config(
            "momentum_pulse",
            ConfigScope::Symbol("BTCUSDT".to_string()),
            serde_json::json!({"params": {"rsi_buy_ceiling": 65.0}}),
            "tester",
            "set symbol override",
        )
        .await
        .unwrap();

        let effective = mgr.get_strategy_config("momentum_pulse", Some("BTCUSDT")).await;
        let params = effective.params.as_object().unwrap();
        assert_eq!(params.get("rsi_buy_ceiling").unwrap(), &serde_json::json!(65.0));
        assert_eq!(params.get("rsi_buy_floor").unwrap(), &serde_json::json!(50.0));
    }
}
