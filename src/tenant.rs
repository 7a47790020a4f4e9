use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::auditor;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;

/// Manages per-property engines. Each property gets its own Engine + WAL +
/// auditor. Property = first path segment of every API route.
///
/// Engines are keyed by the property's canonical name, which is also the WAL
/// file stem, so two spellings can never share one log.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    audit_interval: Option<Duration>,
}

/// Canonical property name: ASCII letters, digits, `_` and `-`, lowercased.
/// Anything else is refused rather than stripped, so a name maps to exactly
/// one WAL file and no path can escape `data_dir`.
fn canonical_name(property: &str) -> std::io::Result<String> {
    let invalid = |msg: &'static str| std::io::Error::new(std::io::ErrorKind::InvalidInput, msg);
    if property.is_empty() {
        return Err(invalid("empty property name"));
    }
    if property.len() > MAX_TENANT_NAME_LEN {
        return Err(invalid("property name too long"));
    }
    if !property
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(invalid("property name may only contain letters, digits, '_' and '-'"));
    }
    Ok(property.to_ascii_lowercase())
}

impl TenantManager {
    /// `audit_interval` of `None` disables the background reconciliation scan.
    pub fn new(data_dir: PathBuf, audit_interval: Option<Duration>) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            audit_interval,
        }
    }

    /// Get or lazily create an engine for the given property. Only admin
    /// routes create properties; public routes go through [`Self::get`].
    pub fn get_or_create(&self, property: &str) -> std::io::Result<Arc<Engine>> {
        let name = canonical_name(property)?;
        if let Some(engine) = self.engines.get(&name) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(std::io::Error::other("too many properties"));
        }

        // Two first requests for one property race here; the entry API makes
        // the loser reuse the winner's engine.
        let engine = match self.engines.entry(name.clone()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{name}.wal"));
                let engine = Arc::new(Engine::open(&wal_path, Arc::new(NotifyHub::new()))?);
                slot.insert(engine.clone());
                engine
            }
        };

        if let Some(period) = self.audit_interval {
            let auditor_engine = engine.clone();
            let property = name.clone();
            tokio::spawn(async move {
                auditor::run_auditor(property, auditor_engine, period).await;
            });
        }

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!(property = %name, "property loaded");
        Ok(engine)
    }

    /// A property that is already loaded or has a WAL on disk. Never creates
    /// a new property; unknown or malformed names yield `None`.
    pub fn get(&self, property: &str) -> std::io::Result<Option<Arc<Engine>>> {
        let Ok(name) = canonical_name(property) else {
            return Ok(None);
        };
        if let Some(engine) = self.engines.get(&name) {
            return Ok(Some(engine.value().clone()));
        }
        if !self.data_dir.join(format!("{name}.wal")).exists() {
            return Ok(None);
        }
        self.get_or_create(&name).map(Some)
    }
}
