//! In-process registry with call accounting and simulated provisioning.

use super::{already_exists, check_quota, check_spec, new_record, not_found, Registry};
use crate::core::error::Result;
use crate::core::types::*;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    records: IndexMap<(ResourceKind, String), RegistryRecord>,
    /// Remaining `creating` polls per resource
    pending: IndexMap<(ResourceKind, String), u32>,
    get_calls: u32,
    create_calls: u32,
    lose_next_race: bool,
}

/// Registry held entirely in memory.
#[derive(Debug)]
pub struct MemoryRegistry {
    workspace: String,
    quota: Quota,
    provisioning_polls: u32,
    provisioning_failure: Option<String>,
    inner: Mutex<Inner>,
}

impl MemoryRegistry {
    pub fn new(workspace: &str) -> Self {
        Self {
            workspace: workspace.to_string(),
            quota: Quota::default(),
            provisioning_polls: 0,
            provisioning_failure: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn with_quota(mut self, quota: Quota) -> Self {
        self.quota = quota;
        self
    }

    /// New resources report `creating` for this many lookups before settling.
    pub fn with_provisioning_polls(mut self, polls: u32) -> Self {
        self.provisioning_polls = polls;
        self
    }

    /// New resources settle in `failed` with this reason.
    pub fn with_provisioning_failure(mut self, reason: &str) -> Self {
        self.provisioning_failure = Some(reason.to_string());
        self
    }

    /// Make the next `create` lose a race: another caller registers the same
    /// name first and this call fails with `AlreadyExists`.
    pub fn lose_next_race(&self) {
        self.inner.lock().lose_next_race = true;
    }

    /// Register a resource directly, bypassing validation and quota.
    pub fn insert(&self, name: &str, spec: &ResourceSpec) -> Result<Handle> {
        let record = new_record(&self.workspace, name, spec, ProvisioningState::Succeeded)?;
        let handle = record.handle();
        self.inner
            .lock()
            .records
            .insert((spec.kind(), name.to_string()), record);
        Ok(handle)
    }

    pub fn get_calls(&self) -> u32 {
        self.inner.lock().get_calls
    }

    pub fn create_calls(&self) -> u32 {
        self.inner.lock().create_calls
    }

    /// Total registry calls of any kind.
    pub fn calls(&self) -> u32 {
        let inner = self.inner.lock();
        inner.get_calls + inner.create_calls
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn initial_state(&self) -> ProvisioningState {
        if self.provisioning_polls > 0 {
            ProvisioningState::Creating
        } else if self.provisioning_failure.is_some() {
            ProvisioningState::Failed
        } else {
            ProvisioningState::Succeeded
        }
    }

    fn settled_state(&self) -> ProvisioningState {
        if self.provisioning_failure.is_some() {
            ProvisioningState::Failed
        } else {
            ProvisioningState::Succeeded
        }
    }
}

impl Registry for MemoryRegistry {
    fn workspace(&self) -> &str {
        &self.workspace
    }

    fn record(&self, kind: ResourceKind, name: &str) -> Result<RegistryRecord> {
        let mut inner = self.inner.lock();
        inner.get_calls += 1;
        let key = (kind, name.to_string());

        let settle = match inner.pending.get_mut(&key) {
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            None => false,
        };
        if settle {
            inner.pending.shift_remove(&key);
            let state = self.settled_state();
            if let Some(record) = inner.records.get_mut(&key) {
                record.state = state;
                record.failure_reason = self.provisioning_failure.clone();
                debug!(%kind, name, %state, "provisioning settled");
            }
        }

        inner
            .records
            .get(&key)
            .cloned()
            .ok_or_else(|| not_found(&self.workspace, kind, name))
    }

    fn create(&self, name: &str, spec: &ResourceSpec) -> Result<Handle> {
        let kind = spec.kind();
        let key = (kind, name.to_string());
        let mut inner = self.inner.lock();
        inner.create_calls += 1;

        if std::mem::take(&mut inner.lose_next_race) {
            let winner = new_record(&self.workspace, name, spec, ProvisioningState::Succeeded)?;
            inner.records.insert(key, winner);
            return Err(already_exists(&self.workspace, kind, name));
        }
        if inner.records.contains_key(&key) {
            return Err(already_exists(&self.workspace, kind, name));
        }

        check_spec(name, spec)?;
        let existing: Vec<RegistryRecord> = inner.records.values().cloned().collect();
        check_quota(&self.quota, &existing, name, spec)?;

        let mut record = new_record(&self.workspace, name, spec, self.initial_state())?;
        if record.state == ProvisioningState::Failed {
            record.failure_reason = self.provisioning_failure.clone();
        }
        if record.state == ProvisioningState::Creating {
            inner.pending.insert(key.clone(), self.provisioning_polls);
        }
        let handle = record.handle();
        inner.records.insert(key, record);
        Ok(handle)
    }

    fn list(&self, kind: ResourceKind) -> Result<Vec<RegistryRecord>> {
        let inner = self.inner.lock();
        let mut records: Vec<RegistryRecord> = inner
            .records
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}
