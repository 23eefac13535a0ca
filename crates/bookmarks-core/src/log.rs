//! Operation Envelope & Log — a durable, ordered, namespace-scoped
//! journal plus per-status indices.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::{debug, instrument};

use crate::envelope::{EnvelopeStatus, OperationEnvelope};
use crate::error::LogError;
use crate::ids::{EnvelopeId, Namespace};

const ENVELOPES: TableDefinition<&str, &[u8]> = TableDefinition::new("envelopes");

/// Durable, ordered journal of operation envelopes.
///
/// `append` is atomic with respect to concurrent readers; `mark_synced`/
/// `mark_failed` update status fields only — envelopes are otherwise
/// content-immutable.
pub trait OperationLog: Send + Sync {
    fn append(&self, env: OperationEnvelope) -> Result<(), LogError>;

    fn list_pending(&self, namespace: &Namespace) -> Result<Vec<OperationEnvelope>, LogError>;

    /// Envelopes that reached a terminal `failed` state, oldest first.
    fn list_failed(&self, namespace: &Namespace) -> Result<Vec<OperationEnvelope>, LogError>;

    fn mark_synced(&self, env_id: &EnvelopeId) -> Result<(), LogError>;

    /// Bumps `retry_count` and transitions to `failed`. `err_msg` is logged
    /// but not persisted on the envelope itself — the envelope's wire
    /// format has no error field; the caller surfaces it via
    /// `syncStatus{status:error, error}` instead.
    fn mark_failed(&self, env_id: &EnvelopeId, err_msg: &str) -> Result<(), LogError>;

    fn count_pending(&self, namespace: &Namespace) -> Result<usize, LogError>;

    fn get(&self, env_id: &EnvelopeId) -> Result<Option<OperationEnvelope>, LogError>;

    /// Reset a `failed` envelope with `retry_count < max_retries` back to
    /// `pending`. Returns `false` if the envelope is terminal or missing.
    fn retry(&self, env_id: &EnvelopeId, max_retries: u32, force: bool) -> Result<bool, LogError>;
}

fn sort_pending(mut envs: Vec<OperationEnvelope>) -> Vec<OperationEnvelope> {
    envs.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.id.cmp(&b.id)));
    envs
}

/// In-memory backing for unit tests and the broker's non-durable paths.
#[derive(Default)]
pub struct InMemoryOperationLog {
    envelopes: Mutex<BTreeMap<String, OperationEnvelope>>,
}

impl InMemoryOperationLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OperationLog for InMemoryOperationLog {
    fn append(&self, env: OperationEnvelope) -> Result<(), LogError> {
        let mut guard = self.envelopes.lock().unwrap();
        guard.insert(env.id.0.clone(), env);
        Ok(())
    }

    fn list_pending(&self, namespace: &Namespace) -> Result<Vec<OperationEnvelope>, LogError> {
        let guard = self.envelopes.lock().unwrap();
        let pending = guard
            .values()
            .filter(|e| &e.namespace == namespace && e.status == EnvelopeStatus::Pending)
            .cloned()
            .collect();
        Ok(sort_pending(pending))
    }

    fn list_failed(&self, namespace: &Namespace) -> Result<Vec<OperationEnvelope>, LogError> {
        let guard = self.envelopes.lock().unwrap();
        let failed = guard
            .values()
            .filter(|e| &e.namespace == namespace && e.status == EnvelopeStatus::Failed)
            .cloned()
            .collect();
        Ok(sort_pending(failed))
    }

    fn mark_synced(&self, env_id: &EnvelopeId) -> Result<(), LogError> {
        let mut guard = self.envelopes.lock().unwrap();
        let env = guard
            .get_mut(&env_id.0)
            .ok_or_else(|| LogError::NotFound(env_id.0.clone()))?;
        env.mark_synced();
        Ok(())
    }

    fn mark_failed(&self, env_id: &EnvelopeId, _err_msg: &str) -> Result<(), LogError> {
        let mut guard = self.envelopes.lock().unwrap();
        let env = guard
            .get_mut(&env_id.0)
            .ok_or_else(|| LogError::NotFound(env_id.0.clone()))?;
        env.mark_failed();
        Ok(())
    }

    fn count_pending(&self, namespace: &Namespace) -> Result<usize, LogError> {
        let guard = self.envelopes.lock().unwrap();
        Ok(guard
            .values()
            .filter(|e| &e.namespace == namespace && e.status == EnvelopeStatus::Pending)
            .count())
    }

    fn get(&self, env_id: &EnvelopeId) -> Result<Option<OperationEnvelope>, LogError> {
        let guard = self.envelopes.lock().unwrap();
        Ok(guard.get(&env_id.0).cloned())
    }

    fn retry(&self, env_id: &EnvelopeId, max_retries: u32, force: bool) -> Result<bool, LogError> {
        let mut guard = self.envelopes.lock().unwrap();
        let env = guard
            .get_mut(&env_id.0)
            .ok_or_else(|| LogError::NotFound(env_id.0.clone()))?;
        if env.status != EnvelopeStatus::Failed {
            return Ok(false);
        }
        if force {
            env.reset_retries();
            return Ok(true);
        }
        if env.retry_count < max_retries {
            env.requeue();
            return Ok(true);
        }
        Ok(false)
    }
}

/// Durable journal backed by `redb`, one row per envelope keyed by its id.
pub struct RedbOperationLog {
    db: Database,
}

impl RedbOperationLog {
    #[instrument(skip(path))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LogError::Storage(e.to_string()))?;
        }
        let db = Database::create(path)?;
        {
            let write_txn = db.begin_write()?;
            write_txn.open_table(ENVELOPES)?;
            write_txn.commit()?;
        }
        debug!(path = %path.display(), "opened redb operation log");
        Ok(Self { db })
    }

    fn read_all(&self) -> Result<Vec<OperationEnvelope>, LogError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENVELOPES)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (_key, value) = entry?;
            let env: OperationEnvelope = serde_json::from_slice(value.value())?;
            out.push(env);
        }
        Ok(out)
    }

    fn write_one(&self, env: &OperationEnvelope) -> Result<(), LogError> {
        let bytes = serde_json::to_vec(env)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ENVELOPES)?;
            table.insert(env.id.0.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn read_one(&self, env_id: &EnvelopeId) -> Result<Option<OperationEnvelope>, LogError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENVELOPES)?;
        match table.get(env_id.0.as_str())? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }
}

impl OperationLog for RedbOperationLog {
    #[instrument(skip(self, env), fields(id = %env.id, op = env.op.kind()))]
    fn append(&self, env: OperationEnvelope) -> Result<(), LogError> {
        self.write_one(&env)
    }

    fn list_pending(&self, namespace: &Namespace) -> Result<Vec<OperationEnvelope>, LogError> {
        let pending = self
            .read_all()?
            .into_iter()
            .filter(|e| &e.namespace == namespace && e.status == EnvelopeStatus::Pending)
            .collect();
        Ok(sort_pending(pending))
    }

    fn list_failed(&self, namespace: &Namespace) -> Result<Vec<OperationEnvelope>, LogError> {
        let failed = self
            .read_all()?
            .into_iter()
            .filter(|e| &e.namespace == namespace && e.status == EnvelopeStatus::Failed)
            .collect();
        Ok(sort_pending(failed))
    }

    fn mark_synced(&self, env_id: &EnvelopeId) -> Result<(), LogError> {
        let mut env = self
            .read_one(env_id)?
            .ok_or_else(|| LogError::NotFound(env_id.0.clone()))?;
        env.mark_synced();
        self.write_one(&env)
    }

    fn mark_failed(&self, env_id: &EnvelopeId, err_msg: &str) -> Result<(), LogError> {
        let mut env = self
            .read_one(env_id)?
            .ok_or_else(|| LogError::NotFound(env_id.0.clone()))?;
        env.mark_failed();
        debug!(id = %env_id, error = err_msg, "envelope marked failed");
        self.write_one(&env)
    }

    fn count_pending(&self, namespace: &Namespace) -> Result<usize, LogError> {
        Ok(self.list_pending(namespace)?.len())
    }

    fn get(&self, env_id: &EnvelopeId) -> Result<Option<OperationEnvelope>, LogError> {
        self.read_one(env_id)
    }

    fn retry(&self, env_id: &EnvelopeId, max_retries: u32, force: bool) -> Result<bool, LogError> {
        let mut env = self
            .read_one(env_id)?
            .ok_or_else(|| LogError::NotFound(env_id.0.clone()))?;
        if env.status != EnvelopeStatus::Failed {
            return Ok(false);
        }
        if force {
            env.reset_retries();
        } else if env.retry_count < max_retries {
            env.requeue();
        } else {
            return Ok(false);
        }
        self.write_one(&env)?;
        Ok(true)
    }
}
