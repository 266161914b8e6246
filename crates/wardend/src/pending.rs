//! Journal of requests awaiting approval.
//!
//! A JSON document keyed by request id, shared between the daemon and
//! `wardenctl` so a queued request outlives the process that proposed it.
//! Every change re-reads the file and writes it back atomically, so two
//! processes only ever touch their own entries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;

use warden_shared::Result;

use crate::orchestrator::{RemediationRequest, RemediationState};

#[derive(Debug, Default, Serialize, Deserialize)]
struct PendingDocument {
    #[serde(default)]
    requests: BTreeMap<Uuid, RemediationRequest>,
}

pub struct PendingJournal {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PendingJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Requests still awaiting approval. An unreadable journal reads as empty.
    pub fn load(&self) -> Vec<RemediationRequest> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        match self.read() {
            Ok(doc) => doc
                .requests
                .into_values()
                .filter(|r| r.state == RemediationState::AwaitingApproval)
                .collect(),
            Err(e) => {
                error!("Pending journal unreadable: {}", e);
                Vec::new()
            }
        }
    }

    pub fn insert(&self, request: &RemediationRequest) -> Result<()> {
        self.update(|doc| {
            doc.requests.insert(request.id, request.clone());
        })
    }

    pub fn remove(&self, id: Uuid) -> Result<()> {
        self.update(|doc| {
            doc.requests.remove(&id);
        })
    }

    fn update(&self, change: impl FnOnce(&mut PendingDocument)) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut doc = self.read()?;
        change(&mut doc);
        self.write(&doc)?;
        debug!("Pending journal {}: {} request(s)", self.path.display(), doc.requests.len());
        Ok(())
    }

    fn read(&self) -> Result<PendingDocument> {
        if !self.path.exists() {
            return Ok(PendingDocument::default());
        }
        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(PendingDocument::default());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn write(&self, doc: &PendingDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(doc)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
