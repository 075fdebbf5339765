//! The global feat registry: `index/feats.json`.
//!
//! Every active feat has exactly one entry; archived feats have none. All
//! mutations serialize on the index file lock, which is what makes
//! concurrent transitions on distinct feats safe at the shared index.

use crate::error::{HarnessError, Result};
use crate::feat::FeatState;
use crate::store::{self, utc_now};
use crate::types::FeatStatus;
use crate::paths;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub feat_id: String,
    pub title: String,
    pub status: FeatStatus,
    pub branch: String,
    pub worktree_path: String,
    pub updated_at: DateTime<Utc>,
}

impl IndexEntry {
    pub fn from_state(state: &FeatState) -> Self {
        Self {
            feat_id: state.feat_id.clone(),
            title: state.title.clone(),
            status: state.status,
            branch: state.branch.clone(),
            worktree_path: state.worktree_path.clone(),
            updated_at: state.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDoc {
    pub version: u32,
    pub updated_at: DateTime<Utc>,
    pub feats: Vec<IndexEntry>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl IndexDoc {
    pub fn new() -> Self {
        Self {
            version: 1,
            updated_at: utc_now(),
            feats: Vec::new(),
            extra: Default::default(),
        }
    }

    pub fn get(&self, feat_id: &str) -> Option<&IndexEntry> {
        self.feats.iter().find(|e| e.feat_id == feat_id)
    }

    /// Any non-archived entry carrying this slug.
    pub fn active_slug_exists(&self, slug: &str) -> bool {
        self.feats.iter().any(|e| {
            e.status != FeatStatus::Archived
                && paths::split_feat_id(&e.feat_id)
                    .map(|(s, _)| s == slug)
                    .unwrap_or(false)
        })
    }
}

impl Default for IndexDoc {
    fn default() -> Self {
        Self::new()
    }
}

/// Load the index; a missing file means the harness was never initialized.
pub fn load(root: &Path) -> Result<IndexDoc> {
    match store::load(&paths::index_path(root)) {
        Ok(doc) => Ok(doc),
        Err(HarnessError::NotFound(_)) => Err(HarnessError::NotInitialized),
        Err(e) => Err(e),
    }
}

/// Insert or replace the entry for `state`, keeping the list sorted by
/// feat id.
pub fn upsert(root: &Path, state: &FeatState) -> Result<()> {
    let entry = IndexEntry::from_state(state);
    store::mutate::<IndexDoc, _>(&paths::index_path(root), |doc| {
        doc.feats.retain(|e| e.feat_id != entry.feat_id);
        doc.feats.push(entry);
        doc.feats.sort_by(|a, b| a.feat_id.cmp(&b.feat_id));
        doc.updated_at = utc_now();
        Ok(())
    })
    .map_err(not_initialized)?;
    Ok(())
}

/// Drop the entry for `feat_id` (archive step 5). Absent entries are fine.
pub fn remove(root: &Path, feat_id: &str) -> Result<()> {
    store::mutate::<IndexDoc, _>(&paths::index_path(root), |doc| {
        doc.feats.retain(|e| e.feat_id != feat_id);
        doc.updated_at = utc_now();
        Ok(())
    })
    .map_err(not_initialized)?;
    Ok(())
}

fn not_initialized(e: HarnessError) -> HarnessError {
    match e {
        HarnessError::NotFound(_) => HarnessError::NotInitialized,
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
