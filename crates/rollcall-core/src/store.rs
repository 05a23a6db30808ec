//! Reference embedding store.
//!
//! One averaged embedding per enrolled identity, persisted as JSON. Built
//! offline by [`EnrollmentBuilder`](crate::EnrollmentBuilder) and loaded
//! read-only by the daemon.

use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("embedding store not found: {0} (run `rollcall enroll` first)")]
    NotFound(PathBuf),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("corrupt embedding store: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("identity {name:?} has {actual} dimensions, expected {expected}")]
    InconsistentDimensions {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("identity {0:?} has an empty embedding")]
    EmptyEmbedding(String),
    #[error("duplicate identity {0:?}")]
    DuplicateIdentity(String),
}

/// Immutable mapping from identity name to reference embedding.
///
/// Names are exact strings: no trimming or case folding. Iteration order is
/// the lexicographic order of the names, which also fixes the matcher's
/// tie-break.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingStore {
    /// MODEL identifier of the embedder that produced the references.
    model: String,
    /// Shared dimensionality; 0 for an empty store.
    dimensions: usize,
    identities: BTreeMap<String, Embedding>,
}

impl EmbeddingStore {
    /// Build a store, checking that every reference shares one dimensionality.
    pub fn from_identities<I>(model: impl Into<String>, identities: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = (String, Embedding)>,
    {
        let mut map = BTreeMap::new();
        for (name, embedding) in identities {
            if map.contains_key(&name) {
                return Err(StoreError::DuplicateIdentity(name));
            }
            map.insert(name, embedding);
        }
        let dimensions = validate(&map)?;
        Ok(Self {
            model: model.into(),
            dimensions,
            identities: map,
        })
    }

    pub fn empty(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            dimensions: 0,
            identities: BTreeMap::new(),
        }
    }

    /// Load a store saved by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let raw = fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(path.to_path_buf())
            } else {
                StoreError::Io { path: path.to_path_buf(), source: e }
            }
        })?;

        let mut store: EmbeddingStore = serde_json::from_slice(&raw)?;
        let dimensions = validate(&store.identities)?;
        if !store.identities.is_empty() && dimensions != store.dimensions {
            return Err(StoreError::InconsistentDimensions {
                name: "<header>".into(),
                expected: dimensions,
                actual: store.dimensions,
            });
        }
        store.dimensions = dimensions;

        tracing::info!(
            path = %path.display(),
            identities = store.len(),
            dimensions = store.dimensions,
            model = %store.model,
            "loaded embedding store"
        );
        Ok(store)
    }

    /// Persist the store, replacing whatever was at `path`.
    ///
    /// Writes to a sibling temp file and renames it over the target so a
    /// crash mid-write never leaves a truncated store behind.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io { path: path.to_path_buf(), source };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_vec_pretty(self)?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;

        tracing::info!(
            path = %path.display(),
            identities = self.len(),
            "saved embedding store"
        );
        Ok(())
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Embedding> {
        self.identities.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.identities.keys().map(String::as_str)
    }

    /// Identities in deterministic (name) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Embedding)> {
        self.identities.iter().map(|(n, e)| (n.as_str(), e))
    }
}

/// Returns the shared dimensionality of `identities` (0 when empty).
fn validate(identities: &BTreeMap<String, Embedding>) -> Result<usize, StoreError> {
    let mut expected: Option<usize> = None;
    for (name, embedding) in identities {
        let dims = embedding.dimensions();
        if dims == 0 {
            return Err(StoreError::EmptyEmbedding(name.clone()));
        }
        match expected {
            None => expected = Some(dims),
            Some(e) if e != dims => {
                return Err(StoreError::InconsistentDimensions {
                    name: name.clone(),
                    expected: e,
                    actual: dims,
                })
            }
            Some(_) => {}
        }
    }
    Ok(expected.unwrap_or(0))
}
