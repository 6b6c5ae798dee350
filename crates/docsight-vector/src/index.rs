//! In-process vector index with automatic flat-to-clustered promotion
//!
//! The index owns every stored vector plus the mapping from dense internal
//! ids to `(document, chunk)` pairs. Vectors are L2 normalized on the way in,
//! so inner-product scores are cosine similarities.
//!
//! Structure and id map always change together under one mutex; callers can
//! never observe an internal id without its vector or the other way around.
//!
//! Author: hephaex@gmail.com

use crate::kmeans::{self, dot, l2_normalize, nearest_centroid};
use docsight_core::{ChunkId, DocsightError, DocumentId, IndexConfig, Result, SearchHit};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

// ============================================================================
// Index structures
// ============================================================================

/// Exact linear-scan index over row-major vectors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: usize,
    vectors: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.vectors.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    fn add(&mut self, vector: &[f32]) {
        self.vectors.extend_from_slice(vector);
    }

    /// Stored vector at `id`
    pub fn reconstruct(&self, id: u64) -> Option<&[f32]> {
        row(&self.vectors, self.dimension, id)
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(u64, f32)> {
        let scored = (0..self.len() as u64)
            .filter_map(|id| self.reconstruct(id).map(|v| (id, dot(query, v))))
            .collect();
        top_k(scored, k)
    }
}

/// Inverted-file index: vectors bucketed under trained centroids, searched by
/// probing the `nprobe` closest buckets only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvfIndex {
    dimension: usize,
    centroids: Vec<Vec<f32>>,
    lists: Vec<Vec<u64>>,
    vectors: Vec<f32>,
    nprobe: usize,
}

impl IvfIndex {
    /// Train `nlist` centroids over row-major `training` data. The result holds
    /// no vectors yet.
    pub fn train(
        dimension: usize,
        training: &[f32],
        nlist: usize,
        iterations: usize,
    ) -> Result<Self> {
        let centroids = kmeans::train(training, dimension, nlist, iterations)?;
        let lists = vec![Vec::new(); centroids.len()];

        Ok(Self {
            dimension,
            centroids,
            lists,
            vectors: Vec::new(),
            nprobe: 1,
        })
    }

    pub fn nlist(&self) -> usize {
        self.centroids.len()
    }

    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    /// Clusters probed per query, clamped to `1..=nlist`
    pub fn set_nprobe(&mut self, nprobe: usize) {
        self.nprobe = nprobe.clamp(1, self.nlist().max(1));
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.vectors.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    fn add(&mut self, vector: &[f32]) {
        let id = self.len() as u64;
        let list = nearest_centroid(vector, &self.centroids);
        if let Some(bucket) = self.lists.get_mut(list) {
            bucket.push(id);
        }
        self.vectors.extend_from_slice(vector);
    }

    pub fn reconstruct(&self, id: u64) -> Option<&[f32]> {
        row(&self.vectors, self.dimension, id)
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(u64, f32)> {
        let mut ranked: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, dot(query, c)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let scored = ranked
            .iter()
            .take(self.nprobe)
            .filter_map(|(list, _)| self.lists.get(*list))
            .flat_map(|bucket| bucket.iter().copied())
            .filter_map(|id| self.reconstruct(id).map(|v| (id, dot(query, v))))
            .collect();
        top_k(scored, k)
    }

    fn check_lists(&self) -> std::result::Result<(), String> {
        if self.lists.len() != self.centroids.len() {
            return Err(format!(
                "{} inverted lists for {} centroids",
                self.lists.len(),
                self.centroids.len()
            ));
        }
        let total = self.len();
        let mut seen = vec![false; total];
        for id in self.lists.iter().flatten() {
            match seen.get_mut(*id as usize) {
                Some(slot) if !*slot => *slot = true,
                _ => return Err(format!("inverted list entry {id} is invalid or duplicated")),
            }
        }
        if seen.iter().any(|s| !s) {
            return Err("inverted lists do not cover every stored vector".to_string());
        }
        if self.centroids.iter().any(|c| c.len() != self.dimension) {
            return Err("centroid dimension disagrees with index dimension".to_string());
        }
        Ok(())
    }
}

/// Structure kind reported by stats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureKind {
    Flat,
    Clustered,
}

impl std::fmt::Display for StructureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flat => write!(f, "flat"),
            Self::Clustered => write!(f, "clustered"),
        }
    }
}

/// The physical vector structure behind the index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndexStructure {
    Flat(FlatIndex),
    Clustered(IvfIndex),
}

impl IndexStructure {
    pub fn kind(&self) -> StructureKind {
        match self {
            Self::Flat(_) => StructureKind::Flat,
            Self::Clustered(_) => StructureKind::Clustered,
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Self::Flat(index) => index.dimension,
            Self::Clustered(index) => index.dimension,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Flat(index) => index.len(),
            Self::Clustered(index) => index.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reconstruct(&self, id: u64) -> Option<&[f32]> {
        match self {
            Self::Flat(index) => index.reconstruct(id),
            Self::Clustered(index) => index.reconstruct(id),
        }
    }

    fn add(&mut self, vector: &[f32]) {
        match self {
            Self::Flat(index) => index.add(vector),
            Self::Clustered(index) => index.add(vector),
        }
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(u64, f32)> {
        match self {
            Self::Flat(index) => index.search(query, k),
            Self::Clustered(index) => index.search(query, k),
        }
    }

    /// Flat -> Clustered transition: every stored vector is re-inserted into
    /// `trained` in id order. Returns false if already clustered.
    fn promote(&mut self, mut trained: IvfIndex) -> bool {
        let flat = match self {
            Self::Flat(flat) => flat,
            Self::Clustered(_) => return false,
        };
        for id in 0..flat.len() as u64 {
            if let Some(vector) = flat.reconstruct(id) {
                trained.add(vector);
            }
        }
        *self = Self::Clustered(trained);
        true
    }

    fn check_consistency(&self) -> std::result::Result<(), String> {
        let (dimension, stored) = match self {
            Self::Flat(index) => (index.dimension, index.vectors.len()),
            Self::Clustered(index) => (index.dimension, index.vectors.len()),
        };
        if dimension == 0 || stored % dimension != 0 {
            return Err(format!(
                "{stored} stored floats do not form vectors of dimension {dimension}"
            ));
        }
        match self {
            Self::Flat(_) => Ok(()),
            Self::Clustered(index) => index.check_lists(),
        }
    }
}

fn row(vectors: &[f32], dimension: usize, id: u64) -> Option<&[f32]> {
    let start = (id as usize).checked_mul(dimension)?;
    vectors.get(start..start.checked_add(dimension)?)
}

/// Highest `k` scores; equal scores keep candidate order
fn top_k(mut scored: Vec<(u64, f32)>, k: usize) -> Vec<(u64, f32)> {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);
    scored
}

// ============================================================================
// Id map and stats
// ============================================================================

/// Where a stored vector came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Dense position of the vector in the structure
    pub internal_id: u64,
    pub document_id: DocumentId,
    pub chunk_id: ChunkId,
    pub chunk_index: u32,
}

/// Id-map record as written to `<path>.map.json`, keyed by internal id
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    document_id: DocumentId,
    chunk_id: ChunkId,
    chunk_index: u32,
}

/// Index diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_vectors: usize,

    /// Zero until the first vector fixes the dimension
    pub dimension: usize,

    /// `None` while uninitialized
    pub structure_kind: Option<StructureKind>,
    pub distinct_documents: usize,
}

#[derive(Debug, Default)]
struct IndexState {
    structure: Option<IndexStructure>,
    entries: BTreeMap<u64, IndexEntry>,
    next_id: u64,

    /// Bumped whenever ids are renumbered or state is replaced wholesale
    generation: u64,
}

// ============================================================================
// Vector index
// ============================================================================

/// Thread-safe vector index
pub struct VectorIndex {
    config: IndexConfig,
    state: Mutex<IndexState>,

    /// Serializes artifact writes so a newer snapshot is never overwritten
    /// by an older one
    writer: Mutex<()>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("path", &self.config.path)
            .finish_non_exhaustive()
    }
}

impl VectorIndex {
    /// Open an index, restoring persisted state when artifacts exist
    pub fn open(config: IndexConfig) -> Self {
        let index = Self {
            config,
            state: Mutex::new(IndexState::default()),
            writer: Mutex::new(()),
        };
        if let Err(error) = index.load() {
            tracing::warn!(%error, "index_load_failed");
        }
        index
    }

    /// Ephemeral index with default tuning
    pub fn in_memory() -> Self {
        Self::open(IndexConfig::in_memory())
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, IndexState>> {
        self.state
            .lock()
            .map_err(|_| DocsightError::LockPoisoned("vector index"))
    }

    /// Append one document's chunk vectors, returning their internal ids.
    ///
    /// The first insertion fixes the index dimension. Vectors are committed
    /// in memory before persisting; a persistence failure is returned after
    /// the commit.
    pub fn add(
        &self,
        document_id: DocumentId,
        chunk_ids: &[ChunkId],
        chunk_indices: &[u32],
        vectors: &[Vec<f32>],
    ) -> Result<Vec<u64>> {
        if chunk_ids.len() != vectors.len() || chunk_indices.len() != vectors.len() {
            return Err(DocsightError::Validation(format!(
                "Got {} vectors for {} chunk ids and {} chunk indices",
                vectors.len(),
                chunk_ids.len(),
                chunk_indices.len()
            )));
        }
        let Some(first) = vectors.first() else {
            return Ok(Vec::new());
        };
        let dimension = first.len();
        if dimension == 0 {
            return Err(DocsightError::Validation(
                "Vectors must have at least one dimension".to_string(),
            ));
        }

        let mut normalized = Vec::with_capacity(vectors.len());
        for vector in vectors {
            if vector.len() != dimension {
                return Err(DocsightError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            let mut vector = vector.clone();
            l2_normalize(&mut vector);
            normalized.push(vector);
        }

        let (ids, total, should_promote) = {
            let mut guard = self.lock()?;
            let state = &mut *guard;
            let structure = state
                .structure
                .get_or_insert_with(|| IndexStructure::Flat(FlatIndex::new(dimension)));
            if structure.dimension() != dimension {
                return Err(DocsightError::DimensionMismatch {
                    expected: structure.dimension(),
                    actual: dimension,
                });
            }

            let mut ids = Vec::with_capacity(normalized.len());
            for ((vector, &chunk_id), &chunk_index) in
                normalized.iter().zip(chunk_ids).zip(chunk_indices)
            {
                let internal_id = state.next_id;
                structure.add(vector);
                state.entries.insert(
                    internal_id,
                    IndexEntry {
                        internal_id,
                        document_id,
                        chunk_id,
                        chunk_index,
                    },
                );
                state.next_id += 1;
                ids.push(internal_id);
            }

            let total = structure.len();
            let should_promote = structure.kind() == StructureKind::Flat
                && total >= self.config.promotion_threshold;
            (ids, total, should_promote)
        };

        tracing::info!(
            document_id,
            count = ids.len(),
            total_vectors = total,
            "embeddings_added"
        );

        let persisted = self.persist();

        if should_promote {
            if let Err(error) = self.maybe_promote() {
                tracing::warn!(%error, "index_promotion_failed");
            }
        }

        persisted?;
        Ok(ids)
    }

    /// Upgrade a flat index past the threshold to a clustered one.
    ///
    /// Training runs without the lock. If a delete or reload renumbered ids in
    /// the meantime the attempt is dropped; the next `add` retries it.
    fn maybe_promote(&self) -> Result<bool> {
        let (snapshot, dimension, generation) = {
            let state = self.lock()?;
            match &state.structure {
                Some(IndexStructure::Flat(flat))
                    if !flat.is_empty() && flat.len() >= self.config.promotion_threshold =>
                {
                    (flat.vectors.clone(), flat.dimension, state.generation)
                }
                _ => return Ok(false),
            }
        };

        let n_vectors = snapshot.len() / dimension;
        let nlist = ((n_vectors as f64).sqrt().floor() as usize)
            .min(self.config.max_nlist)
            .max(1);
        let nprobe = nlist.min(self.config.max_nprobe).max(1);

        let mut trained =
            IvfIndex::train(dimension, &snapshot, nlist, self.config.kmeans_iterations)?;
        trained.set_nprobe(nprobe);

        let total = {
            let mut state = self.lock()?;
            if state.generation != generation {
                tracing::debug!("index_promotion_skipped_renumbered");
                return Ok(false);
            }
            let Some(structure) = state.structure.as_mut() else {
                return Ok(false);
            };
            // Vectors appended during training are folded in here
            if !structure.promote(trained) {
                tracing::debug!("index_promotion_skipped_already_clustered");
                return Ok(false);
            }
            structure.len()
        };

        tracing::info!(n_vectors = total, nlist, nprobe, "index_promoted");
        self.persist()?;
        Ok(true)
    }

    /// Rank stored vectors by cosine similarity to `query`.
    ///
    /// With a document filter, `top_k * filter_overfetch` candidates (capped at
    /// the vector count) are fetched and then narrowed to that document.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        document_filter: Option<DocumentId>,
    ) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let mut query = query.to_vec();
        l2_normalize(&mut query);

        let candidates: Vec<(IndexEntry, f32)> = {
            let state = self.lock()?;
            let Some(structure) = state.structure.as_ref() else {
                return Ok(Vec::new());
            };
            let total = structure.len();
            if total == 0 {
                return Ok(Vec::new());
            }
            if structure.dimension() != query.len() {
                return Err(DocsightError::DimensionMismatch {
                    expected: structure.dimension(),
                    actual: query.len(),
                });
            }

            let fetch = match document_filter {
                Some(_) => top_k.saturating_mul(self.config.filter_overfetch.max(1)),
                None => top_k,
            }
            .min(total);

            structure
                .search(&query, fetch)
                .into_iter()
                .filter_map(|(id, score)| state.entries.get(&id).map(|entry| (*entry, score)))
                .collect()
        };

        Ok(candidates
            .into_iter()
            .filter(|(entry, _)| document_filter.map_or(true, |doc| entry.document_id == doc))
            .take(top_k)
            .map(|(entry, score)| SearchHit {
                document_id: entry.document_id,
                chunk_id: entry.chunk_id,
                chunk_index: entry.chunk_index,
                score,
            })
            .collect())
    }

    /// Remove every vector belonging to `document_id`.
    ///
    /// Survivors are copied into a fresh flat structure with dense ids; if
    /// none remain the index returns to its uninitialized state. A missing
    /// vector aborts the rebuild and leaves the previous state untouched.
    pub fn delete_document(&self, document_id: DocumentId) -> Result<usize> {
        let (removed, remaining) = {
            let mut guard = self.lock()?;
            let state = &mut *guard;

            let survivors: Vec<IndexEntry> = state
                .entries
                .values()
                .filter(|entry| entry.document_id != document_id)
                .copied()
                .collect();
            let removed = state.entries.len() - survivors.len();
            if removed == 0 {
                return Ok(0);
            }

            if survivors.is_empty() {
                state.structure = None;
                state.entries.clear();
                state.next_id = 0;
            } else {
                let Some(old) = state.structure.as_ref() else {
                    return Err(DocsightError::Rebuild(
                        "id map references vectors but no structure exists".to_string(),
                    ));
                };

                let mut rebuilt = FlatIndex::new(old.dimension());
                let mut entries = BTreeMap::new();
                for (new_id, entry) in survivors.iter().enumerate() {
                    let vector = old.reconstruct(entry.internal_id).ok_or_else(|| {
                        DocsightError::Rebuild(format!(
                            "vector {} could not be reconstructed",
                            entry.internal_id
                        ))
                    })?;
                    rebuilt.add(vector);

                    let internal_id = new_id as u64;
                    entries.insert(
                        internal_id,
                        IndexEntry {
                            internal_id,
                            ..*entry
                        },
                    );
                }

                state.next_id = entries.len() as u64;
                state.structure = Some(IndexStructure::Flat(rebuilt));
                state.entries = entries;
            }
            state.generation += 1;
            (removed, state.entries.len())
        };

        tracing::info!(document_id, count = removed, remaining, "embeddings_deleted");
        self.persist()?;
        Ok(removed)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let state = self.lock()?;
        let documents: HashSet<DocumentId> =
            state.entries.values().map(|entry| entry.document_id).collect();

        Ok(IndexStats {
            total_vectors: state.structure.as_ref().map_or(0, IndexStructure::len),
            dimension: state.structure.as_ref().map_or(0, IndexStructure::dimension),
            structure_kind: state.structure.as_ref().map(IndexStructure::kind),
            distinct_documents: documents.len(),
        })
    }

    /// Entries for one document, in internal id order
    pub fn entries_for(&self, document_id: DocumentId) -> Result<Vec<IndexEntry>> {
        let state = self.lock()?;
        Ok(state
            .entries
            .values()
            .filter(|entry| entry.document_id == document_id)
            .copied()
            .collect())
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Write both artifacts. An uninitialized index removes them instead.
    /// No-op for in-memory indexes.
    pub fn persist(&self) -> Result<()> {
        let Some(base) = self.config.path.as_deref() else {
            return Ok(());
        };
        let _writer = self
            .writer
            .lock()
            .map_err(|_| DocsightError::LockPoisoned("index writer"))?;

        let snapshot = {
            let state = self.lock()?;
            match &state.structure {
                None => None,
                Some(structure) => {
                    let bytes = bincode::serialize(structure).map_err(|e| {
                        DocsightError::Persistence(format!("Failed to encode index: {e}"))
                    })?;
                    let map: BTreeMap<u64, StoredEntry> = state
                        .entries
                        .iter()
                        .map(|(id, entry)| {
                            (
                                *id,
                                StoredEntry {
                                    document_id: entry.document_id,
                                    chunk_id: entry.chunk_id,
                                    chunk_index: entry.chunk_index,
                                },
                            )
                        })
                        .collect();
                    let json = serde_json::to_vec(&map).map_err(|e| {
                        DocsightError::Persistence(format!("Failed to encode id map: {e}"))
                    })?;
                    Some((bytes, json, structure.len()))
                }
            }
        };

        match snapshot {
            None => {
                remove_artifact(&structure_path(base))?;
                remove_artifact(&map_path(base))?;
                tracing::info!(path = %base.display(), "index_artifacts_removed");
            }
            Some((bytes, json, vectors)) => {
                write_atomic(&structure_path(base), &bytes)?;
                write_atomic(&map_path(base), &json)?;
                tracing::info!(path = %base.display(), vectors, "index_saved");
            }
        }
        Ok(())
    }

    /// Replace in-memory state with the persisted artifacts.
    ///
    /// Missing, unreadable or inconsistent artifacts leave an empty index
    /// behind. Returns whether persisted state was restored.
    pub fn load(&self) -> Result<bool> {
        let Some(base) = self.config.path.as_deref() else {
            return Ok(false);
        };

        let restored = match read_artifacts(base) {
            Ok(Some(state)) => {
                tracing::info!(
                    path = %base.display(),
                    vectors = state.entries.len(),
                    kind = ?state.structure.as_ref().map(IndexStructure::kind),
                    "index_loaded"
                );
                Some(state)
            }
            Ok(None) => {
                tracing::info!(path = %base.display(), "index_not_found_starting_fresh");
                None
            }
            Err(error) => {
                tracing::warn!(path = %base.display(), %error, "index_unreadable_starting_fresh");
                None
            }
        };

        let loaded = restored.is_some();
        let mut state = self.lock()?;
        let generation = state.generation + 1;
        *state = restored.unwrap_or_default();
        state.generation = generation;
        Ok(loaded)
    }
}

fn artifact_path(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// `<path>.index`
pub fn structure_path(base: &Path) -> PathBuf {
    artifact_path(base, ".index")
}

/// `<path>.map.json`
pub fn map_path(base: &Path) -> PathBuf {
    artifact_path(base, ".map.json")
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            DocsightError::Persistence(format!("Failed to create {}: {e}", parent.display()))
        })?;
    }

    let tmp = artifact_path(path, ".tmp");
    std::fs::write(&tmp, bytes)
        .and_then(|_| std::fs::rename(&tmp, path))
        .map_err(|e| DocsightError::Persistence(format!("Failed to write {}: {e}", path.display())))
}

fn remove_artifact(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DocsightError::Persistence(format!(
            "Failed to remove {}: {e}",
            path.display()
        ))),
    }
}

fn read_artifacts(base: &Path) -> Result<Option<IndexState>> {
    let structure_file = structure_path(base);
    if !structure_file.exists() {
        return Ok(None);
    }

    let bytes = std::fs::read(&structure_file).map_err(|e| {
        DocsightError::Persistence(format!("Failed to read {}: {e}", structure_file.display()))
    })?;
    let structure: IndexStructure = bincode::deserialize(&bytes)
        .map_err(|e| DocsightError::Persistence(format!("Failed to decode index: {e}")))?;
    structure
        .check_consistency()
        .map_err(DocsightError::Persistence)?;

    let map_file = map_path(base);
    let json = std::fs::read(&map_file).map_err(|e| {
        DocsightError::Persistence(format!("Failed to read {}: {e}", map_file.display()))
    })?;
    // JSON object keys are strings; serde restores them as u64
    let stored: BTreeMap<u64, StoredEntry> = serde_json::from_slice(&json)
        .map_err(|e| DocsightError::Persistence(format!("Failed to decode id map: {e}")))?;

    let total = structure.len();
    let dense = stored.keys().enumerate().all(|(i, id)| *id == i as u64);
    if stored.len() != total || !dense {
        return Err(DocsightError::Persistence(format!(
            "id map with {} entries does not match {total} stored vectors",
            stored.len()
        )));
    }

    let entries: BTreeMap<u64, IndexEntry> = stored
        .into_iter()
        .map(|(internal_id, record)| {
            (
                internal_id,
                IndexEntry {
                    internal_id,
                    document_id: record.document_id,
                    chunk_id: record.chunk_id,
                    chunk_index: record.chunk_index,
                },
            )
        })
        .collect();
    let next_id = entries.keys().next_back().map_or(0, |max| max + 1);

    Ok(Some(IndexState {
        structure: (total > 0).then_some(structure),
        entries,
        next_id,
        generation: 0,
    }))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(axis: usize, dimension: usize) -> Vec<f32> {
        let mut v = vec![0.0; dimension];
        v[axis] = 1.0;
        v
    }

    /// Distinct, non-parallel test vectors
    fn sample_vector(i: usize) -> Vec<f32> {
        vec![
            ((i * 7) % 11) as f32 + 1.0,
            ((i * 3) % 5) as f32,
            i as f32,
            1.0,
        ]
    }

    fn add_samples(index: &VectorIndex, document_id: DocumentId, range: std::ops::Range<usize>) {
        let ids: Vec<u64> = range.clone().map(|i| i as u64).collect();
        let indices: Vec<u32> = range.clone().map(|i| i as u32).collect();
        let vectors: Vec<Vec<f32>> = range.map(sample_vector).collect();
        index.add(document_id, &ids, &indices, &vectors).unwrap();
    }

    #[test]
    fn test_empty_index_search() {
        let index = VectorIndex::in_memory();
        assert!(index.search(&[1.0, 0.0], 5, None).unwrap().is_empty());

        let stats = index.stats().unwrap();
        assert_eq!(stats.total_vectors, 0);
        assert_eq!(stats.structure_kind, None);
    }

    #[test]
    fn test_add_assigns_dense_ids() {
        let index = VectorIndex::in_memory();
        let first = index
            .add(1, &[10, 11], &[0, 1], &[unit(0, 3), unit(1, 3)])
            .unwrap();
        let second = index.add(2, &[20], &[0], &[unit(2, 3)]).unwrap();

        assert_eq!(first, vec![0, 1]);
        assert_eq!(second, vec![2]);

        let stats = index.stats().unwrap();
        assert_eq!(stats.total_vectors, 3);
        assert_eq!(stats.dimension, 3);
        assert_eq!(stats.structure_kind, Some(StructureKind::Flat));
        assert_eq!(stats.distinct_documents, 2);
    }

    #[test]
    fn test_add_validates_lengths_and_dimension() {
        let index = VectorIndex::in_memory();
        let err = index.add(1, &[1, 2], &[0], &[unit(0, 3)]).unwrap_err();
        assert!(matches!(err, DocsightError::Validation(_)));

        index.add(1, &[1], &[0], &[unit(0, 3)]).unwrap();
        let err = index.add(1, &[2], &[1], &[unit(0, 4)]).unwrap_err();
        assert!(matches!(
            err,
            DocsightError::DimensionMismatch {
                expected: 3,
                actual: 4
            }
        ));
        assert_eq!(index.stats().unwrap().total_vectors, 1);
    }

    #[test]
    fn test_search_ranks_by_cosine() {
        let index = VectorIndex::in_memory();
        index
            .add(
                1,
                &[1, 2, 3],
                &[0, 1, 2],
                &[vec![1.0, 0.0], vec![1.0, 1.0], vec![0.0, 1.0]],
            )
            .unwrap();

        let hits = index.search(&[2.0, 0.1], 3, None).unwrap();
        let order: Vec<ChunkId> = hits.iter().map(|h| h.chunk_id).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_search_dimension_mismatch() {
        let index = VectorIndex::in_memory();
        index.add(1, &[1], &[0], &[unit(0, 3)]).unwrap();
        assert!(matches!(
            index.search(&[1.0, 0.0], 1, None),
            Err(DocsightError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_filtered_search_only_returns_requested_document() {
        let index = VectorIndex::in_memory();
        add_samples(&index, 1, 0..3);
        add_samples(&index, 2, 3..40);

        let hits = index.search(&sample_vector(39), 100, Some(1)).unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|h| h.document_id == 1));
    }

    #[test]
    fn test_delete_renumbers_survivors() {
        let index = VectorIndex::in_memory();
        add_samples(&index, 1, 0..3);
        add_samples(&index, 2, 3..5);
        add_samples(&index, 3, 5..6);

        assert_eq!(index.delete_document(2).unwrap(), 2);

        let entries: Vec<(u64, ChunkId)> = index
            .entries_for(1)
            .unwrap()
            .into_iter()
            .chain(index.entries_for(3).unwrap())
            .map(|e| (e.internal_id, e.chunk_id))
            .collect();
        assert_eq!(entries, vec![(0, 0), (1, 1), (2, 2), (3, 5)]);

        // Survivors keep their vectors under the new ids
        let top = index.search(&sample_vector(5), 1, None).unwrap();
        assert_eq!(top[0].chunk_id, 5);

        let next = index.add(4, &[9], &[0], &[sample_vector(9)]).unwrap();
        assert_eq!(next, vec![4]);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let index = VectorIndex::in_memory();
        add_samples(&index, 1, 0..3);
        add_samples(&index, 2, 3..5);

        assert_eq!(index.delete_document(1).unwrap(), 3);
        let before = index.stats().unwrap();
        assert_eq!(index.delete_document(1).unwrap(), 0);
        assert_eq!(index.stats().unwrap(), before);
    }

    #[test]
    fn test_delete_last_document_resets() {
        let index = VectorIndex::in_memory();
        add_samples(&index, 1, 0..3);
        assert_eq!(index.delete_document(1).unwrap(), 3);

        let stats = index.stats().unwrap();
        assert_eq!(stats.total_vectors, 0);
        assert_eq!(stats.dimension, 0);
        assert_eq!(stats.structure_kind, None);

        // A fresh dimension is accepted after reset
        assert_eq!(index.add(2, &[1], &[0], &[unit(0, 2)]).unwrap(), vec![0]);
    }

    /// `(nlist, nprobe)` of the clustered structure, if promoted
    fn clustered_params(index: &VectorIndex) -> Option<(usize, usize)> {
        match &index.lock().unwrap().structure {
            Some(IndexStructure::Clustered(ivf)) => Some((ivf.nlist(), ivf.nprobe())),
            _ => None,
        }
    }

    #[test]
    fn test_promotion_parameters_at_default_threshold() {
        let config = IndexConfig {
            kmeans_iterations: 2,
            ..IndexConfig::in_memory()
        };
        assert_eq!(config.promotion_threshold, 256);
        let index = VectorIndex::open(config);

        add_samples(&index, 1, 0..255);
        assert_eq!(clustered_params(&index), None);

        add_samples(&index, 1, 255..256);
        // floor(sqrt(256)) = 16 lists, probing capped at 10
        assert_eq!(clustered_params(&index), Some((16, 10)));
    }

    #[test]
    fn test_promotion_parameters_capped_for_large_batches() {
        let index = VectorIndex::open(IndexConfig {
            kmeans_iterations: 1,
            ..IndexConfig::in_memory()
        });

        // floor(sqrt(5000)) = 70, capped to 64 lists
        add_samples(&index, 1, 0..5000);
        assert_eq!(clustered_params(&index), Some((64, 10)));
        assert_eq!(index.stats().unwrap().total_vectors, 5000);
    }

    #[test]
    fn test_promotion_at_threshold() {
        let config = IndexConfig {
            promotion_threshold: 16,
            ..IndexConfig::in_memory()
        };
        let index = VectorIndex::open(config);

        add_samples(&index, 1, 0..15);
        assert_eq!(
            index.stats().unwrap().structure_kind,
            Some(StructureKind::Flat)
        );

        add_samples(&index, 2, 15..20);
        let stats = index.stats().unwrap();
        assert_eq!(stats.structure_kind, Some(StructureKind::Clustered));
        assert_eq!(stats.total_vectors, 20);

        // Promoted at 20 vectors: floor(sqrt(20)) = 4 lists, all probed
        assert_eq!(clustered_params(&index), Some((4, 4)));
        for i in [0usize, 7, 19] {
            let hits = index.search(&sample_vector(i), 1, None).unwrap();
            assert_eq!(hits[0].chunk_id, i as u64);
        }

        // Vectors added after promotion land in the clustered structure
        add_samples(&index, 3, 20..22);
        assert_eq!(index.stats().unwrap().total_vectors, 22);
        let hits = index.search(&sample_vector(21), 1, Some(3)).unwrap();
        assert_eq!(hits[0].chunk_id, 21);
    }

    #[test]
    fn test_delete_after_promotion_rebuilds_flat() {
        let config = IndexConfig {
            promotion_threshold: 8,
            ..IndexConfig::in_memory()
        };
        let index = VectorIndex::open(config);
        add_samples(&index, 1, 0..6);
        add_samples(&index, 2, 6..10);
        assert_eq!(
            index.stats().unwrap().structure_kind,
            Some(StructureKind::Clustered)
        );

        assert_eq!(index.delete_document(2).unwrap(), 4);
        let stats = index.stats().unwrap();
        assert_eq!(stats.structure_kind, Some(StructureKind::Flat));
        assert_eq!(stats.total_vectors, 6);

        let hits = index.search(&sample_vector(3), 1, None).unwrap();
        assert_eq!(hits[0].chunk_id, 3);
    }

    #[test]
    fn test_structure_consistency_check() {
        let ivf = IvfIndex {
            dimension: 2,
            centroids: vec![vec![1.0, 0.0]],
            lists: vec![vec![0, 0]],
            vectors: vec![1.0, 0.0, 0.0, 1.0],
            nprobe: 1,
        };
        assert!(IndexStructure::Clustered(ivf).check_consistency().is_err());

        let ragged = FlatIndex {
            dimension: 3,
            vectors: vec![1.0, 0.0],
        };
        assert!(IndexStructure::Flat(ragged).check_consistency().is_err());
    }

    #[test]
    fn test_artifact_paths() {
        let base = Path::new("/data/faiss_index");
        assert_eq!(structure_path(base), PathBuf::from("/data/faiss_index.index"));
        assert_eq!(map_path(base), PathBuf::from("/data/faiss_index.map.json"));
    }
}
