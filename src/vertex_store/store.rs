/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`VertexStore`], an arena of uncommitted vertices keyed by id.

use std::collections::{HashMap, HashSet};

use crate::{
    app::{ExecutionOutcome, StateComputer},
    types::{
        basic::{CryptoHash, View},
        certificates::QuorumCertificate,
        vertex::Vertex,
    },
};

use super::state::VertexStoreState;

/// The speculative tree of vertices rooted at the most recently committed vertex.
///
/// Every vertex in the store other than the root has its parent in the store, so walking parent ids from any
/// stored vertex always ends at the root.
pub struct VertexStore {
    root: CryptoHash,
    vertices: HashMap<CryptoHash, Vertex>,
    children: HashMap<CryptoHash, Vec<CryptoHash>>,
    views: HashMap<View, Vec<CryptoHash>>,
    highest_qc: QuorumCertificate,
}

impl VertexStore {
    /// Create a store that holds only `root`. `highest_qc` is expected to certify `root` or be older.
    pub fn new(root: Vertex, highest_qc: QuorumCertificate) -> VertexStore {
        let root_id = root.id;
        let mut views = HashMap::new();
        views.insert(root.view, vec![root_id]);
        let mut vertices = HashMap::new();
        vertices.insert(root_id, root);

        VertexStore {
            root: root_id,
            vertices,
            children: HashMap::new(),
            views,
            highest_qc,
        }
    }

    /// Rebuild a store from its persisted form.
    pub fn from_state(state: VertexStoreState) -> Result<VertexStore, VertexStoreError> {
        let VertexStoreState {
            root,
            mut vertices,
            highest_qc,
        } = state;

        let mut store = VertexStore::new(root, highest_qc);
        vertices.sort_by_key(|vertex| vertex.view);
        for vertex in vertices {
            store.insert_vertex(vertex)?;
        }
        Ok(store)
    }

    /// The persisted form of this store.
    pub fn state(&self) -> VertexStoreState {
        let mut vertices: Vec<Vertex> = self
            .vertices
            .values()
            .filter(|vertex| vertex.id != self.root)
            .cloned()
            .collect();
        vertices.sort_by_key(|vertex| vertex.view);

        VertexStoreState {
            root: self.root().clone(),
            vertices,
            highest_qc: self.highest_qc.clone(),
        }
    }

    /// Insert `vertex` under its parent. Returns whether the vertex was newly inserted.
    ///
    /// # Precondition
    /// [`vertex.is_correct`](Vertex::is_correct) holds.
    pub fn insert_vertex(&mut self, vertex: Vertex) -> Result<bool, VertexStoreError> {
        if let Some(existing) = self.vertices.get(&vertex.id) {
            return if *existing == vertex {
                Ok(false)
            } else {
                log::warn!("Vertex {} collides with a stored vertex with different contents", vertex.id);
                Err(VertexStoreError::Equivocation { id: vertex.id })
            };
        }

        let root_view = self.root().view;
        if vertex.view <= root_view {
            return Err(VertexStoreError::BelowRoot {
                view: vertex.view,
                root_view,
            });
        }

        let parent_id = vertex.parent_id();
        let parent_view = match self.vertices.get(&parent_id) {
            Some(parent) => parent.view,
            None => return Err(VertexStoreError::MissingParent { parent: parent_id }),
        };
        if parent_view != vertex.parent_view() {
            return Err(VertexStoreError::InconsistentParent {
                id: vertex.id,
                claimed_view: vertex.parent_view(),
                actual_view: parent_view,
            });
        }

        let same_view = self.views.entry(vertex.view).or_default();
        if !same_view.is_empty() {
            log::warn!(
                "Potential equivocation: vertex {} shares view {} with {:?}",
                vertex.id,
                vertex.view,
                same_view
            );
        }
        same_view.push(vertex.id);

        self.children.entry(parent_id).or_default().push(vertex.id);
        self.vertices.insert(vertex.id, vertex);
        Ok(true)
    }

    pub fn contains(&self, id: &CryptoHash) -> bool {
        self.vertices.contains_key(id)
    }

    pub fn get_vertex(&self, id: &CryptoHash) -> Option<&Vertex> {
        self.vertices.get(id)
    }

    pub fn root(&self) -> &Vertex {
        // The root is never removed from `vertices`.
        &self.vertices[&self.root]
    }

    pub fn highest_qc(&self) -> &QuorumCertificate {
        &self.highest_qc
    }

    /// Record `qc` as the highest QC if it is newer and its vertex is in the store. Returns whether it was
    /// recorded.
    pub fn add_qc(&mut self, qc: &QuorumCertificate) -> bool {
        if qc.voted_view > self.highest_qc.voted_view && self.contains(&qc.voted_vertex_id) {
            self.highest_qc = qc.clone();
            true
        } else {
            false
        }
    }

    /// The vertices from `id` up to, but excluding, the root, newest first. `None` if `id` is not in the store.
    pub fn path_to_root(&self, id: &CryptoHash) -> Option<Vec<&Vertex>> {
        let mut path = Vec::new();
        let mut cursor = self.vertices.get(id)?;
        while cursor.id != self.root {
            path.push(cursor);
            cursor = self.vertices.get(&cursor.parent_id())?;
        }
        Some(path)
    }

    /// Up to `count` vertices, starting with `id` and walking towards the root. The root itself is the last
    /// vertex returned if the walk reaches it. `None` if `id` is not in the store.
    pub fn get_vertices(&self, id: &CryptoHash, count: usize) -> Option<Vec<Vertex>> {
        let mut vertices = Vec::new();
        let mut cursor = self.vertices.get(id)?;
        while vertices.len() < count {
            vertices.push(cursor.clone());
            if cursor.id == self.root {
                break;
            }
            cursor = match self.vertices.get(&cursor.parent_id()) {
                Some(parent) => parent,
                None => break,
            };
        }
        Some(vertices)
    }

    /// Commit the vertex `id` and every uncommitted ancestor of it.
    ///
    /// Every vertex that does not descend from `id` is removed and `id` becomes the new root. If the highest
    /// QC certified a removed vertex, it is replaced by the highest QC carried by a remaining vertex. The newly
    /// committed vertices are returned oldest first, and are executed through
    /// [`PendingExecution::execute`] once the pruned store has been saved. Committing a vertex at or below the
    /// root's view is a no-op.
    pub fn commit(&mut self, id: &CryptoHash) -> Result<PendingExecution, VertexStoreError> {
        let target_view = match self.vertices.get(id) {
            Some(vertex) => vertex.view,
            None => return Err(VertexStoreError::MissingVertex { id: *id }),
        };
        if target_view <= self.root().view {
            return Ok(PendingExecution::default());
        }

        let mut committed: Vec<Vertex> = self
            .path_to_root(id)
            .ok_or(VertexStoreError::MissingVertex { id: *id })?
            .into_iter()
            .cloned()
            .collect();
        committed.reverse();

        let keep = self.descendants(id);
        let committed_ids: HashSet<CryptoHash> = committed.iter().map(|vertex| vertex.id).collect();
        let old_root = self.root;

        let mut pruned = Vec::new();
        let removed: Vec<CryptoHash> = self
            .vertices
            .keys()
            .filter(|vertex_id| !keep.contains(vertex_id))
            .copied()
            .collect();
        for vertex_id in removed {
            if let Some(vertex) = self.vertices.remove(&vertex_id) {
                self.children.remove(&vertex_id);
                if let Some(same_view) = self.views.get_mut(&vertex.view) {
                    same_view.retain(|other| *other != vertex_id);
                    if same_view.is_empty() {
                        self.views.remove(&vertex.view);
                    }
                }
                if vertex_id != old_root && !committed_ids.contains(&vertex_id) {
                    pruned.push(vertex_id);
                }
            }
        }

        self.root = *id;
        if !self.contains(&self.highest_qc.voted_vertex_id) {
            self.reset_highest_qc();
        }
        Ok(PendingExecution { committed, pruned })
    }

    // Every non-root vertex carries a QC for its parent, which is also in the store.
    fn reset_highest_qc(&mut self) {
        let highest = self
            .vertices
            .values()
            .filter(|vertex| vertex.id != self.root)
            .map(|vertex| &vertex.qc)
            .max_by_key(|qc| qc.voted_view)
            .cloned();
        match highest {
            Some(qc) => self.highest_qc = qc,
            None => log::warn!(
                "Highest QC for {} was pruned and no remaining vertex carries a replacement",
                self.highest_qc.voted_vertex_id
            ),
        }
    }

    // `id` and every vertex that descends from it.
    fn descendants(&self, id: &CryptoHash) -> HashSet<CryptoHash> {
        let mut found = HashSet::new();
        let mut frontier = vec![*id];
        while let Some(vertex_id) = frontier.pop() {
            if found.insert(vertex_id) {
                if let Some(children) = self.children.get(&vertex_id) {
                    frontier.extend(children.iter().copied());
                }
            }
        }
        found
    }
}

/// Vertices committed by [`VertexStore::commit`] that have not been executed yet.
#[must_use]
#[derive(Debug, Default)]
pub struct PendingExecution {
    committed: Vec<Vertex>,
    pruned: Vec<CryptoHash>,
}

impl PendingExecution {
    /// Execute the committed vertices through `state_computer`, oldest first.
    pub fn execute(self, state_computer: &mut impl StateComputer) -> CommitOutcome {
        let committed = self
            .committed
            .into_iter()
            .map(|vertex| {
                let outcome = state_computer.execute(&vertex);
                if outcome == ExecutionOutcome::Rejected {
                    log::warn!("State computer rejected committed vertex {} at view {}", vertex.id, vertex.view);
                }
                (vertex, outcome)
            })
            .collect();

        CommitOutcome {
            committed,
            pruned: self.pruned,
        }
    }
}

/// What a call to [`VertexStore::commit`] changed, once executed.
#[derive(Debug, Default)]
pub struct CommitOutcome {
    /// Newly committed vertices with their execution outcomes, oldest first.
    pub committed: Vec<(Vertex, ExecutionOutcome)>,
    /// Ids of vertices removed because they do not extend the committed vertex.
    pub pruned: Vec<CryptoHash>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VertexStoreError {
    /// The vertex's parent is not in the store.
    MissingParent { parent: CryptoHash },
    /// A different vertex with the same id is already stored.
    Equivocation { id: CryptoHash },
    /// The vertex's view is not above the root's, so it can never join the tree.
    BelowRoot { view: View, root_view: View },
    /// The vertex's QC names a parent view different from the stored parent's view.
    InconsistentParent {
        id: CryptoHash,
        claimed_view: View,
        actual_view: View,
    },
    /// The vertex to commit is not in the store.
    MissingVertex { id: CryptoHash },
}
