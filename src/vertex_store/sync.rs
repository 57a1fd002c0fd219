/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Client side of the vertex sync protocol.
//!
//! When a message references a vertex that is not in the [`VertexStore`](super::VertexStore), the
//! [preprocessor](crate::event_processor::BFTEventProcessor) starts a sync for that *target* vertex with
//! [`VertexSync::start`]. A sync fetches vertices from the target towards the root in batches of at most
//! `request_limit`, until it reaches a vertex whose parent is already stored:
//!
//! ```text
//! start ──► GetVerticesRequest(target) ──► response ──► [parent known] ──► Complete
//!                     ▲                        │
//!                     └──── GetVerticesRequest(parent of last vertex) ◄── [parent unknown]
//! ```
//!
//! A request that times out, or is answered with an error or an invalid batch, is retried against a randomly
//! chosen fallback validator, up to `max_retries` times. After that the sync fails.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::{
    messages::{GetVerticesRequest, GetVerticesResponse},
    types::{
        basic::{CryptoHash, View},
        crypto_primitives::VerifyingKey,
        validators::ValidatorSet,
        vertex::Vertex,
    },
};

pub(crate) struct VertexSync {
    request_limit: u32,
    response_timeout: Duration,
    max_retries: u32,
    requests: HashMap<CryptoHash, SyncRequest>,
}

struct SyncRequest {
    peer: VerifyingKey,
    tried: Vec<VerifyingKey>,
    // The vertex id that the outstanding request starts from.
    next: CryptoHash,
    // Vertices fetched so far, newest first.
    fetched: Vec<Vertex>,
    retries: u32,
    deadline: Instant,
}

/// What to do after a response has been applied to a sync.
#[derive(Debug)]
pub(crate) enum SyncProgress {
    /// Every missing vertex was fetched. `vertices` are ordered oldest first, ready for insertion.
    Complete {
        target: CryptoHash,
        vertices: Vec<Vertex>,
    },
    /// More vertices are needed. Send `request` to `peer`.
    Continue {
        peer: VerifyingKey,
        request: GetVerticesRequest,
    },
    /// The response was not for any sync in progress.
    Unsolicited,
    /// The response was invalid. The caller should [`retry`](VertexSync::retry) `target`.
    Invalid { target: CryptoHash },
}

/// Outcome of retrying a sync.
#[derive(Debug)]
pub(crate) enum SyncRetry {
    Retry {
        peer: VerifyingKey,
        request: GetVerticesRequest,
    },
    GaveUp {
        target: CryptoHash,
    },
}

impl VertexSync {
    pub(crate) fn new(request_limit: u32, response_timeout: Duration, max_retries: u32) -> Self {
        Self {
            request_limit: request_limit.max(1),
            response_timeout,
            max_retries,
            requests: HashMap::new(),
        }
    }

    pub(crate) fn is_syncing(&self, target: &CryptoHash) -> bool {
        self.requests.contains_key(target)
    }

    /// Start fetching `target` from `peer`. Returns the request to send, or `None` if a sync for `target` is
    /// already in progress.
    pub(crate) fn start(
        &mut self,
        target: CryptoHash,
        peer: VerifyingKey,
        now: Instant,
    ) -> Option<GetVerticesRequest> {
        if self.requests.contains_key(&target) {
            return None;
        }

        self.requests.insert(
            target,
            SyncRequest {
                peer,
                tried: vec![peer],
                next: target,
                fetched: Vec::new(),
                retries: 0,
                deadline: now + self.response_timeout,
            },
        );
        Some(self.request_for(target))
    }

    /// Apply a response from `origin`.
    ///
    /// `is_known` says whether a vertex is already in the store, and `root_view` is the store's root view.
    /// Vertices at or below `root_view` that are not known belong to a branch that conflicts with committed
    /// history, which makes the response invalid.
    pub(crate) fn on_response(
        &mut self,
        response: GetVerticesResponse,
        origin: &VerifyingKey,
        validator_set: &ValidatorSet,
        root_view: View,
        is_known: impl Fn(&CryptoHash) -> bool,
        now: Instant,
    ) -> SyncProgress {
        let target = match self
            .requests
            .iter()
            .find(|(_, request)| request.next == response.from_id && request.peer == *origin)
        {
            Some((target, _)) => *target,
            None => return SyncProgress::Unsolicited,
        };

        if !is_valid_batch(&response, validator_set) {
            log::warn!("Invalid sync response for {} from peer", target);
            return SyncProgress::Invalid { target };
        }

        let request_limit = self.request_limit;
        let response_timeout = self.response_timeout;
        let request = match self.requests.get_mut(&target) {
            Some(request) => request,
            None => return SyncProgress::Unsolicited,
        };

        for vertex in response.vertices {
            if is_known(&vertex.id) {
                return self.complete(target);
            }
            if vertex.view <= root_view {
                return SyncProgress::Invalid { target };
            }
            let parent_known = is_known(&vertex.parent_id());
            let next = vertex.parent_id();
            request.fetched.push(vertex);
            if parent_known {
                return self.complete(target);
            }
            request.next = next;
        }

        request.deadline = now + response_timeout;
        SyncProgress::Continue {
            peer: request.peer,
            request: GetVerticesRequest {
                vertex_id: request.next,
                count: request_limit,
            },
        }
    }

    /// The peer could not serve the request for `from_id`. Returns the target whose sync should be retried.
    pub(crate) fn on_error_response(
        &self,
        from_id: &CryptoHash,
        origin: &VerifyingKey,
    ) -> Option<CryptoHash> {
        self.requests
            .iter()
            .find(|(_, request)| request.next == *from_id && request.peer == *origin)
            .map(|(target, _)| *target)
    }

    /// Targets whose outstanding request has passed its deadline.
    pub(crate) fn expired(&self, now: Instant) -> Vec<CryptoHash> {
        self.requests
            .iter()
            .filter(|(_, request)| request.deadline <= now)
            .map(|(target, _)| *target)
            .collect()
    }

    /// The earliest deadline among outstanding requests.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.requests.values().map(|request| request.deadline).min()
    }

    /// Re-send the outstanding request of `target` to a validator that has not been tried yet (or any other
    /// validator, once every validator was tried), or give up once the retry budget is spent.
    pub(crate) fn retry(
        &mut self,
        target: &CryptoHash,
        validator_set: &ValidatorSet,
        me: &VerifyingKey,
        now: Instant,
    ) -> SyncRetry {
        let request = match self.requests.get_mut(target) {
            Some(request) => request,
            None => return SyncRetry::GaveUp { target: *target },
        };

        if request.retries >= self.max_retries {
            self.requests.remove(target);
            return SyncRetry::GaveUp { target: *target };
        }

        let mut excluded = request.tried.clone();
        excluded.push(*me);
        let peer = validator_set
            .random_except(&excluded)
            .or_else(|| validator_set.random_except(&[*me, request.peer]))
            .unwrap_or(request.peer);

        request.retries += 1;
        request.peer = peer;
        request.tried.push(peer);
        request.deadline = now + self.response_timeout;

        SyncRetry::Retry {
            peer,
            request: GetVerticesRequest {
                vertex_id: request.next,
                count: self.request_limit,
            },
        }
    }

    /// Stop syncing `target`, for example because the vertex arrived by other means.
    pub(crate) fn cancel(&mut self, target: &CryptoHash) {
        self.requests.remove(target);
    }

    /// Targets for which a sync is in progress.
    pub(crate) fn targets(&self) -> Vec<CryptoHash> {
        self.requests.keys().copied().collect()
    }

    fn request_for(&self, target: CryptoHash) -> GetVerticesRequest {
        GetVerticesRequest {
            vertex_id: target,
            count: self.request_limit,
        }
    }

    fn complete(&mut self, target: CryptoHash) -> SyncProgress {
        let mut vertices = self
            .requests
            .remove(&target)
            .map(|request| request.fetched)
            .unwrap_or_default();
        vertices.reverse();
        SyncProgress::Complete { target, vertices }
    }
}

// A batch is valid if it starts at the requested vertex, is a parent chain, and every vertex is correct.
fn is_valid_batch(response: &GetVerticesResponse, validator_set: &ValidatorSet) -> bool {
    match response.vertices.first() {
        Some(first) if first.id == response.from_id => (),
        _ => return false,
    }

    response
        .vertices
        .windows(2)
        .all(|pair| pair[0].parent_id() == pair[1].id)
        && response
            .vertices
            .iter()
            .all(|vertex| vertex.is_correct(validator_set))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        basic::{Command, Power},
        certificates::QuorumCertificate,
        crypto_primitives::SigningKey,
    };
    use rand_core::OsRng;

    fn peers(n: usize) -> (Vec<VerifyingKey>, ValidatorSet) {
        let mut csprg = OsRng {};
        let mut validator_set = ValidatorSet::new();
        let keys: Vec<VerifyingKey> = (0..n)
            .map(|_| SigningKey::generate(&mut csprg).verifying_key())
            .collect();
        for key in &keys {
            validator_set.put(key, Power::new(1));
        }
        (keys, validator_set)
    }

    #[test]
    fn start_is_deduplicated_per_target() {
        let (keys, _) = peers(2);
        let mut sync = VertexSync::new(4, Duration::from_secs(1), 2);
        let target = CryptoHash::new([1; 32]);
        let now = Instant::now();

        assert!(sync.start(target, keys[0], now).is_some());
        assert!(sync.start(target, keys[1], now).is_none());
        assert!(sync.is_syncing(&target));
    }

    #[test]
    fn completes_when_parent_is_known() {
        let (keys, validator_set) = peers(1);
        let mut sync = VertexSync::new(4, Duration::from_secs(1), 2);
        let vertex = Vertex::new(View::new(1), Command::new(vec![1]), QuorumCertificate::genesis_qc());
        let now = Instant::now();
        sync.start(vertex.id, keys[0], now);

        let genesis_id = Vertex::genesis().id;
        let progress = sync.on_response(
            GetVerticesResponse {
                from_id: vertex.id,
                vertices: vec![vertex.clone()],
            },
            &keys[0],
            &validator_set,
            View::genesis(),
            |id| *id == genesis_id,
            now,
        );

        assert!(!sync.is_syncing(&vertex.id));
        match progress {
            SyncProgress::Complete { target, vertices } => {
                assert_eq!(target, vertex.id);
                assert_eq!(vertices, vec![vertex]);
            }
            other => panic!("unexpected progress: {:?}", other),
        }
    }

    #[test]
    fn response_from_wrong_peer_is_unsolicited() {
        let (keys, validator_set) = peers(2);
        let mut sync = VertexSync::new(4, Duration::from_secs(1), 2);
        let vertex = Vertex::new(View::new(1), Command::new(vec![1]), QuorumCertificate::genesis_qc());
        let now = Instant::now();
        sync.start(vertex.id, keys[0], now);

        let progress = sync.on_response(
            GetVerticesResponse {
                from_id: vertex.id,
                vertices: vec![vertex],
            },
            &keys[1],
            &validator_set,
            View::genesis(),
            |_| true,
            now,
        );
        assert!(matches!(progress, SyncProgress::Unsolicited));
    }

    #[test]
    fn gives_up_after_max_retries() {
        let (keys, validator_set) = peers(3);
        let mut sync = VertexSync::new(4, Duration::from_millis(10), 2);
        let target = CryptoHash::new([7; 32]);
        let now = Instant::now();
        sync.start(target, keys[1], now);

        let later = now + Duration::from_millis(20);
        assert_eq!(sync.expired(later), vec![target]);

        for _ in 0..2 {
            match sync.retry(&target, &validator_set, &keys[0], later) {
                SyncRetry::Retry { peer, request } => {
                    assert_ne!(peer, keys[0]);
                    assert_eq!(request.vertex_id, target);
                }
                SyncRetry::GaveUp { .. } => panic!("gave up too early"),
            }
        }
        assert!(matches!(
            sync.retry(&target, &validator_set, &keys[0], later),
            SyncRetry::GaveUp { .. }
        ));
        assert!(!sync.is_syncing(&target));
    }
}
