/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [config](crate::replica::Configuration).
//!
//! Replicas log using the [log](https://docs.rs/log/latest/log/) crate. To get these messages printed onto
//! a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase.
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceiveProposal](crate::events::ReceiveProposalEvent) is printed:
//!
//! ```text
//! ReceiveProposal, 1701329264, Id5u7f6, fNGCJyk, 4
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the public key of the
//!   origin of the proposal.
//! - The fourth value is the first seven characters of the Base64 encoding of the id of the proposed
//!   vertex.
//! - The fifth value is the view of the proposed vertex.
//!
//! Hashes and keys are always shortened this way.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::events::*;

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger: Sized + 'static {
    /// Name of the event in PascalCase.
    const NAME: &'static str;

    fn timestamp(&self) -> SystemTime;

    /// The values printed after the name and the timestamp.
    fn fields(&self) -> Vec<String>;

    /// Returns a pointer to the default logging handler for this event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &Self| log::info!("{}", csv_line(event)))
    }
}

macro_rules! log_as {
    ($event:ty, $name:literal, |$e:ident| [$($field:expr),* $(,)?]) => {
        impl Logger for $event {
            const NAME: &'static str = $name;

            fn timestamp(&self) -> SystemTime {
                self.timestamp
            }

            fn fields(&self) -> Vec<String> {
                let $e = self;
                vec![$($field.to_string()),*]
            }
        }
    };
}

log_as!(InsertVertexEvent, "InsertVertex", |e| [short(e.vertex.id.bytes()), e.vertex.view]);
log_as!(CommitVertexEvent, "CommitVertex", |e| [
    short(e.vertex.bytes()),
    e.view,
    format!("{:?}", e.outcome),
]);
log_as!(PruneVertexEvent, "PruneVertex", |e| [short(e.vertex.bytes())]);
log_as!(UpdateHighestQCEvent, "UpdateHighestQC", |e| [
    short(e.highest_qc.voted_vertex_id.bytes()),
    e.highest_qc.voted_view,
]);
log_as!(UpdateLockedViewEvent, "UpdateLockedView", |e| [
    short(e.locked_vertex.bytes()),
    e.locked_view,
]);

log_as!(ProposeEvent, "Propose", |e| [
    short(e.proposal.vertex.id.bytes()),
    e.proposal.vertex.view,
    e.proposal.vertex.command.len(),
]);
log_as!(VoteEvent, "Vote", |e| [short(e.vote.vertex_id.bytes()), e.vote.view]);
log_as!(NewViewEvent, "NewView", |e| [
    short(e.new_view.high_qc.voted_vertex_id.bytes()),
    e.new_view.view,
]);

log_as!(ReceiveProposalEvent, "ReceiveProposal", |e| [
    short(e.origin.to_bytes()),
    short(e.proposal.vertex.id.bytes()),
    e.proposal.vertex.view,
]);
log_as!(ReceiveVoteEvent, "ReceiveVote", |e| [
    short(e.origin.to_bytes()),
    short(e.vote.vertex_id.bytes()),
    e.vote.view,
]);
log_as!(ReceiveNewViewEvent, "ReceiveNewView", |e| [
    short(e.origin.to_bytes()),
    e.new_view.view,
    e.new_view.high_qc.voted_view,
]);

log_as!(StartViewEvent, "StartView", |e| [short(e.leader.to_bytes()), e.view]);
log_as!(ViewTimeoutEvent, "ViewTimeout", |e| [e.view, format!("{:?}", e.timeout)]);
log_as!(CollectQCEvent, "CollectQC", |e| [
    short(e.quorum_certificate.voted_vertex_id.bytes()),
    e.quorum_certificate.voted_view,
    e.quorum_certificate.signatures.count(),
]);

log_as!(StartSyncEvent, "StartSync", |e| [short(e.peer.to_bytes()), short(e.target.bytes())]);
log_as!(EndSyncEvent, "EndSync", |e| [short(e.target.bytes()), e.vertices_synced]);
log_as!(ReceiveSyncRequestEvent, "ReceiveSyncRequest", |e| [
    short(e.peer.to_bytes()),
    short(e.vertex_id.bytes()),
    e.count,
]);
log_as!(SendSyncResponseEvent, "SendSyncResponse", |e| [
    short(e.peer.to_bytes()),
    short(e.highest_qc.voted_vertex_id.bytes()),
    e.vertices,
]);

fn csv_line<E: Logger>(event: &E) -> String {
    let mut values = vec![
        E::NAME.to_string(),
        secs_since_unix_epoch(event.timestamp()).to_string(),
    ];
    values.extend(event.fields());
    values.join(", ")
}

// The first seven characters of the Base64 encoding of `bytes`.
fn short(bytes: impl AsRef<[u8]>) -> String {
    let mut encoded = STANDARD_NO_PAD.encode(bytes);
    encoded.truncate(7);
    encoded
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::basic::{CryptoHash, View};

    #[test]
    fn base64_prefix_is_seven_chars() {
        assert_eq!(short([0u8; 32]), "AAAAAAA");
        assert_eq!(short([0u8; 2]), "AAA");
    }

    #[test]
    fn lines_start_with_name_and_timestamp() {
        let prune = PruneVertexEvent {
            timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(42),
            vertex: CryptoHash::new([0; 32]),
        };
        assert_eq!(csv_line(&prune), "PruneVertex, 42, AAAAAAA");

        let timeout = ViewTimeoutEvent {
            timestamp: SystemTime::UNIX_EPOCH,
            view: View::new(7),
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(csv_line(&timeout), "ViewTimeout, 0, 7, 1.5s");
    }
}
