use std::collections::BTreeMap;

use crate::message::{AttachmentKey, AttachmentKind, AttachmentRef};

/// Ledger-local identity for a file whose upload may not have resolved yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PendingId(pub u64);

/// Upload progress for one tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    Uploading { remove_requested: bool },
    Ready(AttachmentRef),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub file_name: String,
    pub kind: AttachmentKind,
    pub state: UploadState,
}

/// What the caller must do after an upload resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Entry is now ready for a future send.
    Resolved,
    /// Removal was requested mid-flight; release the remote resource.
    RemoveRemote(AttachmentKey),
    /// The entry no longer exists (session reset in the meantime).
    Discarded,
}

/// What the caller must do after a removal request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalAction {
    /// Upload had resolved; release the remote resource now.
    RemoveRemote(AttachmentKey),
    /// Upload still in flight; removal applies once it resolves.
    Deferred,
    /// Nothing remote to release (failed or unknown entry).
    Forgotten,
}

/// Tracks pending file attachments for the next outgoing message.
///
/// Entries are keyed by ledger-local identity rather than server key so a
/// removal requested before the upload resolves can cancel-on-completion
/// instead of leaking a server-side resource.
#[derive(Debug, Default)]
pub struct AttachmentLedger {
    entries: BTreeMap<u64, LedgerEntry>,
    next_id: u64,
}

impl AttachmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a file before its server key exists.
    pub fn begin_upload(&mut self, file_name: impl Into<String>, kind: AttachmentKind) -> PendingId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            LedgerEntry {
                file_name: file_name.into(),
                kind,
                state: UploadState::Uploading {
                    remove_requested: false,
                },
            },
        );
        PendingId(id)
    }

    /// Records a completed upload, honoring any removal requested while the
    /// upload was still in flight.
    pub fn finish_upload(
        &mut self,
        id: PendingId,
        key: AttachmentKey,
        preview_url: Option<String>,
    ) -> UploadOutcome {
        let Some(state) = self.entries.get(&id.0).map(|entry| entry.state.clone()) else {
            return UploadOutcome::Discarded;
        };

        match state {
            UploadState::Uploading {
                remove_requested: true,
            } => {
                self.entries.remove(&id.0);
                UploadOutcome::RemoveRemote(key)
            }
            UploadState::Uploading { .. } => {
                if let Some(entry) = self.entries.get_mut(&id.0) {
                    entry.state = UploadState::Ready(AttachmentRef {
                        key,
                        file_name: entry.file_name.clone(),
                        kind: entry.kind,
                        preview_url,
                    });
                }
                UploadOutcome::Resolved
            }
            // A second resolution for the same entry is a side-channel bug;
            // keep the first result.
            UploadState::Ready(_) | UploadState::Failed(_) => {
                tracing::warn!(pending_id = id.0, "duplicate upload resolution ignored");
                UploadOutcome::Discarded
            }
        }
    }

    /// Records a per-attachment failure. Other uploads and text-only sends
    /// are unaffected.
    pub fn fail_upload(&mut self, id: PendingId, reason: impl Into<String>) {
        let Some(state) = self.entries.get(&id.0).map(|entry| entry.state.clone()) else {
            return;
        };

        if matches!(
            state,
            UploadState::Uploading {
                remove_requested: true
            }
        ) {
            self.entries.remove(&id.0);
            return;
        }

        if let Some(entry) = self.entries.get_mut(&id.0) {
            entry.state = UploadState::Failed(reason.into());
        }
    }

    /// Requests removal of a tracked file.
    pub fn request_remove(&mut self, id: PendingId) -> RemovalAction {
        let Some(state) = self.entries.get(&id.0).map(|entry| entry.state.clone()) else {
            return RemovalAction::Forgotten;
        };

        match state {
            UploadState::Uploading { .. } => {
                if let Some(entry) = self.entries.get_mut(&id.0) {
                    entry.state = UploadState::Uploading {
                        remove_requested: true,
                    };
                }
                RemovalAction::Deferred
            }
            UploadState::Ready(attachment) => {
                self.entries.remove(&id.0);
                RemovalAction::RemoveRemote(attachment.key)
            }
            UploadState::Failed(_) => {
                self.entries.remove(&id.0);
                RemovalAction::Forgotten
            }
        }
    }

    /// Attachment refs that would accompany a send of `ids`, without
    /// transferring ownership. Used for empty-send precondition checks.
    pub fn peek_resolved(&self, ids: &[PendingId]) -> usize {
        ids.iter()
            .filter(|id| {
                matches!(
                    self.entries.get(&id.0).map(|entry| &entry.state),
                    Some(UploadState::Ready(_))
                )
            })
            .count()
    }

    /// Returns the refs for every completed upload among `ids`, in the given
    /// order, evicting them from the ledger (ownership moves to the outgoing
    /// message). Files still uploading or failed stay behind.
    pub fn resolve_for_send(&mut self, ids: &[PendingId]) -> Vec<AttachmentRef> {
        let mut resolved = Vec::new();
        for id in ids {
            let is_ready = matches!(
                self.entries.get(&id.0).map(|entry| &entry.state),
                Some(UploadState::Ready(_))
            );
            if !is_ready {
                continue;
            }
            if let Some(LedgerEntry {
                state: UploadState::Ready(attachment),
                ..
            }) = self.entries.remove(&id.0)
            {
                resolved.push(attachment);
            }
        }
        resolved
    }

    /// Insertion-ordered view for chip rendering.
    pub fn entries(&self) -> impl Iterator<Item = (PendingId, &LedgerEntry)> {
        self.entries
            .iter()
            .map(|(id, entry)| (PendingId(*id), entry))
    }

    pub fn tracked_ids(&self) -> Vec<PendingId> {
        self.entries.keys().map(|id| PendingId(*id)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_key() -> AttachmentKey {
        AttachmentKey::mint()
    }

    #[test]
    fn resolve_for_send_keeps_caller_order_and_skips_unresolved() {
        let mut ledger = AttachmentLedger::new();
        let first = ledger.begin_upload("a.png", AttachmentKind::Image);
        let second = ledger.begin_upload("b.pdf", AttachmentKind::Document);
        let third = ledger.begin_upload("c.txt", AttachmentKind::Document);

        // Completion order differs from selection order on purpose.
        ledger.finish_upload(third, ready_key(), None);
        ledger.finish_upload(first, ready_key(), Some("file:///a.png".into()));
        ledger.fail_upload(second, "413 payload too large");

        let resolved = ledger.resolve_for_send(&[first, second, third]);
        let names = resolved
            .iter()
            .map(|attachment| attachment.file_name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, ["a.png", "c.txt"]);

        // Resolved entries moved out; the failed one is still tracked.
        assert_eq!(ledger.tracked_ids(), vec![second]);
    }

    #[test]
    fn resolve_for_send_with_no_files_is_empty() {
        let mut ledger = AttachmentLedger::new();
        assert!(ledger.resolve_for_send(&[]).is_empty());
    }

    #[test]
    fn still_uploading_files_remain_for_a_future_send() {
        let mut ledger = AttachmentLedger::new();
        let pending = ledger.begin_upload("slow.bin", AttachmentKind::Document);

        assert!(ledger.resolve_for_send(&[pending]).is_empty());

        ledger.finish_upload(pending, ready_key(), None);
        assert_eq!(ledger.resolve_for_send(&[pending]).len(), 1);
    }

    #[test]
    fn removal_before_resolution_defers_until_completion() {
        let mut ledger = AttachmentLedger::new();
        let pending = ledger.begin_upload("doc.pdf", AttachmentKind::Document);

        assert_eq!(ledger.request_remove(pending), RemovalAction::Deferred);

        let key = ready_key();
        assert_eq!(
            ledger.finish_upload(pending, key, None),
            UploadOutcome::RemoveRemote(key)
        );
        assert!(ledger.is_empty());
    }

    #[test]
    fn removal_of_resolved_entry_releases_the_remote_key() {
        let mut ledger = AttachmentLedger::new();
        let pending = ledger.begin_upload("doc.pdf", AttachmentKind::Document);
        let key = ready_key();
        ledger.finish_upload(pending, key, None);

        assert_eq!(
            ledger.request_remove(pending),
            RemovalAction::RemoveRemote(key)
        );
        assert!(ledger.is_empty());
    }

    #[test]
    fn removal_after_failure_has_nothing_remote_to_release() {
        let mut ledger = AttachmentLedger::new();
        let pending = ledger.begin_upload("doc.pdf", AttachmentKind::Document);
        ledger.fail_upload(pending, "network down");

        assert_eq!(ledger.request_remove(pending), RemovalAction::Forgotten);
        assert!(ledger.is_empty());
    }

    #[test]
    fn failure_of_a_removed_pending_upload_evicts_silently() {
        let mut ledger = AttachmentLedger::new();
        let pending = ledger.begin_upload("doc.pdf", AttachmentKind::Document);
        ledger.request_remove(pending);
        ledger.fail_upload(pending, "aborted");
        assert!(ledger.is_empty());
    }

    #[test]
    fn one_failed_upload_does_not_block_others() {
        let mut ledger = AttachmentLedger::new();
        let bad = ledger.begin_upload("bad.bin", AttachmentKind::Document);
        let good = ledger.begin_upload("good.png", AttachmentKind::Image);

        ledger.fail_upload(bad, "checksum mismatch");
        ledger.finish_upload(good, ready_key(), None);

        assert_eq!(ledger.peek_resolved(&[bad, good]), 1);
        let resolved = ledger.resolve_for_send(&[bad, good]);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].file_name, "good.png");
    }

    #[test]
    fn finish_upload_after_reset_reports_discarded() {
        let mut ledger = AttachmentLedger::new();
        let pending = ledger.begin_upload("doc.pdf", AttachmentKind::Document);
        ledger.clear();

        assert_eq!(
            ledger.finish_upload(pending, ready_key(), None),
            UploadOutcome::Discarded
        );
    }
}
