//! Transaction ledger: bounded, insertion-ordered record of requests and replies.
//!
//! A tracked request stays pending until a reply with the same request id
//! replaces it, or until a sweep marks it timed out. Timed-out requests are
//! kept for audit but no longer take part in correlation.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use grid_protocol::{CommandKind, Reply, Request};

use crate::error::LedgerError;

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerEntry {
    Request(TrackedRequest),
    Reply(Reply),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedRequest {
    pub request: Request,
    pub timed_out: bool,
}

impl LedgerEntry {
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::Request(tracked) => Some(&tracked.request.request_id),
            Self::Reply(reply) => reply.request_id.as_deref(),
        }
    }

    /// Unanswered and not timed out.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Request(tracked) if !tracked.timed_out)
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::Request(tracked) if tracked.timed_out)
    }

    pub fn as_reply(&self) -> Option<&Reply> {
        match self {
            Self::Reply(reply) => Some(reply),
            Self::Request(_) => None,
        }
    }
}

/// What [`Ledger::reconcile`] did with a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// Replaced the pending request it answers.
    Resolved,
    /// No pending request matched; stored as a standalone entry.
    Appended,
    /// Prompt fragment concatenated onto an earlier reply.
    Accumulated,
    /// Already resolved by an identical request id; ignored.
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    entries: VecDeque<LedgerEntry>,
    capacity: usize,
}

impl Ledger {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record an outbound request as pending.
    pub fn track(&mut self, request: Request) -> Result<(), LedgerError> {
        if self.pending_position(&request.request_id).is_some() {
            return Err(LedgerError::DuplicatePending(request.request_id));
        }
        self.push(LedgerEntry::Request(TrackedRequest {
            request,
            timed_out: false,
        }));
        Ok(())
    }

    pub fn reconcile(&mut self, reply: Reply) -> Reconciled {
        let Some(request_id) = reply.request_id.clone() else {
            self.push(LedgerEntry::Reply(reply));
            return Reconciled::Appended;
        };

        if let Some(index) = self.pending_position(&request_id) {
            self.entries[index] = LedgerEntry::Reply(reply);
            return Reconciled::Resolved;
        }

        let earlier = self.entries.iter_mut().rev().find_map(|entry| match entry {
            LedgerEntry::Reply(existing)
                if existing.request_id.as_deref() == Some(request_id.as_str()) =>
            {
                Some(existing)
            }
            _ => None,
        });
        match earlier {
            Some(existing) => {
                let fragment = reply.message.as_deref().filter(|m| !m.is_empty());
                match fragment {
                    Some(fragment) if reply.command == CommandKind::Prompt => {
                        existing
                            .message
                            .get_or_insert_with(String::new)
                            .push_str(fragment);
                        existing.received_at = reply.received_at.or(existing.received_at);
                        existing.elapsed_ms = reply.elapsed_ms.or(existing.elapsed_ms);
                        existing.status = reply.status;
                        Reconciled::Accumulated
                    }
                    _ => Reconciled::Duplicate,
                }
            }
            None => {
                self.push(LedgerEntry::Reply(reply));
                Reconciled::Appended
            }
        }
    }

    /// Mark pending requests older than `threshold_ms` as timed out.
    ///
    /// Ages are compared on whole UTC seconds. Returns how many entries
    /// changed state.
    pub fn sweep_timeouts(&mut self, now: DateTime<Utc>, threshold_ms: u64) -> usize {
        let now_secs = now.timestamp();
        let threshold = i64::try_from(threshold_ms).unwrap_or(i64::MAX);
        let mut marked = 0;
        for entry in self.entries.iter_mut() {
            if let LedgerEntry::Request(tracked) = entry {
                if tracked.timed_out {
                    continue;
                }
                let age_ms = (now_secs - tracked.request.request_initiated_on.timestamp())
                    .saturating_mul(1000);
                if age_ms > threshold {
                    tracked.timed_out = true;
                    marked += 1;
                }
            }
        }
        marked
    }

    /// Latest reply caused by this session that loaded or changed `grid_id`.
    pub fn last_grid_reply(&self, grid_id: &str) -> Option<&Reply> {
        self.replies().rev().find(|reply| {
            reply.same_session
                && reply.command.carries_data_set()
                && reply.grid_id.as_deref() == Some(grid_id)
        })
    }

    /// Latest non-heartbeat reply caused by this session, if it failed and
    /// was not about a grid.
    pub fn last_failure(&self) -> Option<&Reply> {
        self.replies()
            .rev()
            .find(|reply| reply.same_session && reply.command != CommandKind::Heartbeat)
            .filter(|reply| !reply.is_success() && reply.grid_id.is_none())
    }

    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &LedgerEntry> {
        self.entries.iter()
    }

    pub fn replies(&self) -> impl DoubleEndedIterator<Item = &Reply> {
        self.entries.iter().filter_map(LedgerEntry::as_reply)
    }

    pub fn find(&self, request_id: &str) -> Option<&LedgerEntry> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.request_id() == Some(request_id))
    }

    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_pending()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn pending_position(&self, request_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.is_pending() && entry.request_id() == Some(request_id))
    }

    fn push(&mut self, entry: LedgerEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}
