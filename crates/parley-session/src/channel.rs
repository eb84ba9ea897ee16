use parley_core::{Envelope, EnvelopeType, ErrorKind, FeedbackPayload, Payload, Sequence};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

/// Smallest outbound bound. A single-shot reply queues an ack and a
/// `session_complete` behind the held summary, and overflow may add a
/// backpressure notice in front of them; all four must fit.
pub const MIN_OUTBOUND_CAPACITY: usize = 4;

/// Result of pushing a `user_feedback` into the inbound queue.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// Stored under a fresh inbound sequence.
    Accepted(Envelope),
    /// A submission with the same draft id was already stored.
    Duplicate,
}

/// Ordered, bounded per-session queues.
///
/// Outbound envelopes are retained until a live transport has taken them, so
/// a reattaching transport can be replayed everything past the watermark it
/// reports. `agent_message` is a single slot: enqueueing a new one drops the
/// previous one, and it survives delivery so a fresh page always gets the
/// current summary.
#[derive(Debug)]
pub struct MessageChannel {
    outbound: VecDeque<Envelope>,
    inbound: VecDeque<Envelope>,
    outbound_capacity: usize,
    inbound_capacity: usize,
    last_outbound: Sequence,
    last_inbound: Sequence,
    accepted_drafts: HashSet<String>,
    dropped_outbound: u64,
}

impl MessageChannel {
    /// Creates empty queues with the given bounds (clamped to sane minimums).
    pub fn new(outbound_capacity: usize, inbound_capacity: usize) -> Self {
        Self {
            outbound: VecDeque::new(),
            inbound: VecDeque::new(),
            outbound_capacity: outbound_capacity.max(MIN_OUTBOUND_CAPACITY),
            inbound_capacity: inbound_capacity.max(1),
            last_outbound: 0,
            last_inbound: 0,
            accepted_drafts: HashSet::new(),
            dropped_outbound: 0,
        }
    }

    /// Assigns the next outbound sequence and appends.
    ///
    /// On overflow the oldest non-critical envelopes are evicted (stale
    /// backpressure notices first) and an `error` envelope of kind
    /// `backpressure` is recorded ahead of the new one.
    pub fn enqueue_outbound(&mut self, payload: Payload) -> Envelope {
        if payload.kind() == EnvelopeType::AgentMessage {
            self.outbound
                .retain(|e| e.kind() != EnvelopeType::AgentMessage);
        }

        if self.outbound.len() >= self.outbound_capacity {
            let needed = self.outbound.len() + 2 - self.outbound_capacity;
            let dropped = self.evict(needed);
            if dropped > 0 {
                self.dropped_outbound += dropped as u64;
                warn!(
                    dropped,
                    total_dropped = self.dropped_outbound,
                    "Outbound queue overflow, dropping oldest envelopes"
                );
                let notice = Payload::error(
                    ErrorKind::Backpressure,
                    format!("{dropped} older message(s) were dropped"),
                );
                self.push_outbound(notice);
            }
        }

        let env = self.push_outbound(payload);
        debug!(sequence = env.sequence, kind = %env.kind(), "Outbound envelope queued");
        env
    }

    fn push_outbound(&mut self, payload: Payload) -> Envelope {
        self.last_outbound += 1;
        let env = Envelope::new(self.last_outbound, payload);
        self.outbound.push_back(env.clone());
        env
    }

    /// Removes up to `count` envelopes, never the held `agent_message`.
    fn evict(&mut self, count: usize) -> usize {
        let mut dropped = 0;
        while dropped < count {
            let idx = self
                .outbound
                .iter()
                .position(is_backpressure_notice)
                .or_else(|| {
                    self.outbound
                        .iter()
                        .position(|e| e.kind() != EnvelopeType::AgentMessage)
                });
            match idx {
                Some(i) => {
                    self.outbound.remove(i);
                    dropped += 1;
                }
                None => break,
            }
        }
        dropped
    }

    /// Every retained outbound envelope with a sequence greater than
    /// `after`, in order. Nothing is removed: a later transport may need the
    /// same replay.
    pub fn drain_outbound(&self, after: Sequence) -> Vec<Envelope> {
        self.outbound
            .iter()
            .filter(|e| e.sequence > after)
            .cloned()
            .collect()
    }

    /// Forgets envelopes at or below `watermark`, keeping the held
    /// `agent_message`. Called once a live transport has taken them, so a
    /// caught-up client never pushes the queue into overflow.
    pub fn trim_delivered(&mut self, watermark: Sequence) -> usize {
        let before = self.outbound.len();
        self.outbound
            .retain(|e| e.sequence > watermark || e.kind() == EnvelopeType::AgentMessage);
        let trimmed = before - self.outbound.len();
        if trimmed > 0 {
            debug!(trimmed, watermark, "Delivered envelopes trimmed");
        }
        trimmed
    }

    /// Stores a client reply unless its draft id was already accepted.
    pub fn enqueue_inbound(&mut self, feedback: FeedbackPayload) -> InboundOutcome {
        if self.accepted_drafts.contains(&feedback.draft_id) {
            debug!(draft_id = %feedback.draft_id, "Duplicate draft ignored");
            return InboundOutcome::Duplicate;
        }
        self.accepted_drafts.insert(feedback.draft_id.clone());

        if self.inbound.len() >= self.inbound_capacity {
            if let Some(old) = self.inbound.pop_front() {
                warn!(sequence = old.sequence, "Inbound queue overflow, dropping oldest reply");
            }
        }

        self.last_inbound += 1;
        let env = Envelope::new(self.last_inbound, Payload::UserFeedback(feedback));
        self.inbound.push_back(env.clone());
        InboundOutcome::Accepted(env)
    }

    /// Whether a reply with this draft id was already accepted.
    pub fn has_draft(&self, draft_id: &str) -> bool {
        self.accepted_drafts.contains(draft_id)
    }

    /// Removes and returns the oldest unconsumed reply.
    pub fn pop_inbound(&mut self) -> Option<Envelope> {
        self.inbound.pop_front()
    }

    /// The content of the held `agent_message`, if any.
    pub fn latest_agent_message(&self) -> Option<&str> {
        self.outbound.iter().rev().find_map(|e| match &e.payload {
            Payload::AgentMessage { content } => Some(content.as_str()),
            _ => None,
        })
    }

    /// Highest outbound sequence assigned so far.
    pub fn last_outbound_sequence(&self) -> Sequence {
        self.last_outbound
    }

    /// Retained outbound envelopes.
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Unconsumed inbound replies.
    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    /// Total envelopes evicted by overflow.
    pub fn dropped_outbound(&self) -> u64 {
        self.dropped_outbound
    }

    /// Frees both queues. Counters and the draft set survive so that
    /// sequences stay monotonic and resubmissions stay idempotent.
    pub fn release(&mut self) {
        self.outbound.clear();
        self.inbound.clear();
    }
}

fn is_backpressure_notice(e: &Envelope) -> bool {
    matches!(
        e.payload,
        Payload::Error {
            kind: ErrorKind::Backpressure,
            ..
        }
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn feedback(draft: &str, text: &str) -> FeedbackPayload {
        FeedbackPayload {
            draft_id: draft.into(),
            text: text.into(),
            attachments: vec![],
        }
    }

    fn ack(n: usize) -> Payload {
        Payload::FeedbackReceived {
            message: format!("ack {n}"),
        }
    }

    #[test]
    fn test_sequences_strictly_increase() {
        let mut ch = MessageChannel::new(16, 4);
        let a = ch.enqueue_outbound(Payload::agent_message("one"));
        let b = ch.enqueue_outbound(ack(1));
        let c = ch.enqueue_outbound(Payload::SessionComplete);
        assert_eq!((a.sequence, b.sequence, c.sequence), (1, 2, 3));
        assert_eq!(ch.last_outbound_sequence(), 3);
    }

    #[test]
    fn test_drain_replays_only_the_gap() {
        let mut ch = MessageChannel::new(16, 4);
        ch.enqueue_outbound(Payload::agent_message("summary"));
        ch.enqueue_outbound(ack(1));
        ch.enqueue_outbound(ack(2));

        let all: Vec<Sequence> = ch.drain_outbound(0).iter().map(|e| e.sequence).collect();
        assert_eq!(all, vec![1, 2, 3]);
        let gap: Vec<Sequence> = ch.drain_outbound(2).iter().map(|e| e.sequence).collect();
        assert_eq!(gap, vec![3]);
        assert!(ch.drain_outbound(3).is_empty());
        // Non-destructive.
        assert_eq!(ch.drain_outbound(0).len(), 3);
    }

    #[test]
    fn test_agent_message_is_single_slot() {
        let mut ch = MessageChannel::new(16, 4);
        ch.enqueue_outbound(Payload::agent_message("first"));
        ch.enqueue_outbound(ack(1));
        let latest = ch.enqueue_outbound(Payload::agent_message("second"));

        assert_eq!(latest.sequence, 3);
        assert_eq!(ch.latest_agent_message(), Some("second"));
        let kinds: Vec<EnvelopeType> = ch.drain_outbound(0).iter().map(Envelope::kind).collect();
        assert_eq!(
            kinds,
            vec![EnvelopeType::FeedbackReceived, EnvelopeType::AgentMessage]
        );
    }

    #[test]
    fn test_overflow_drops_oldest_and_records_backpressure() {
        let mut ch = MessageChannel::new(4, 4);
        ch.enqueue_outbound(Payload::agent_message("keep me"));
        ch.enqueue_outbound(ack(1)); // 2
        ch.enqueue_outbound(ack(2)); // 3
        ch.enqueue_outbound(ack(3)); // 4
        ch.enqueue_outbound(ack(4)); // overflow

        let retained = ch.drain_outbound(0);
        assert_eq!(retained.len(), 4);
        assert_eq!(ch.latest_agent_message(), Some("keep me"));
        assert!(retained.iter().any(is_backpressure_notice));
        assert_eq!(ch.dropped_outbound(), 2);

        // Still strictly increasing after eviction.
        let seqs: Vec<Sequence> = retained.iter().map(|e| e.sequence).collect();
        assert!(seqs.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(
            retained.last().unwrap().payload,
            ack(4),
            "newest envelope survives"
        );
    }

    #[test]
    fn test_overflow_evicts_stale_notice_first() {
        let mut ch = MessageChannel::new(4, 4);
        ch.enqueue_outbound(Payload::agent_message("summary"));
        ch.enqueue_outbound(ack(1));
        ch.enqueue_outbound(ack(2));
        ch.enqueue_outbound(ack(3)); // full
        ch.enqueue_outbound(ack(4)); // overflow: [summary, ack3, notice, ack4]
        ch.enqueue_outbound(ack(5)); // overflow again, old notice goes first

        let retained = ch.drain_outbound(0);
        assert_eq!(retained.len(), 4);
        assert_eq!(
            retained.iter().filter(|e| is_backpressure_notice(e)).count(),
            1
        );
        assert_eq!(retained.last().unwrap().payload, ack(5));
    }

    #[test]
    fn test_minimum_capacity_fits_ack_and_complete_after_overflow() {
        let mut ch = MessageChannel::new(1, 4);
        ch.enqueue_outbound(Payload::agent_message("summary"));
        ch.enqueue_outbound(Payload::error(ErrorKind::Internal, "one"));
        ch.enqueue_outbound(Payload::error(ErrorKind::Internal, "two"));
        ch.enqueue_outbound(Payload::error(ErrorKind::Internal, "three"));
        let acked = ch.enqueue_outbound(ack(1));
        let done = ch.enqueue_outbound(Payload::SessionComplete);

        let retained = ch.drain_outbound(0);
        let seqs: Vec<Sequence> = retained.iter().map(|e| e.sequence).collect();
        assert_eq!(ch.latest_agent_message(), Some("summary"));
        assert!(seqs.contains(&acked.sequence), "ack evicted: {seqs:?}");
        assert_eq!(retained.last().map(|e| e.sequence), Some(done.sequence));
    }

    #[test]
    fn test_trim_delivered_keeps_summary_and_undelivered() {
        let mut ch = MessageChannel::new(8, 4);
        ch.enqueue_outbound(Payload::agent_message("summary")); // 1
        ch.enqueue_outbound(ack(1)); // 2
        ch.enqueue_outbound(ack(2)); // 3
        ch.enqueue_outbound(ack(3)); // 4

        assert_eq!(ch.trim_delivered(3), 2);
        let seqs: Vec<Sequence> = ch.drain_outbound(0).iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![1, 4]);
        assert_eq!(ch.latest_agent_message(), Some("summary"));
        assert_eq!(ch.last_outbound_sequence(), 4);
    }

    #[test]
    fn test_caught_up_reader_never_overflows() {
        let mut ch = MessageChannel::new(4, 4);
        ch.enqueue_outbound(Payload::agent_message("summary"));
        for i in 0..100 {
            let env = ch.enqueue_outbound(ack(i));
            ch.trim_delivered(env.sequence);
        }
        assert_eq!(ch.dropped_outbound(), 0);
        assert!(!ch.drain_outbound(0).iter().any(is_backpressure_notice));
        assert_eq!(ch.outbound_len(), 1);
    }

    #[test]
    fn test_capacity_clamped() {
        let mut ch = MessageChannel::new(0, 0);
        for i in 0..10 {
            ch.enqueue_outbound(ack(i));
        }
        assert_eq!(ch.outbound_len(), MIN_OUTBOUND_CAPACITY);
    }

    #[test]
    fn test_inbound_dedupes_by_draft_id() {
        let mut ch = MessageChannel::new(8, 4);
        let first = ch.enqueue_inbound(feedback("d1", "looks good"));
        assert!(matches!(first, InboundOutcome::Accepted(ref e) if e.sequence == 1));
        assert_eq!(ch.enqueue_inbound(feedback("d1", "looks good")), InboundOutcome::Duplicate);
        assert_eq!(ch.inbound_len(), 1);
        assert!(ch.has_draft("d1"));

        let second = ch.enqueue_inbound(feedback("d2", "one more thing"));
        assert!(matches!(second, InboundOutcome::Accepted(ref e) if e.sequence == 2));
        assert_eq!(ch.pop_inbound().map(|e| e.sequence), Some(1));
        assert_eq!(ch.pop_inbound().map(|e| e.sequence), Some(2));
        assert!(ch.pop_inbound().is_none());
        assert_eq!(ch.inbound_len(), 0);
    }

    #[test]
    fn test_inbound_overflow_keeps_newest() {
        let mut ch = MessageChannel::new(8, 2);
        ch.enqueue_inbound(feedback("a", "1"));
        ch.enqueue_inbound(feedback("b", "2"));
        ch.enqueue_inbound(feedback("c", "3"));
        let seqs: Vec<Sequence> = std::iter::from_fn(|| ch.pop_inbound())
            .map(|e| e.sequence)
            .collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[test]
    fn test_release_keeps_counters() {
        let mut ch = MessageChannel::new(8, 2);
        ch.enqueue_outbound(Payload::agent_message("x"));
        ch.enqueue_inbound(feedback("a", "1"));
        ch.release();
        assert_eq!(ch.outbound_len(), 0);
        assert_eq!(ch.inbound_len(), 0);
        assert_eq!(ch.last_outbound_sequence(), 1);
        assert!(ch.has_draft("a"));
    }
}
