//! # Stage: Message Ingestion
//!
//! ## Responsibility
//! Take candidate batches from any transport, drop everything already shown,
//! order what is left by id, and hand back exactly one [`RenderInstruction`]
//! per new message. Locally authored messages go through
//! [`IngestionPipeline::record_local`] so their later echo is suppressed.
//!
//! ## Guarantees
//! - A record is accepted iff its id is strictly greater than the high-water mark
//! - Accepted records are emitted in ascending id order, whatever the arrival order
//! - The high-water mark never decreases, under any interleaving of calls
//! - No id is ever emitted twice, including duplicates inside one batch
//! - Non-panicking: `ingest` never fails; a missing timestamp becomes "now"
//!
//! ## NOT Responsible For
//! - Fetching, parsing or retrying (transports do that)
//! - Painting or scrolling (the renderer does that)
//! - Comparing ids from different transports (each transport has its own id type)

use crate::message::{now_ms, MessageRecord};

/// One message to paint, plus whether it belongs to the local user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderInstruction<I> {
    pub record: MessageRecord<I>,
    pub is_own: bool,
}

/// Lifecycle of a pipeline. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Nothing accepted yet; the high-water mark is still the sentinel.
    Uninitialized,
    /// At least one message has been accepted or recorded locally.
    Active,
}

/// Per-session deduplication and ordering state.
#[derive(Debug, Clone)]
pub struct IngestionPipeline<I> {
    /// Greatest id already rendered. `None` sorts below every id.
    high_water_mark: Option<I>,
    rendered_count: u64,
}

impl<I> Default for IngestionPipeline<I> {
    fn default() -> Self {
        IngestionPipeline {
            high_water_mark: None,
            rendered_count: 0,
        }
    }
}

impl<I: Ord + Clone> IngestionPipeline<I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn high_water_mark(&self) -> Option<&I> {
        self.high_water_mark.as_ref()
    }

    pub fn rendered_count(&self) -> u64 {
        self.rendered_count
    }

    pub fn state(&self) -> PipelineState {
        match self.high_water_mark {
            None => PipelineState::Uninitialized,
            Some(_) => PipelineState::Active,
        }
    }

    /// Ingest a batch using the wall clock for missing timestamps.
    pub fn ingest(
        &mut self,
        batch: Vec<MessageRecord<I>>,
        current_user: &str,
    ) -> Vec<RenderInstruction<I>> {
        self.ingest_at(batch, current_user, now_ms())
    }

    /// Ingest a batch. `now_ms` stamps records that arrive without a
    /// timestamp; pass it explicitly so callers (and tests) control the clock.
    pub fn ingest_at(
        &mut self,
        batch: Vec<MessageRecord<I>>,
        current_user: &str,
        now_ms: u64,
    ) -> Vec<RenderInstruction<I>> {
        let mut fresh: Vec<MessageRecord<I>> = batch
            .into_iter()
            .filter(|rec| self.is_new(&rec.id))
            .collect();

        // Stable sort, so the first arrival of a duplicated id is the one kept.
        fresh.sort_by(|a, b| a.id.cmp(&b.id));
        fresh.dedup_by(|later, earlier| later.id == earlier.id);

        let mut out = Vec::with_capacity(fresh.len());
        for mut record in fresh {
            record.timestamp_ms.get_or_insert(now_ms);
            let is_own = record.sender == current_user;
            out.push(RenderInstruction { record, is_own });
        }

        if let Some(last) = out.last() {
            // `out` is ascending and every entry beat the old mark.
            self.high_water_mark = Some(last.record.id.clone());
            self.rendered_count += out.len() as u64;
        }
        out
    }

    /// Render a locally authored message immediately.
    ///
    /// Always emits, always `is_own`. Raises the mark to the record's id when
    /// it is higher, so the transport echoing the same id renders nothing.
    pub fn record_local(&mut self, mut record: MessageRecord<I>) -> RenderInstruction<I> {
        record.timestamp_ms.get_or_insert_with(now_ms);
        if self.is_new(&record.id) {
            self.high_water_mark = Some(record.id.clone());
        }
        self.rendered_count += 1;
        RenderInstruction { record, is_own: true }
    }

    fn is_new(&self, id: &I) -> bool {
        match &self.high_water_mark {
            None => true,
            Some(mark) => id > mark,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: u64, sender: &str) -> MessageRecord<u64> {
        MessageRecord::text(id, sender, format!("msg {id}"))
    }

    fn ids(out: &[RenderInstruction<u64>]) -> Vec<u64> {
        out.iter().map(|r| r.record.id).collect()
    }

    #[test]
    fn test_new_pipeline_is_uninitialized() {
        let p: IngestionPipeline<u64> = IngestionPipeline::new();
        assert_eq!(p.state(), PipelineState::Uninitialized);
        assert!(p.high_water_mark().is_none());
        assert_eq!(p.rendered_count(), 0);
    }

    #[test]
    fn test_empty_batch_keeps_sentinel() {
        let mut p: IngestionPipeline<u64> = IngestionPipeline::new();
        assert!(p.ingest(Vec::new(), "alice").is_empty());
        assert_eq!(p.state(), PipelineState::Uninitialized);
    }

    #[test]
    fn test_sentinel_accepts_id_zero() {
        let mut p = IngestionPipeline::new();
        let out = p.ingest(vec![rec(0, "bob")], "alice");
        assert_eq!(ids(&out), vec![0]);
        assert_eq!(p.high_water_mark(), Some(&0));
        assert_eq!(p.state(), PipelineState::Active);
    }

    #[test]
    fn test_out_of_order_batch_is_sorted() {
        let mut p = IngestionPipeline::new();
        let out = p.ingest(vec![rec(5, "a"), rec(2, "a"), rec(8, "a")], "alice");
        assert_eq!(ids(&out), vec![2, 5, 8]);
        assert_eq!(p.high_water_mark(), Some(&8));
    }

    #[test]
    fn test_duplicate_ids_in_one_batch_emit_once() {
        let mut p = IngestionPipeline::new();
        let first = MessageRecord::text(4u64, "bob", "first");
        let second = MessageRecord::text(4u64, "bob", "second");
        let out = p.ingest(vec![first, rec(3, "bob"), second], "alice");
        assert_eq!(ids(&out), vec![3, 4]);
        assert_eq!(out[1].record.payload, crate::message::Payload::text("first"));
        assert_eq!(p.rendered_count(), 2);
    }

    #[test]
    fn test_partial_overlap_only_emits_new() {
        let mut p = IngestionPipeline::new();
        p.ingest(vec![rec(1, "a"), rec(2, "a"), rec(3, "a")], "alice");
        let out = p.ingest(vec![rec(2, "a"), rec(3, "a"), rec(4, "a"), rec(5, "a")], "alice");
        assert_eq!(ids(&out), vec![4, 5]);
        assert_eq!(p.rendered_count(), 5);
    }

    #[test]
    fn test_missing_timestamp_stamped_with_clock() {
        let mut p = IngestionPipeline::new();
        let out = p.ingest_at(vec![rec(1, "a"), rec(2, "a").with_timestamp(42)], "alice", 1_000);
        assert_eq!(out[0].record.timestamp_ms, Some(1_000));
        assert_eq!(out[1].record.timestamp_ms, Some(42));
    }

    #[test]
    fn test_ownership_checked_at_ingestion_time() {
        let mut p = IngestionPipeline::new();
        let out = p.ingest(vec![rec(1, "alice")], "alice");
        assert!(out[0].is_own);
        // After a rename, a message still carrying the old name is someone else's.
        let out = p.ingest(vec![rec(2, "alice")], "alicia");
        assert!(!out[0].is_own);
    }

    #[test]
    fn test_record_local_is_always_own() {
        let mut p = IngestionPipeline::new();
        let instr = p.record_local(rec(10, "somebody-else"));
        assert!(instr.is_own);
        assert_eq!(p.high_water_mark(), Some(&10));
        assert_eq!(p.rendered_count(), 1);
    }

    #[test]
    fn test_record_local_below_mark_keeps_mark() {
        let mut p = IngestionPipeline::new();
        p.ingest(vec![rec(50, "bob")], "alice");
        let instr = p.record_local(rec(20, "alice"));
        assert!(instr.is_own);
        assert_eq!(p.high_water_mark(), Some(&50));
        assert_eq!(p.rendered_count(), 2);
    }

    #[test]
    fn test_record_local_fills_timestamp() {
        let mut p = IngestionPipeline::new();
        let instr = p.record_local(rec(1, "alice"));
        assert!(instr.record.timestamp_ms.is_some());
    }

    #[test]
    fn test_tuple_ids_order_lexicographically() {
        let mut p = IngestionPipeline::new();
        let batch = vec![
            MessageRecord::text((5u64, 1u32), "a", "x"),
            MessageRecord::text((5u64, 0u32), "a", "y"),
            MessageRecord::text((4u64, 9u32), "a", "z"),
        ];
        let out = p.ingest(batch, "alice");
        let got: Vec<_> = out.iter().map(|r| r.record.id).collect();
        assert_eq!(got, vec![(4, 9), (5, 0), (5, 1)]);
    }
}
