// ============================================================
// Layer 4 - Length Batcher
// ============================================================
// Groups variable-length spans into encoder sub-batches bounded
// by a total-work budget, then stacks one sub-batch of subtoken
// ids into GPU-ready Int tensors.
//
// The work of a batch is `max_sequence_length * batch_size`,
// which tracks what a padded transformer forward actually costs.
//
// Packing algorithm:
//   1. Sort indices by length ascending
//   2. Greedily add to the current batch while
//        length * (batch_size + 1) <= max_work
//   3. Otherwise close the batch and start a new one
//   4. Sort each batch by original index, then reverse batch
//      order so the longest batches run first (peak memory is
//      hit on the first sub-batch, not midway through a step)
//
// A single span longer than the whole budget is never dropped or
// truncated: it always lands alone in its own batch.

use burn::prelude::*;

// ─── batch_by_length ──────────────────────────────────────────────────────────
/// Group `lengths` into batches of indices under `max_work`.
///
/// Postconditions: every input index appears in exactly one
/// batch; each batch is internally sorted ascending; batches are
/// ordered longest-first.
pub fn batch_by_length(lengths: &[usize], max_work: usize) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..lengths.len()).collect();
    order.sort_by_key(|&i| (lengths[i], i));

    let mut batches: Vec<Vec<usize>> = Vec::new();
    let mut batch: Vec<usize> = Vec::new();
    for &i in &order {
        if batch.is_empty() {
            batch.push(i);
        } else if lengths[i] * (batch.len() + 1) <= max_work {
            batch.push(i);
        } else {
            batches.push(std::mem::take(&mut batch));
            batch.push(i);
        }
    }
    if !batch.is_empty() {
        batches.push(batch);
    }

    for b in &mut batches {
        b.sort_unstable();
    }
    batches.reverse();
    batches
}

// ─── EncoderInput ─────────────────────────────────────────────────────────────
/// One padded sub-batch ready for the encoder forward pass.
/// Both tensors have shape [n_spans, span_len].
#[derive(Debug, Clone)]
pub struct EncoderInput<B: Backend> {
    /// Subtoken id sequences, padded with `pad_id`
    pub input_ids: Tensor<B, 2, Int>,

    /// true at padded positions (masked out of attention)
    pub pad_mask: Tensor<B, 2, Bool>,
}

/// Stack span id sequences into one padded sub-batch.
///
/// All rows are padded to `span_len`, the longest span length of
/// the whole batch, so every encoder call in one step produces
/// tensors of identical width and per-doc outputs concatenate
/// cleanly.
pub fn pad_spans<B: Backend>(
    rows: &[Vec<u32>],
    span_len: usize,
    pad_id: u32,
    device: &B::Device,
) -> EncoderInput<B> {
    let n = rows.len();

    // Flatten ids and mask into one long Vec each, then reshape
    // to [n, span_len].
    let mut ids_flat: Vec<i32> = Vec::with_capacity(n * span_len);
    let mut mask_flat: Vec<i32> = Vec::with_capacity(n * span_len);
    for row in rows {
        debug_assert!(row.len() <= span_len);
        for &id in row {
            ids_flat.push(id as i32);
            mask_flat.push(1);
        }
        for _ in row.len()..span_len {
            ids_flat.push(pad_id as i32);
            mask_flat.push(0);
        }
    }

    let input_ids = Tensor::<B, 1, Int>::from_ints(ids_flat.as_slice(), device)
        .reshape([n, span_len]);
    let mask = Tensor::<B, 1, Int>::from_ints(mask_flat.as_slice(), device)
        .reshape([n, span_len]);

    EncoderInput { input_ids, pad_mask: mask.equal_elem(0) }
}
