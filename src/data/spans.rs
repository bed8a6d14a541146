// ============================================================
// Layer 4 - Span Splitter
// ============================================================
// The encoder has a maximum input length, but documents do not.
// A SpanSplitter cuts one document's subtoken sequence into
// sliding windows of at most `window` positions, advancing by
// `stride` each time.
//
// Example with window=5, stride=3 over 10 subtokens:
//   Span 1: [0..5)
//   Span 2: [3..8)    (overlaps by 2)
//   Span 3: [6..10)   (last span, shorter)
//
// With stride == window the spans tile the document without
// overlap. Overlapping rows are legal: pooling sums every row
// aligned to a token, and the backward pass copies the token
// gradient to every contributing row, so the adjoint pair stays
// exact either way.

use std::ops::Range;

pub struct SpanSplitter {
    /// Maximum subtokens per span
    window: usize,
    /// Subtokens advanced between span starts
    stride: usize,
}

impl SpanSplitter {
    /// # Panics
    /// Panics if `stride` is zero or greater than `window`;
    /// a zero stride would loop forever.
    pub fn new(window: usize, stride: usize) -> Self {
        assert!(
            stride >= 1 && stride <= window,
            "stride ({}) must be in 1..={}",
            stride,
            window
        );
        Self { window, stride }
    }

    /// Split a sequence of `len` subtokens into span ranges.
    /// An empty sequence yields no spans.
    pub fn split(&self, len: usize) -> Vec<Range<usize>> {
        if len == 0 {
            return Vec::new();
        }
        let mut spans = Vec::new();
        let mut start = 0usize;
        loop {
            let end = (start + self.window).min(len);
            spans.push(start..end);
            if end == len {
                break;
            }
            start += self.stride;
        }
        spans
    }
}
