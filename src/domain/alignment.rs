// ============================================================
// Layer 3 - Subtoken / Token Alignment
// ============================================================
// The encoder works on subtokens (word pieces); the rest of the
// pipeline works on word-level tokens. An AlignmentMap records,
// for one document, which flattened subtoken rows belong to
// which token.
//
// The mapping is many-subtokens-to-one-token: a word split into
// three pieces contributes three rows to the same token. Rows
// that belong to no token (padding positions) simply do not
// appear in the map.
//
// Example — "playing chess", where "playing" splits into
// "play" + "##ing":
//
//   row 0 ("play")  → token 0
//   row 1 ("##ing") → token 0
//   row 2 ("chess") → token 1
//
// Pooling forward sums rows 0+1 into token 0's vector; the
// backward pass copies token 0's gradient to both rows.

/// Bidirectional position map between flattened subtoken rows
/// and token indices for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignmentMap {
    /// (subtoken row, token index) pairs, in row order
    pairs: Vec<(usize, usize)>,
    /// Number of flattened subtoken rows (spans * span_len)
    n_rows: usize,
    /// Number of word-level tokens in the document
    n_tokens: usize,
}

impl AlignmentMap {
    pub fn new(n_rows: usize, n_tokens: usize) -> Self {
        Self { pairs: Vec::new(), n_rows, n_tokens }
    }

    /// Record that subtoken row `row` belongs to token `token`.
    pub fn push(&mut self, row: usize, token: usize) {
        debug_assert!(row < self.n_rows && token < self.n_tokens);
        self.pairs.push((row, token));
    }

    pub fn pairs(&self) -> &[(usize, usize)] {
        &self.pairs
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_tokens(&self) -> usize {
        self.n_tokens
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Aligned subtoken rows, in pair order (gather indices).
    pub fn rows(&self) -> Vec<i32> {
        self.pairs.iter().map(|&(r, _)| r as i32).collect()
    }

    /// Token index for each aligned row, in pair order
    /// (scatter indices, parallel to `rows()`).
    pub fn tokens(&self) -> Vec<i32> {
        self.pairs.iter().map(|&(_, t)| t as i32).collect()
    }

    /// Token index → all subtoken rows aligned to it.
    pub fn tok2trf(&self) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new(); self.n_tokens];
        for &(row, token) in &self.pairs {
            out[token].push(row);
        }
        out
    }

    /// Subtoken row → all token indices it is aligned to.
    /// With overlapping spans a row can serve several tokens.
    pub fn trf2tok(&self) -> Vec<Vec<usize>> {
        let mut out = vec![Vec::new(); self.n_rows];
        for &(row, token) in &self.pairs {
            out[row].push(token);
        }
        out
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn two_to_one() -> AlignmentMap {
        // rows 0,1 → token 0; row 2 → token 1
        let mut a = AlignmentMap::new(3, 2);
        a.push(0, 0);
        a.push(1, 0);
        a.push(2, 1);
        a
    }

    #[test]
    fn test_tok2trf_groups_rows_per_token() {
        let a = two_to_one();
        assert_eq!(a.tok2trf(), vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn test_trf2tok_inverts_the_mapping() {
        let a = two_to_one();
        assert_eq!(a.trf2tok(), vec![vec![0], vec![0], vec![1]]);
    }

    #[test]
    fn test_index_vectors_are_parallel() {
        let a = two_to_one();
        assert_eq!(a.rows(), vec![0, 1, 2]);
        assert_eq!(a.tokens(), vec![0, 0, 1]);
    }

    #[test]
    fn test_unaligned_rows_are_absent() {
        // 4 rows but only row 0 aligned; row 3 is padding
        let mut a = AlignmentMap::new(4, 1);
        a.push(0, 0);
        assert_eq!(a.trf2tok()[3], Vec::<usize>::new());
        assert_eq!(a.pairs().len(), 1);
    }
}
