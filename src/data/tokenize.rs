// ============================================================
// Layer 4 - Subword Tokenizer Wrapper
// ============================================================
// Thin wrapper over a `tokenizers::Tokenizer` that turns a batch
// of Documents into subtoken ids plus the word alignment the
// pooling engine needs. Only the alignment output is consumed
// here; vocabulary building and persistence live in the
// tokenizer store (Layer 6).
//
// The tokenizer is configured with a whitespace-split
// pre-tokenizer, so the word index reported for each subtoken
// lines up 1:1 with our whitespace-split Document tokens.

use tokenizers::Tokenizer;

use crate::domain::document::Document;
use crate::domain::error::BridgeError;

/// Fixed id of the [PAD] token in the stored vocabulary.
pub const PAD_ID: u32 = 0;

/// Subtoken ids and word alignment for one document.
#[derive(Debug, Clone)]
pub struct DocEncoding {
    /// Subtoken ids, in order
    pub ids: Vec<u32>,
    /// For each subtoken, the word-level token it came from.
    /// None for subtokens that belong to no word.
    pub word_ids: Vec<Option<usize>>,
}

impl DocEncoding {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

pub struct SubwordTokenizer {
    inner: Tokenizer,
}

impl SubwordTokenizer {
    pub fn new(inner: Tokenizer) -> Self {
        Self { inner }
    }

    pub fn pad_id(&self) -> u32 {
        PAD_ID
    }

    /// Encode a batch of documents.
    ///
    /// Fails with an alignment error if the tokenizer reports a
    /// word index outside the document's token range, which would
    /// mean its pre-tokenisation disagrees with ours.
    pub fn encode_docs(&self, docs: &[Document]) -> Result<Vec<DocEncoding>, BridgeError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = docs.iter().map(|d| d.text()).collect();
        let encodings = self
            .inner
            .encode_batch(texts, false)
            .map_err(|e| BridgeError::Tokenizer(e.to_string()))?;

        let mut out = Vec::with_capacity(docs.len());
        for (doc, enc) in docs.iter().zip(encodings) {
            let word_ids: Vec<Option<usize>> = enc
                .get_word_ids()
                .iter()
                .map(|w| w.map(|x| x as usize))
                .collect();

            if let Some(max_word) = word_ids.iter().flatten().max() {
                if *max_word >= doc.tokens.len() {
                    return Err(BridgeError::Alignment(format!(
                        "tokenizer aligned subtokens to word {} but '{}' has only {} tokens",
                        max_word,
                        doc.source,
                        doc.tokens.len()
                    )));
                }
            }

            out.push(DocEncoding { ids: enc.get_ids().to_vec(), word_ids });
        }
        Ok(out)
    }
}

// ─── Test Fixture ─────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokenizers::models::wordpiece::WordPiece;
    use tokenizers::pre_tokenizers::whitespace::WhitespaceSplit;
    use tokenizers::pre_tokenizers::PreTokenizerWrapper;

    /// In-memory WordPiece tokenizer over a tiny fixed vocabulary.
    /// "playing" splits into play + ##ing, everything else is one
    /// piece or [UNK].
    pub fn word_piece_fixture() -> SubwordTokenizer {
        let mut vocab = std::collections::HashMap::new();
        let words = ["[PAD]", "[UNK]", "play", "##ing", "chess", "go", "a", "b", "c"];
        for (i, w) in words.iter().enumerate() {
            vocab.insert(w.to_string(), i as u32);
        }
        let wp = WordPiece::builder()
            .vocab(vocab)
            .unk_token("[UNK]".into())
            .build()
            .unwrap();
        let mut tok = tokenizers::Tokenizer::new(wp);
        tok.with_pre_tokenizer(PreTokenizerWrapper::WhitespaceSplit(WhitespaceSplit));
        SubwordTokenizer::new(tok)
    }
}
