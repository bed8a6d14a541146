// ============================================================
// Layer 6 - Tokenizer Store
// ============================================================
// Builds and persists the WordPiece tokenizer.
//
// In tokenizers 0.15, train_from_files requires Trainer::Model
// to equal ModelWrapper, which makes the built-in trainer
// awkward to drive programmatically. We sidestep it: build the
// vocabulary ourselves, write tokenizer JSON in the HuggingFace
// format, and load it back with Tokenizer::from_file.
//
// The pre-tokenizer must stay WhitespaceSplit: the word index
// the tokenizer reports per subtoken is an index into the
// whitespace-split words, which is exactly how Documents split
// their tokens. Any pre-tokenizer that also splits punctuation
// would shift the word ids off our token positions.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tokenizers::Tokenizer;

use crate::data::tokenize::SubwordTokenizer;
use crate::domain::document::Document;

pub struct TokenizerStore {
    dir: PathBuf,
}

impl TokenizerStore {
    pub fn new(dir: impl Into<String>) -> Self {
        Self { dir: PathBuf::from(dir.into()) }
    }

    /// Load the stored tokenizer, or build one from the corpus
    /// if none exists yet.
    pub fn load_or_build(
        &self,
        docs:       &[Document],
        vocab_size: usize,
    ) -> Result<SubwordTokenizer> {
        let tok_path = self.dir.join("tokenizer.json");
        if tok_path.exists() {
            tracing::info!("Loading existing tokenizer from disk");
            self.load()
        } else {
            tracing::info!("Building new tokenizer (vocab_size={})", vocab_size);
            self.build_and_save(docs, vocab_size)
        }
    }

    /// Load a previously saved tokenizer from JSON file
    pub fn load(&self) -> Result<SubwordTokenizer> {
        let path = self.dir.join("tokenizer.json");
        let tok = Tokenizer::from_file(&path)
            .map_err(|e| anyhow::anyhow!(
                "Cannot load tokenizer from '{}': {}", path.display(), e
            ))?;
        Ok(SubwordTokenizer::new(tok))
    }

    /// Build a WordPiece vocabulary from the corpus and write it
    /// as tokenizer JSON.
    ///
    /// Vocabulary layout (BERT id convention for the specials):
    ///   0..103   — [PAD] [UNK] specials
    ///   then every corpus character, both word-initial and as a
    ///   ##-continuation piece, so any word can be spelled out
    ///   then whole words by descending frequency up to
    ///   vocab_size. Frequent words encode as one piece, rare
    ///   words fall back to character pieces.
    fn build_and_save(&self, docs: &[Document], vocab_size: usize) -> Result<SubwordTokenizer> {
        std::fs::create_dir_all(&self.dir).ok();

        // ── Step 1: Word and character frequencies ────────────────────────────
        let mut word_freq: HashMap<String, usize> = HashMap::new();
        let mut chars: Vec<char> = Vec::new();
        for doc in docs {
            for token in &doc.tokens {
                let w = token.text.to_lowercase();
                *word_freq.entry(w.clone()).or_insert(0) += 1;
                for c in w.chars() {
                    if !chars.contains(&c) {
                        chars.push(c);
                    }
                }
            }
        }
        chars.sort_unstable();

        // ── Step 2: Assemble the vocabulary ───────────────────────────────────
        let mut vocab = serde_json::Map::new();
        vocab.insert("[PAD]".into(), serde_json::json!(0));
        vocab.insert("[UNK]".into(), serde_json::json!(1));
        vocab.insert("[CLS]".into(), serde_json::json!(101));
        vocab.insert("[SEP]".into(), serde_json::json!(102));
        vocab.insert("[MASK]".into(), serde_json::json!(103));

        fn insert(
            vocab:   &mut serde_json::Map<String, serde_json::Value>,
            next_id: &mut usize,
            piece:   String,
        ) {
            if !vocab.contains_key(&piece) {
                vocab.insert(piece, serde_json::json!(*next_id));
                *next_id += 1;
            }
        }

        let mut next_id = 104usize;
        for &c in &chars {
            insert(&mut vocab, &mut next_id, c.to_string());
            insert(&mut vocab, &mut next_id, format!("##{c}"));
        }

        let mut words: Vec<(String, usize)> = word_freq.into_iter().collect();
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        for (word, _) in words {
            if next_id >= vocab_size {
                break;
            }
            insert(&mut vocab, &mut next_id, word);
        }

        // ── Step 3: Write tokenizer JSON in HuggingFace format ────────────────
        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [
                {"id": 0,   "content": "[PAD]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 1,   "content": "[UNK]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 101, "content": "[CLS]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 102, "content": "[SEP]",  "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true},
                {"id": 103, "content": "[MASK]", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}
            ],
            "normalizer": {
                "type": "Lowercase"
            },
            "pre_tokenizer": {
                "type": "WhitespaceSplit"
            },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordPiece",
                "unk_token": "[UNK]",
                "continuing_subword_prefix": "##",
                "max_input_chars_per_word": 100,
                "vocab": vocab
            }
        });

        let tok_path = self.dir.join("tokenizer.json");
        std::fs::write(
            &tok_path,
            serde_json::to_string_pretty(&tokenizer_json)?
        ).with_context(|| "Cannot write tokenizer JSON")?;

        tracing::info!(
            "Tokenizer built with {} pieces, saved to '{}'",
            next_id,
            tok_path.display()
        );

        self.load()
    }
}
