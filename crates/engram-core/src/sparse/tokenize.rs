//! Tokenization for the sparse index.
//!
//! Tokenization is pluggable behind the [`Tokenizer`] trait. The default
//! tokenizer lowercases, splits on non-alphanumeric runs, and falls back to
//! character bigrams for CJK runs so Chinese/Japanese content stays
//! searchable without a segmenter. Compiling the `word-segmentation` feature
//! swaps in jieba for proper CJK word boundaries.

// ============================================================================
// TOKENIZER TRAIT
// ============================================================================

/// Splits text into index terms.
pub trait Tokenizer: Send + Sync {
    /// Tokenize one text.
    fn tokenize(&self, text: &str) -> Vec<String>;
}

/// Whether a char belongs to the CJK unified ideograph ranges (plus kana).
fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{3040}'..='\u{30FF}'
    )
}

// ============================================================================
// SIMPLE TOKENIZER
// ============================================================================

/// Lowercasing word splitter with CJK bigram fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleTokenizer;

impl SimpleTokenizer {
    /// Emit bigrams for a CJK run; a single char stands alone.
    fn push_cjk_run(run: &[char], out: &mut Vec<String>) {
        match run.len() {
            0 => {}
            1 => out.push(run[0].to_string()),
            n => {
                for w in 0..n - 1 {
                    out.push(run[w..w + 2].iter().collect());
                }
            }
        }
    }
}

impl Tokenizer for SimpleTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut word = String::new();
        let mut cjk_run: Vec<char> = Vec::new();

        let mut flush_word = |word: &mut String, tokens: &mut Vec<String>| {
            if !word.is_empty() {
                tokens.push(std::mem::take(word));
            }
        };

        for c in text.chars() {
            if is_cjk(c) {
                flush_word(&mut word, &mut tokens);
                cjk_run.push(c);
            } else {
                Self::push_cjk_run(&cjk_run, &mut tokens);
                cjk_run.clear();
                if c.is_alphanumeric() {
                    word.extend(c.to_lowercase());
                } else {
                    flush_word(&mut word, &mut tokens);
                }
            }
        }
        flush_word(&mut word, &mut tokens);
        Self::push_cjk_run(&cjk_run, &mut tokens);

        tokens
    }
}

// ============================================================================
// JIEBA TOKENIZER (feature-gated)
// ============================================================================

/// CJK word segmentation backed by jieba.
#[cfg(feature = "word-segmentation")]
pub struct JiebaTokenizer {
    jieba: jieba_rs::Jieba,
}

#[cfg(feature = "word-segmentation")]
impl JiebaTokenizer {
    /// Create a tokenizer with the bundled dictionary.
    pub fn new() -> Self {
        Self {
            jieba: jieba_rs::Jieba::new(),
        }
    }
}

#[cfg(feature = "word-segmentation")]
impl Default for JiebaTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "word-segmentation")]
impl Tokenizer for JiebaTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        self.jieba
            .cut_for_search(text, true)
            .into_iter()
            .map(|w| w.to_lowercase())
            .filter(|w| w.chars().any(|c| c.is_alphanumeric() || is_cjk(c)))
            .collect()
    }
}

/// Build the tokenizer selected by config. Requesting segmentation without
/// the `word-segmentation` feature falls back to the simple tokenizer with a
/// warning.
pub fn build_tokenizer(use_word_segmentation: bool) -> Box<dyn Tokenizer> {
    #[cfg(feature = "word-segmentation")]
    if use_word_segmentation {
        return Box::new(JiebaTokenizer::new());
    }
    #[cfg(not(feature = "word-segmentation"))]
    if use_word_segmentation {
        tracing::warn!(
            "use_word_segmentation is set but the word-segmentation feature is not compiled in"
        );
    }
    Box::new(SimpleTokenizer)
}

// ============================================================================
// TESTS
// ============================================================================
