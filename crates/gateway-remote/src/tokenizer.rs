use gateway_core::tokenizer::Tokenizer;
use tiktoken_rs::CoreBPE;

/// Encodes with the `cl100k_base` vocabulary, the encoding shared by every
/// chat-completion model this gateway targets.
pub struct TiktokenTokenizer {
    bpe: CoreBPE,
}

impl TiktokenTokenizer {
    pub fn cl100k_base() -> Self {
        Self {
            bpe: tiktoken_rs::cl100k_base().expect("bundled cl100k_base ranks"),
        }
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.bpe.encode_with_special_tokens(text)
    }
}
