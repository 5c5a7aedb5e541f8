use gateway_core::tokenizer::Tokenizer;
use tokenizers::Tokenizer as HfTokenizerInner;

/// Wraps a HuggingFace `tokenizers` model for locally hosted backends.
pub struct HfTokenizer {
    inner: HfTokenizerInner,
}

impl HfTokenizer {
    pub fn from_file(path: &str) -> Result<Self, gateway_core::GatewayError> {
        let inner = HfTokenizerInner::from_file(path)
            .map_err(|e| gateway_core::GatewayError::InvalidState(format!("failed to load tokenizer: {}", e)))?;
        Ok(Self { inner })
    }
}

impl Tokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Vec<u32> {
        self.inner
            .encode(text, false)
            .map(|enc| enc.get_ids().to_vec())
            .unwrap_or_default()
    }
}
