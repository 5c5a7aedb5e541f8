/// Uniform tokenizer surface over whatever family backs a given model.
///
/// Concrete adapters live next to the backend that needs them:
/// `gateway-remote::TiktokenTokenizer` for remote chat models,
/// `gateway-local::HfTokenizer` for locally hosted ones.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Vec<u32>;

    fn count(&self, text: &str) -> i32 {
        self.encode(text).len() as i32
    }
}
