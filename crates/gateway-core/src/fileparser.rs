use async_trait::async_trait;

use crate::error::GatewayError;

/// Turns an uploaded file's raw bytes into text suitable for embedding.
/// Real parsing (PDF, DOCX, etc.) is out of scope; this trait only names
/// the seam the `/embed` command and file-upload frames call through.
#[async_trait]
pub trait FileParser: Send + Sync {
    async fn parse(&self, filename: &str, bytes: Vec<u8>) -> Result<String, GatewayError>;
}

/// Lossily decodes the upload as UTF-8. Good enough for plain-text and
/// markdown uploads in development; anything else is a caller-supplied
/// `FileParser`.
pub struct PlainTextFileParser;

#[async_trait]
impl FileParser for PlainTextFileParser {
    async fn parse(&self, _filename: &str, bytes: Vec<u8>) -> Result<String, GatewayError> {
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
