use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("server url must start with http:// or https://: {url}")]
    UnsupportedScheme { url: String },
}
