use rml_amf0::{Amf0DeserializationError, Amf0SerializationError};
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageDecodeError {
    #[error("Invalid {0} field in message")]
    InvalidFormat(String),

    #[error("Deserialize amf0 failed: {0}")]
    Amf0Deserialize(#[from] Amf0DeserializationError),

    #[error("An IO error occurred: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum MessageEncodeError {
    #[error("Serialize amf0 failed: {0}")]
    Amf0Serialize(#[from] Amf0SerializationError),

    #[error("An IO error occurred: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum MetadataReformError {
    #[error("Deserialize amf0 failed: {0}")]
    Amf0Deserialize(#[from] Amf0DeserializationError),

    #[error("Serialize amf0 failed: {0}")]
    Amf0Serialize(#[from] Amf0SerializationError),
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Parse tcUrl failed: {0}")]
    ParseUrl(#[from] url::ParseError),

    #[error("App not found in tcUrl")]
    NotfoundApp,
}
