use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Stream has been published")]
    DuplicatePublish,

    #[error("There was no publish")]
    NoPublish,

    #[error("The session had been closed")]
    SessionClosed,
}
