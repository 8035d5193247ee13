use thiserror::Error;

pub type ExtractResult<T> = Result<T, ExtractError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// The annotation does not satisfy `start <= end <= len(text)`.
    #[error("span {start}..{end} for {entity_type} is out of range for text of {text_len} chars")]
    OutOfRangeSpan {
        entity_type: String,
        start: usize,
        end: usize,
        text_len: usize,
    },

    #[error("extraction worker failed: {0}")]
    WorkerFailed(String),
}
