use thiserror::Error;

/// Top-level failures. Per-item problems (one URL, one document, one record)
/// are carried as data inside results and counters, never as errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No URLs configured: add at least one entry under 'urls'")]
    NoUrls,

    #[error("No data: {0}")]
    NoData(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
