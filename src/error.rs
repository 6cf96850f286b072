use thiserror::Error;

/// Failure reported by a remote service call, before any workflow context is attached.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("conflicting state: {0}")]
    Conflict(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("could not decode response: {0}")]
    Decode(String),
}

/// Errors surfaced by the ingestion, export and sorting workflows.
///
/// Every remote-facing variant carries the asset (or external) identifier that was
/// being processed so the operator can find it on the service side.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("upload of {external_id} failed: {reason}")]
    Upload { external_id: String, reason: String },

    #[error("asset {asset_id} not accepted after {attempts} status checks")]
    PollTimeout { asset_id: String, attempts: u32 },

    #[error("asset {asset_id} was rejected by the service")]
    AssetRejected { asset_id: String },

    #[error("ground truth update for asset {asset_id} conflicted: {reason}")]
    Conflict { asset_id: String, reason: String },

    #[error("malformed annotation on asset {asset_id}: {reason}")]
    MalformedAnnotation { asset_id: String, reason: String },

    #[error("remote service unavailable while processing {context}: {source}")]
    RemoteUnavailable {
        context: String,
        #[source]
        source: RemoteError,
    },

    #[error("annotation ids exhausted: {count} more ids after {next_id} do not fit in 64 bits")]
    AnnotationIdOverflow { next_id: u64, count: usize },

    #[error("asset descriptor has no identifier ({context})")]
    MissingIdentifier { context: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl IngestError {
    pub(crate) fn remote(context: impl Into<String>, source: RemoteError) -> Self {
        IngestError::RemoteUnavailable {
            context: context.into(),
            source,
        }
    }
}
