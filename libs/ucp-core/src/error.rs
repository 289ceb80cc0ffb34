use serde::Serialize;

// `ErrorDetails` also needs `Deserialize` so it can round-trip through the
// `OperationStatus` record in the store; implemented by hand in
// `status.rs` to keep the wire shape (`code`, `message`) stable
// independent of field order/visibility changes here.

/// All errors possible to occur across the UCP/RP runtime.
///
/// Library boundaries each get their own variant rather than a shared
/// `String` bucket so that `metric_label()` stays low-cardinality and HTTP
/// status mapping stays exhaustive.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("resource id is invalid: {0}")]
    InvalidId(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("precondition failed: expected etag {expected}, stored etag is {actual}")]
    PreconditionFailed { expected: String, actual: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cannot change parent resource reference: application/environment are immutable (old: {old:?}, new: {new:?})")]
    LinkedResourceUpdateError { old: String, new: String },

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("operation canceled: {0}")]
    Canceled(String),

    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] crate::queue::QueueError),

    #[error("processor error: {0}")]
    Processor(#[from] crate::processor::ProcessorError),

    #[error("kubernetes reported error: {0}")]
    Kube(#[from] kube::Error),

    #[error("downstream plane request failed: {0}")]
    Proxy(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Bounded-cardinality label for Prometheus error-count metrics.
    pub fn metric_label(&self) -> String {
        match self {
            Error::InvalidId(_) => "invalid_id",
            Error::NotFound(_) => "not_found",
            Error::PreconditionFailed { .. } => "precondition_failed",
            Error::Conflict(_) => "conflict",
            Error::LinkedResourceUpdateError { .. } => "linked_resource_update",
            Error::ValidationFailed(_) => "validation_failed",
            Error::Unauthorized(_) => "unauthorized",
            Error::Timeout(_) => "timeout",
            Error::Canceled(_) => "canceled",
            Error::Store(_) => "store",
            Error::Queue(_) => "queue",
            Error::Processor(_) => "processor",
            Error::Kube(_) => "kube",
            Error::Proxy(_) => "proxy",
            Error::Internal(_) => "internal",
        }
        .to_owned()
    }

    /// Status code this error maps to on the UCP HTTP surface.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidId(_) | Error::LinkedResourceUpdateError { .. } => 400,
            Error::Unauthorized(_) => 401,
            Error::NotFound(_) => 404,
            Error::PreconditionFailed { .. } | Error::Conflict(_) => 409,
            Error::ValidationFailed(_) => 422,
            Error::Timeout(_) => 504,
            Error::Canceled(_) => 499,
            Error::Store(_) | Error::Queue(_) | Error::Processor(_) | Error::Kube(_)
            | Error::Proxy(_) | Error::Internal(_) => 500,
        }
    }

    pub fn details(&self) -> ErrorDetails {
        ErrorDetails {
            code: self.metric_label(),
            message: self.to_string(),
        }
    }
}

/// ARM-shaped error body, also stored on `OperationStatus.error`.
#[derive(Debug, Clone)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl Serialize for ErrorDetails {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ErrorDetails", 2)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        state.end()
    }
}

impl<'de> serde::Deserialize<'de> for ErrorDetails {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        struct Raw {
            code: String,
            message: String,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(ErrorDetails {
            code: raw.code,
            message: raw.message,
        })
    }
}

impl actix_web::ResponseError for Error {
    fn status_code(&self) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::from_u16(Error::status_code(self)).unwrap_or(
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
        )
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        actix_web::HttpResponse::build(self.status_code()).json(self.details())
    }
}
