//! S3-compatible error types.
//!
//! Every variant maps to one row of the error taxonomy. The enum implements
//! [`axum::response::IntoResponse`] so handlers can simply return
//! `Err(S3Error::NoSuchBucket)`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::primitives::format_http_date;
use crate::xml::render_error;

/// S3 error kinds, one per row of the taxonomy. Exactly ten variants by
/// design — this server recognises no others.
#[derive(Debug, Error)]
pub enum S3Error {
    #[error("Access Denied")]
    AccessDenied,

    #[error("The specified bucket is not valid.")]
    InvalidBucketName,

    #[error("Object key is not valid.")]
    InvalidKey,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("The specified key does not exist.")]
    NoSuchKey,

    #[error("The specified bucket does not exist")]
    NoSuchBucket,

    #[error("The specified upload does not exist.")]
    NoSuchUpload,

    #[error("The bucket you tried to delete is not empty")]
    BucketNotEmpty,

    #[error("The specified method is not allowed against this resource.")]
    MethodNotAllowed,

    #[error("We encountered an internal error, please try again.")]
    InternalError(#[from] anyhow::Error),
}

impl S3Error {
    pub fn code(&self) -> &'static str {
        match self {
            S3Error::AccessDenied => "AccessDenied",
            S3Error::InvalidBucketName => "InvalidBucketName",
            S3Error::InvalidKey => "InvalidKey",
            S3Error::InvalidArgument(_) => "InvalidArgument",
            S3Error::NoSuchKey => "NoSuchKey",
            S3Error::NoSuchBucket => "NoSuchBucket",
            S3Error::NoSuchUpload => "NoSuchUpload",
            S3Error::BucketNotEmpty => "BucketNotEmpty",
            S3Error::MethodNotAllowed => "MethodNotAllowed",
            S3Error::InternalError(_) => "InternalError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            S3Error::AccessDenied => StatusCode::FORBIDDEN,
            S3Error::InvalidBucketName => StatusCode::BAD_REQUEST,
            S3Error::InvalidKey => StatusCode::BAD_REQUEST,
            S3Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            S3Error::NoSuchKey => StatusCode::NOT_FOUND,
            S3Error::NoSuchBucket => StatusCode::NOT_FOUND,
            S3Error::NoSuchUpload => StatusCode::NOT_FOUND,
            S3Error::BucketNotEmpty => StatusCode::CONFLICT,
            S3Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            S3Error::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Map a filesystem error to the taxonomy: not-found maps to the caller's
/// preferred "missing" variant, everything else becomes `InternalError` (the
/// caller is expected to have logged the underlying cause already).
pub fn map_io_error(err: std::io::Error, not_found: S3Error) -> S3Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        not_found
    } else {
        S3Error::InternalError(err.into())
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        if matches!(self, S3Error::InternalError(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let status = self.status_code();
        let date = format_http_date(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0),
        );
        let body = render_error(self.code(), &self.to_string());

        (
            status,
            [
                ("content-type", "application/xml".to_string()),
                ("date", date),
                ("server", "s3lite".to_string()),
            ],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(S3Error::AccessDenied.code(), "AccessDenied");
        assert_eq!(S3Error::AccessDenied.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(S3Error::BucketNotEmpty.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            S3Error::MethodNotAllowed.status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[test]
    fn io_error_mapping() {
        let nf = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(matches!(map_io_error(nf, S3Error::NoSuchKey), S3Error::NoSuchKey));
        let other = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(
            map_io_error(other, S3Error::NoSuchKey),
            S3Error::InternalError(_)
        ));
    }
}
