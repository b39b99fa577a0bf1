use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

use crate::classifier::ClassifierError;
use crate::models::ErrorResponse;
use crate::prediction::FormatError;
use crate::preprocess::PreprocessError;

pub const INTERNAL_DETAIL: &str = "Internal server error";

/// Every way a request can fail. The variant alone decides the status code.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("File must be an image")]
    NotAnImage,

    #[error("No file uploaded")]
    MissingFile,

    #[error("Malformed upload: {0}")]
    Multipart(String),

    #[error("File exceeds the maximum upload size of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<PreprocessError> for ApiError {
    fn from(err: PreprocessError) -> Self {
        match err {
            PreprocessError::Decode(_)
            | PreprocessError::Empty
            | PreprocessError::ZeroSized { .. } => {
                ApiError::InvalidImage(err.to_string())
            }
            PreprocessError::Shape(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<actix_multipart::MultipartError> for ApiError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        ApiError::Multipart(err.to_string())
    }
}

impl ApiError {
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Text sent back to the caller. Server-side failures never leak details.
    pub fn detail(&self) -> String {
        if self.is_client_error() {
            self.to_string()
        } else {
            INTERNAL_DETAIL.to_string()
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotAnImage
            | ApiError::MissingFile
            | ApiError::Multipart(_)
            | ApiError::InvalidImage(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Classifier(_) | ApiError::Format(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            detail: self.detail(),
        })
    }
}
