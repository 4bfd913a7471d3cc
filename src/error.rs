//! Error taxonomy for the water balance service.
//!
//! Every failure reaching the HTTP boundary is one of these variants and is
//! rendered as the uniform `{ success: false, data: [], message }` envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::error;

use crate::gateway::WaterBalanceResponse;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Required connection settings are missing.
    #[error("configuration error: {0}")]
    Config(String),

    /// The request body is not valid JSON of the expected shape.
    #[error("invalid request body, expected a JSON object: {0}")]
    MalformedInput(String),

    /// The record source failed to answer the query.
    #[error("query failed: {0}")]
    DataAccess(String),

    /// Tree assembly did not complete.
    #[error("tree assembly failed: {0}")]
    Assembly(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedInput(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) | Self::DataAccess(_) | Self::Assembly(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Wrap an `anyhow` chain as a data-access error, keeping every cause.
    pub fn data_access(err: anyhow::Error) -> Self {
        Self::DataAccess(format!("{:#}", err))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        error!("Water balance request failed ({}): {}", status, self);
        (status, Json(WaterBalanceResponse::failure(self.to_string()))).into_response()
    }
}
