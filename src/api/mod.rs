//! REST API module
//!
//! Routes:
//! - `POST /upload` (alias `/api/v1/financial/uploadFinancialData`)
//! - `GET /risk-assessment` (alias `/api/v1/financial/getRiskAssessment`)
//! - `POST /api/v1/financial/testUpload`
//! - `GET /health`
//!
//! Every route except `/health` requires the `X-User-Id` header.

pub mod handlers;
mod identity;
mod server;
mod types;

pub use identity::{CallerId, USER_ID_HEADER};
pub use server::{router, ApiServer};
pub use types::{
    HealthResponse, RiskAssessmentResponse, RiskQuery, TestUploadResponse, UploadRequest,
    UploadResponse,
};
