//! Services Layer
//!
//! Business logic called by the REST handlers. Services take the shared
//! `AppState` and return domain results; handlers only shape HTTP.
//!
//! # Architecture
//!
//! ```text
//! REST API ──> Services ──> Queue ──> Workers ──> Store
//!                  └──────> Cache / Store ──> RiskEngine
//! ```
//!
//! # Services
//!
//! - `IngestionService` - Accept uploads, debug direct insert
//! - `AssessmentService` - Cached risk assessment pages
//! - `RiskEngine` - Derived ratios and risk score

pub mod assessment_service;
pub mod ingestion_service;
pub mod risk_engine;

pub use assessment_service::{AssessmentService, RiskAssessment};
pub use ingestion_service::{IngestionService, UploadAccepted};
pub use risk_engine::{EnrichedRecord, RiskEngine, RiskMetrics};
