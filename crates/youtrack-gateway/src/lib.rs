//! YouTrack gateway core.
//!
//! This crate translates loosely-typed tool invocations into YouTrack REST
//! calls and normalizes every outcome into a uniform envelope. It is the
//! decision layer behind the `youtrack-gateway-mcp` server.
//!
//! # Architecture
//!
//! Calls flow in one direction:
//!
//! ```text
//! Gateway (orchestrator)
//!   -> codec    (encode flat values into typed wire values)
//!   -> retry    (bounded retry, Retry-After aware)
//!   -> transport (authenticated HTTP)
//!   -> YouTrack
//! ```
//!
//! Failures flow back through [`classify`], which turns HTTP status codes and
//! response bodies into an [`OperationError`] with actionable guidance.
//!
//! Read-only lookups (projects, users, links, comments, attachments) live in
//! [`lookup`]; [`diagnose`] explains what may block a state change.
//!
//! # Example
//!
//! ```no_run
//! use youtrack_gateway::{FieldValue, Gateway, GatewayConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GatewayConfig::from_env()?;
//!     let gateway = Gateway::connect(&config)?;
//!
//!     match gateway.update_state("DEMO-123", "In Progress").await {
//!         Ok(result) => println!("{}", result.message),
//!         Err(error) => eprintln!("{}: {}", error.summary, error.guidance),
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

pub mod classify;
pub mod codec;
pub mod config;
pub mod diagnose;
pub mod error;
pub mod lookup;
pub mod orchestrator;
pub mod retry;
pub mod schema;
pub mod transport;

pub use classify::{Classifier, ClassifyContext, ErrorKind, OperationError};
pub use codec::{FieldDescriptor, FieldKind, FieldValue};
pub use config::GatewayConfig;
pub use diagnose::{TransitionEvent, WorkflowDiagnosis};
pub use error::{Error, Result, TransportFailure};
pub use orchestrator::{BatchResult, FieldOutcome, Gateway, OperationResult, UpdatePath, ValidatedValue};
pub use retry::{Idempotency, RetryError, RetryPolicy, RetryState};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport};
