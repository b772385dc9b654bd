//! # inkcalc
//!
//! An HTTP service that reads handwritten mathematics from a canvas image
//! and answers with one computed result per statement.
//!
//! A request carries a data-URL image and an optional mapping of known
//! variables. The image is decoded, a vision LLM transcribes the statements
//! it contains, and each statement is classified and resolved locally in
//! reading order, so an assignment like `x = 4` is visible to every statement
//! after it.
//!
//! ## Core Concepts
//!
//! - **[`decode_data_url`]** turns the request payload into a [`DecodedImage`].
//! - **[`Recognizer`]** reads statements from an image. [`LlmRecognizer`]
//!   asks a vision model through a pluggable [`backend::Backend`] (Ollama or
//!   any OpenAI-compatible API) and parses its reply defensively.
//! - **[`classify`](classify::classify)** decides whether a statement is an
//!   expression, assignment, equation or graphical problem.
//! - **[`eval`]** evaluates and simplifies expressions, leaving unbound
//!   symbols symbolic, and solves single-unknown linear equations.
//! - **[`AnalysisEngine`]** runs recognition and then [`resolve_items`] with
//!   the variable mapping as an explicit accumulator.
//! - **[`server`]** exposes it all over axum.
//!
//! ## Quick Start
//!
//! ```no_run
//! use inkcalc::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     inkcalc::logging::init(config.environment);
//!     inkcalc::server::serve(config).await
//! }
//! ```
//!
//! ## Resolving without a model
//!
//! ```
//! use inkcalc::{resolve_items, MathValue, RecognizedItem, VariableMapping};
//!
//! let items = [
//!     RecognizedItem::text("2x + 3 = 7"),
//!     RecognizedItem::text("x * y"),
//! ];
//! let records = resolve_items(&items, VariableMapping::new().with("y", 5i64));
//! assert_eq!(records[0].expression, "x");
//! assert_eq!(records[1].result, MathValue::Number(10.0));
//! ```

pub mod assemble;
pub mod backend;
pub mod classify;
pub mod client;
pub mod config;
pub mod decode;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod eval;
pub mod events;
pub mod exec_ctx;
pub mod logging;
pub mod output_parser;
pub mod prompt;
pub mod recognizer;
pub mod retry;
pub mod server;
pub mod types;

pub use assemble::AnalysisResponse;
pub use backend::{BackoffConfig, MockBackend, OllamaBackend, OpenAiBackend};
pub use client::LlmConfig;
pub use decode::{decode_data_url, DecodeError, DecodedImage};
pub use diagnostics::ParseDiagnostics;
pub use engine::{resolve_items, AnalysisEngine};
pub use error::{AnalysisError, Result};
pub use eval::EvalError;
pub use exec_ctx::{ExecCtx, ExecCtxBuilder};
pub use recognizer::{LlmRecognizer, Recognizer};
pub use retry::RetryConfig;
pub use types::{ImageRequest, ItemKind, MathValue, RecognizedItem, ResultRecord, VariableMapping};
