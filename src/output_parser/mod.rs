//! # LLM Output Parser
//!
//! Extracts structured data from vision-model replies without another model
//! call. Handles think blocks, markdown fences, prose around the answer,
//! Python-literal dicts and truncated output.
//!
//! | Function | Purpose |
//! |----------|---------|
//! | [`parse_json_value`] | Extract untyped JSON |
//! | [`parse_json_traced`] | Same, reporting the strategy used |
//! | [`strip_think_tags`] | Remove `<think>` blocks from text |
//! | [`try_repair_json`] | Fix common LLM JSON errors |

pub mod error;
pub mod extract;
pub mod json;
pub mod repair;

pub use error::ParseError;
pub use extract::{preprocess, strip_think_tags};
pub use json::{parse_json_traced, parse_json_value, ParsedJson};
pub use repair::try_repair_json;
