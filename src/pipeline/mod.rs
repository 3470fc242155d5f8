//! Pipeline stages for PDF-to-records conversion.
//!
//! Each submodule implements one step. The orchestrator in
//! [`crate::convert`] sequences them and owns failure classification.
//!
//! ## Data Flow
//!
//! ```text
//! path ──▶ extract ──▶ inference ──▶ mapper ──▶ schema
//!         (pdfium)     (LLM)         (records)  (validate)
//! ```
//!
//! 1. [`extract`]  : validate the file and pull its text; the parse runs in
//!    `spawn_blocking` because pdfium is synchronous
//! 2. [`inference`]: connectivity gate, prompt truncation, retry loop and
//!    response parsing; the only stage with network I/O, through a
//!    [`backend`]
//! 3. [`mapper`]   : map duck-typed model JSON onto the record schema, or
//!    the generic / malformed fallback
//! 4. [`schema`]   : path-qualified validation of the final document
//!
//! [`postprocess`] holds the deterministic text and response cleanup rules
//! shared by the stages.

pub mod backend;
pub mod extract;
pub mod inference;
pub mod mapper;
pub mod postprocess;
pub mod schema;
