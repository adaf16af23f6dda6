//! Bootstrap layer: modules that run before the pipeline starts.
//!
//! - **logger**: tracing-subscriber initialisation.

pub mod logger;
