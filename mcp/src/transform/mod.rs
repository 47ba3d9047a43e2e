//! Result transformation.
//!
//! - [`extract`]: transport result objects to plain string/structured content
//! - [`payload`]: size governance for large results

pub mod extract;
pub mod payload;

pub use extract::{error_text, extract_content};
pub use payload::{PayloadEnvelope, PayloadProcessor, PayloadSummary, Processed, StorageRef};
