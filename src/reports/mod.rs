//! Report processing: schema validation, normalization, noise filtering and
//! the report log.
//!
//! ```text
//! parsed body
//!     → schema.rs    (CSP/HPKP shape check)
//!     → normalize.rs (request metadata, csp-report hoisting)
//!     → filter.rs    (CSP noise suppression)
//!     → sink.rs      (JSON-lines append, size rotation)
//! ```

pub mod filter;
pub mod normalize;
pub mod schema;
pub mod sink;

pub use filter::{Suppression, SuppressionRules};
pub use normalize::{CSP_ENVELOPE, NormalizeError, ReportRecord, RequestMeta, normalize};
pub use schema::{SchemaError, SchemaRegistry};
pub use sink::{ReportLog, RotatingFile};
