//! Update decisions for `keeper`.
//!
//! - [`facts`]: what changed this cycle
//! - [`default`]: the built-in policy
//! - [`scheme`]: user rules, compiled all-or-nothing
//! - [`engine`]: strategy selection and the [`Detector`] seam

pub mod default;
pub mod engine;
pub mod error;
pub mod facts;
pub mod scheme;

pub use engine::{Detector, Evaluation, OracleDetector, PolicyEngine, Strategy};
pub use error::{LineError, LineErrorKind, PolicyError, SchemeError};
pub use facts::ChangeFacts;
pub use scheme::{compile, compile_file, Scheme, SchemeInstruction};
