//! SCL document handling.
//!
//! The gateway synthesizes per-IED capability and configured descriptions
//! (ICD/CID) from discovered models, merges them into one station document
//! (SCD) and projects station documents back into the in-memory model.

use serde::{Deserialize, Serialize};
use snafu::Snafu;

pub mod merge;
pub mod project;
pub mod synthesize;
pub mod xml;

pub use merge::{NetworkConfig, SclMerger};
pub use project::project;
pub use synthesize::SclSynthesizer;

/// The SCL document namespace.
pub const SCL_NAMESPACE: &str = "http://www.iec.ch/61850/2003/SCL";

/// The SCL schema version emitted and accepted by the gateway.
pub const SCL_VERSION: &str = "2007";

/// The SCL schema revision emitted and accepted by the gateway.
pub const SCL_REVISION: &str = "B";

/// The export format of a single-IED description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SclFormat {
	/// Capability description: generic communication block, placeholder
	/// addresses.
	Icd,
	/// Configured description: the actual endpoint.
	Cid,
}

/// The error type for SCL handling.
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum SclError {
	#[snafu(display("Malformed SCL document: {}", reason))]
	SclMalformed { reason: String },
	#[snafu(display("SCL document cannot be parsed"))]
	SclParse { source: roxmltree::Error },
	#[snafu(display("SCL document cannot be serialized: {}", reason))]
	SclSerialize { reason: String },
}
