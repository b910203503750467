//! MMS session layer.
//!
//! Everything that talks to an IED lives here: the canonical object
//! reference type, the per-IED session with its serialized request path, the
//! session registry and the IEC 61850 control-service client built on top of
//! the `iec61850` crate's read/write primitives.

use iec61850::iec61850::Iec61850ClientError;
use iec61850::mms::client::MmsClientError;
use num_traits::ToPrimitive as _;
use snafu::Snafu;

pub mod control;
pub mod reference;
pub mod registry;
pub mod session;

pub use reference::ObjectReference;
pub use registry::SessionRegistry;
pub use session::{MmsSession, RcbRef, ReportSink, SessionConfig};

/// MMS data access error code for object-non-existent.
const DATA_ACCESS_OBJECT_NON_EXISTENT: i64 = 10;

/// A functional constraint selecting which subset of a data object's
/// attributes a read or write addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fc {
	/// Status information.
	St,
	/// Measurands.
	Mx,
	/// Control.
	Co,
	/// Configuration.
	Cf,
	/// Description.
	Dc,
	/// Setpoints.
	Sp,
	/// Substitution.
	Sv,
	/// Setting groups.
	Sg,
	/// Setting group editing.
	Se,
	/// Service response.
	Sr,
	/// Operate received.
	Or,
	/// Blocking.
	Bl,
	/// Extended definition.
	Ex,
}

impl Fc {
	/// The wire name of the functional constraint.
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::St => "ST",
			Self::Mx => "MX",
			Self::Co => "CO",
			Self::Cf => "CF",
			Self::Dc => "DC",
			Self::Sp => "SP",
			Self::Sv => "SV",
			Self::Sg => "SG",
			Self::Se => "SE",
			Self::Sr => "SR",
			Self::Or => "OR",
			Self::Bl => "BL",
			Self::Ex => "EX",
		}
	}
}

impl std::fmt::Display for Fc {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// The error type for the session layer.
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum SessionError {
	#[snafu(display("Session {} is not connected", ied))]
	NotConnected { ied: String },
	#[snafu(display("Transport error"))]
	Transport { source: Iec61850ClientError },
	#[snafu(display("Object does not exist: {}", reference))]
	ObjectDoesNotExist { reference: String },
	#[snafu(display("Type mismatch at {}: expected {}", reference, expected))]
	TypeMismatch { reference: String, expected: &'static str },
	#[snafu(display("Control rejected with last application error code {}", code))]
	ControlRejected { code: i64 },
	#[snafu(display("Unsupported operation: {}", reason))]
	Unsupported { reason: String },
	#[snafu(display("Invalid object reference: {}", reference))]
	InvalidReference { reference: String },
}

impl SessionError {
	/// Classify a client error, mapping the MMS object-non-existent data
	/// access error to [`SessionError::ObjectDoesNotExist`] and everything
	/// else to [`SessionError::Transport`].
	pub(crate) fn from_client(reference: &str, error: Iec61850ClientError) -> Self {
		if is_object_non_existent(&error) {
			Self::ObjectDoesNotExist { reference: reference.to_owned() }
		} else {
			Self::Transport { source: error }
		}
	}
}

/// The MMS data access error code carried by a client error, if any.
pub(crate) fn data_access_code(error: &Iec61850ClientError) -> Option<i64> {
	match error {
		Iec61850ClientError::Client { source: MmsClientError::DataAccessError { error, .. } } => {
			error.to_i64()
		}
		_ => None,
	}
}

/// Whether the client error is the MMS object-non-existent data access error.
fn is_object_non_existent(error: &Iec61850ClientError) -> bool {
	data_access_code(error) == Some(DATA_ACCESS_OBJECT_NON_EXISTENT)
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_fc_display() {
		assert_eq!(Fc::St.to_string(), "ST");
		assert_eq!(Fc::Mx.as_str(), "MX");
		assert_eq!(Fc::Co.as_str(), "CO");
	}
}
