//! IEC 61850 control services.
//!
//! The underlying MMS library only knows reads and writes; the control
//! semantics live here. A controllable data object exposes its behaviour
//! through `ctlModel` (FC `CF`) and is driven by writing an `Oper` structure
//! (FC `CO`) of the form `[ctlVal, origin, ctlNum, T, Test, Check]`. For
//! select-before-operate models the point is reserved first: a read of the
//! `SBO` attribute for sbo-with-normal-security, a write of the `SBOw`
//! structure for sbo-with-enhanced-security. Only a successful select is
//! followed by an operate.

use iec61850::iec61850::data::{Bitstring, Iec61850Data};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::instrument;

use crate::mms::{Fc, ObjectReference, SessionError, Unsupported, session::MmsSession};

/// The control model declared by a controllable data object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtlModel {
	/// The object only reports status; it cannot be operated.
	StatusOnly,
	/// direct-with-normal-security.
	DirectNormal,
	/// sbo-with-normal-security.
	SboNormal,
	/// direct-with-enhanced-security.
	DirectEnhanced,
	/// sbo-with-enhanced-security.
	SboEnhanced,
}

impl CtlModel {
	/// Decode the enumerated `ctlModel` value.
	pub fn from_value(value: i64) -> Result<Self, SessionError> {
		match value {
			0 => Ok(Self::StatusOnly),
			1 => Ok(Self::DirectNormal),
			2 => Ok(Self::SboNormal),
			3 => Ok(Self::DirectEnhanced),
			4 => Ok(Self::SboEnhanced),
			other => Unsupported { reason: format!("ctlModel value {other}") }.fail(),
		}
	}

	/// Whether the model requires a select before the operate.
	#[must_use]
	pub const fn needs_select(self) -> bool {
		matches!(self, Self::SboNormal | Self::SboEnhanced)
	}
}

/// The category of the originator of a control operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum OriginCategory {
	/// Not supported.
	NotSupported = 0,
	/// Bay control.
	BayControl = 1,
	/// Station control.
	StationControl = 2,
	/// Remote control.
	RemoteControl = 3,
	/// Bay automation.
	AutomaticBay = 4,
	/// Station automation.
	AutomaticStation = 5,
	/// Remote automation.
	AutomaticRemote = 6,
	/// Maintenance.
	Maintenance = 7,
	/// Process.
	Process = 8,
}

/// Who initiated a control operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Originator {
	/// The origin category attached to each operate request.
	pub category: OriginCategory,
	/// The originator identifier attached to each operate request.
	pub identifier: String,
}

impl Default for Originator {
	fn default() -> Self {
		Self { category: OriginCategory::RemoteControl, identifier: "OPCUA_GW".to_owned() }
	}
}

/// The interlock and synchrocheck condition flags of an operate request.
/// Both are cleared unless configured otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlChecks {
	/// Ask the IED to run its synchrocheck before switching.
	#[serde(default)]
	pub synchro: bool,
	/// Ask the IED to evaluate interlocking conditions before switching.
	#[serde(default)]
	pub interlock: bool,
}

/// A client-side handle on one controllable data object.
#[derive(Debug)]
pub struct ControlObject<'a> {
	/// The session the object is reached through.
	session: &'a MmsSession,
	/// The data object, without attribute components.
	reference: ObjectReference,
}

impl<'a> ControlObject<'a> {
	/// Create a handle for a data object reference.
	#[must_use]
	pub const fn new(session: &'a MmsSession, reference: ObjectReference) -> Self {
		Self { session, reference }
	}

	/// Query the control model of the object.
	pub async fn ctl_model(&self) -> Result<CtlModel, SessionError> {
		let value = self.session.read(&self.reference.with_suffix("ctlModel"), Fc::Cf).await?;
		match value {
			Iec61850Data::Integer(value) => CtlModel::from_value(value.into()),
			Iec61850Data::Unsigned(value) => CtlModel::from_value(value.into()),
			_ => crate::mms::TypeMismatch {
				reference: self.reference.to_string(),
				expected: "an integer ctlModel",
			}
			.fail(),
		}
	}

	/// Reserve the point. Only meaningful for SBO models; a failed select
	/// surfaces the application error code and no operate may follow.
	#[instrument(skip(self, ctl_val, origin))]
	pub async fn select(
		&self,
		model: CtlModel,
		ctl_val: &Iec61850Data,
		origin: &Originator,
		checks: ControlChecks,
	) -> Result<(), SessionError> {
		match model {
			CtlModel::SboNormal => {
				let selected = self
					.session
					.read(&self.reference.with_suffix("SBO"), Fc::Co)
					.await
					.map_err(reject)?;
				match selected {
					Iec61850Data::String(value) if !value.is_empty() => Ok(()),
					_ => Err(SessionError::ControlRejected { code: 0 }),
				}
			}
			CtlModel::SboEnhanced => {
				let payload = operate_payload(ctl_val.clone(), origin, checks);
				self.session
					.write(&self.reference.with_suffix("SBOw"), Fc::Co, payload)
					.await
					.map_err(reject)
			}
			_ => Ok(()),
		}
	}

	/// Run the full control sequence: query the model, select where the
	/// model demands it, operate.
	#[instrument(skip(self, ctl_val, origin))]
	pub async fn operate(
		&self,
		ctl_val: Iec61850Data,
		origin: &Originator,
		checks: ControlChecks,
	) -> Result<(), SessionError> {
		let model = self.ctl_model().await?;
		if model == CtlModel::StatusOnly {
			return Unsupported {
				reason: format!("{} is status-only, not controllable", self.reference),
			}
			.fail();
		}

		if model.needs_select() {
			self.select(model, &ctl_val, origin, checks).await?;
			tracing::debug!("Select succeeded for {}", self.reference);
		}

		let payload = operate_payload(ctl_val, origin, checks);
		self.session
			.write(&self.reference.with_suffix("Oper"), Fc::Co, payload)
			.await
			.map_err(reject)?;
		tracing::info!("Control operation successful for {}", self.reference);
		Ok(())
	}
}

/// Map a failed control read or write onto the application error it
/// carries. Transport failures without a data access code stay transport
/// errors.
fn reject(error: SessionError) -> SessionError {
	match error {
		SessionError::Transport { source } => match crate::mms::data_access_code(&source) {
			Some(code) => SessionError::ControlRejected { code },
			None => SessionError::Transport { source },
		},
		SessionError::ObjectDoesNotExist { reference } => {
			SessionError::ObjectDoesNotExist { reference }
		}
		other => other,
	}
}

/// Build the `Oper`/`SBOw` structure for a control value.
fn operate_payload(
	ctl_val: Iec61850Data,
	origin: &Originator,
	checks: ControlChecks,
) -> Iec61850Data {
	Iec61850Data::Structure(vec![
		ctl_val,
		Iec61850Data::Structure(vec![
			Iec61850Data::Integer(origin.category as i32),
			Iec61850Data::OctetString(origin.identifier.as_bytes().to_vec()),
		]),
		Iec61850Data::Unsigned(0),
		Iec61850Data::UtcTime(OffsetDateTime::now_utc()),
		Iec61850Data::Bool(false),
		check_bits(checks),
	])
}

/// Encode the `Check` condition bitstring: bit 0 synchrocheck, bit 1
/// interlock-check.
fn check_bits(checks: ControlChecks) -> Iec61850Data {
	let mut byte = 0_u8;
	if checks.synchro {
		byte |= 1;
	}
	if checks.interlock {
		byte |= 1 << 1;
	}
	Iec61850Data::BitString(Bitstring { bytes: vec![byte], padding: 6 })
}

/// Coerce a boolean command into the control value type the object
/// declares: booleans stay booleans, integers map to 0/1 and double-point
/// bitstrings use the DblPos encoding (OFF = `01`, ON = `10`).
#[must_use]
pub fn coerce_bool_ctl_val(declared: Option<&str>, value: bool) -> Iec61850Data {
	match declared {
		Some("integer") => Iec61850Data::Integer(i32::from(value)),
		Some("unsigned") => Iec61850Data::Unsigned(u32::from(value)),
		Some("bit_string") => Iec61850Data::BitString(double_point_bits(value)),
		_ => Iec61850Data::Bool(value),
	}
}

/// The DblPos control encoding of a boolean: OFF = `01`, ON = `10`.
#[must_use]
fn double_point_bits(on: bool) -> Bitstring {
	// Bit 0 is the first wire bit; "10" sets it, "01" sets the second.
	let byte = if on { 0b01 } else { 0b10 };
	Bitstring { bytes: vec![byte], padding: 6 }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_ctl_model_decoding() {
		assert_eq!(CtlModel::from_value(1).unwrap(), CtlModel::DirectNormal);
		assert_eq!(CtlModel::from_value(2).unwrap(), CtlModel::SboNormal);
		assert_eq!(CtlModel::from_value(4).unwrap(), CtlModel::SboEnhanced);
		assert!(CtlModel::from_value(9).is_err());
		assert!(CtlModel::SboNormal.needs_select());
		assert!(!CtlModel::DirectNormal.needs_select());
	}

	#[test]
	fn test_operate_payload_layout() {
		let payload = operate_payload(
			Iec61850Data::Bool(true),
			&Originator::default(),
			ControlChecks::default(),
		);
		let Iec61850Data::Structure(members) = payload else { panic!("not a structure") };
		assert_eq!(members.len(), 6);
		assert_eq!(members[0], Iec61850Data::Bool(true));
		let Iec61850Data::Structure(origin) = &members[1] else { panic!("origin") };
		assert_eq!(origin[0], Iec61850Data::Integer(3));
		assert_eq!(origin[1], Iec61850Data::OctetString(b"OPCUA_GW".to_vec()));
		assert_eq!(members[2], Iec61850Data::Unsigned(0));
		assert_eq!(members[4], Iec61850Data::Bool(false));
		// Checks cleared by default.
		assert_eq!(
			members[5],
			Iec61850Data::BitString(Bitstring { bytes: vec![0], padding: 6 })
		);
	}

	#[test]
	fn test_check_flag_bits() {
		let both = check_bits(ControlChecks { synchro: true, interlock: true });
		assert_eq!(both, Iec61850Data::BitString(Bitstring { bytes: vec![0b11], padding: 6 }));
		let synchro = check_bits(ControlChecks { synchro: true, interlock: false });
		assert_eq!(synchro, Iec61850Data::BitString(Bitstring { bytes: vec![0b01], padding: 6 }));
	}

	#[test]
	fn test_boolean_coercion() {
		assert_eq!(coerce_bool_ctl_val(Some("bool"), true), Iec61850Data::Bool(true));
		assert_eq!(coerce_bool_ctl_val(None, false), Iec61850Data::Bool(false));
		assert_eq!(coerce_bool_ctl_val(Some("integer"), true), Iec61850Data::Integer(1));
		assert_eq!(coerce_bool_ctl_val(Some("integer"), false), Iec61850Data::Integer(0));
		// DblPos: ON = 10, OFF = 01; the first wire bit is stored in the low
		// position of the first byte.
		assert_eq!(
			coerce_bool_ctl_val(Some("bit_string"), true),
			Iec61850Data::BitString(Bitstring { bytes: vec![0b01], padding: 6 })
		);
		assert_eq!(
			coerce_bool_ctl_val(Some("bit_string"), false),
			Iec61850Data::BitString(Bitstring { bytes: vec![0b10], padding: 6 })
		);
	}
}
