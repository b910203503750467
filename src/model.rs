//! The gateway's view of the IEC 61850 data model.
//!
//! Discovery and SCL projection both produce this tree: IEDs holding logical
//! devices, holding logical nodes, holding data objects tagged with their
//! inferred or declared common data class.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::mms::Fc;

pub mod discovery;

/// A common data class: the typed role of a data object, which determines
/// the attributes it carries, how its scalar value is read and whether it is
/// controllable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cdc {
	/// Single point status.
	Sps,
	/// Double point status.
	Dps,
	/// Controllable single point.
	Spc,
	/// Controllable double point.
	Dpc,
	/// Measured value.
	Mv,
	/// Complex measured value.
	Cmv,
	/// Sampled value.
	Sav,
	/// Controllable analogue process value.
	Apc,
	/// Analogue setting.
	Asg,
	/// Integer status setting.
	Ing,
	/// Enumerated status setting.
	Eng,
	/// Integer status.
	Ins,
	/// Enumerated status.
	Ens,
	/// Controllable enumerated status.
	Enc,
	/// Controllable integer status.
	Inc,
	/// Binary counter reading.
	Bcr,
	/// Binary controlled step position.
	Bsc,
	/// Integer controlled step position.
	Isc,
	/// Protection activation information.
	Act,
	/// Directional protection activation information.
	Acd,
	/// Direction.
	Dir,
	/// Phase to ground related measured values.
	Wye,
	/// Phase to phase related measured values.
	Del,
	/// Sequence measured values.
	Seq,
	/// Device name plate.
	Dpl,
	/// Logical node name plate.
	Lpl,
	/// Single point setting group.
	Spg,
	/// Curve shape setting.
	Curve,
	/// Originator.
	Org,
	/// Visible string status.
	Vss,
	/// No recognised class; projected read-only and treated as an opaque
	/// string.
	Unknown,
}

impl Cdc {
	/// The SCL name of the class.
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Sps => "SPS",
			Self::Dps => "DPS",
			Self::Spc => "SPC",
			Self::Dpc => "DPC",
			Self::Mv => "MV",
			Self::Cmv => "CMV",
			Self::Sav => "SAV",
			Self::Apc => "APC",
			Self::Asg => "ASG",
			Self::Ing => "ING",
			Self::Eng => "ENG",
			Self::Ins => "INS",
			Self::Ens => "ENS",
			Self::Enc => "ENC",
			Self::Inc => "INC",
			Self::Bcr => "BCR",
			Self::Bsc => "BSC",
			Self::Isc => "ISC",
			Self::Act => "ACT",
			Self::Acd => "ACD",
			Self::Dir => "DIR",
			Self::Wye => "WYE",
			Self::Del => "DEL",
			Self::Seq => "SEQ",
			Self::Dpl => "DPL",
			Self::Lpl => "LPL",
			Self::Spg => "SPG",
			Self::Curve => "CURVE",
			Self::Org => "ORG",
			Self::Vss => "VSS",
			Self::Unknown => "Unknown",
		}
	}

	/// Parse an SCL class name; anything unrecognised is [`Cdc::Unknown`].
	#[must_use]
	pub fn from_name(name: &str) -> Self {
		match name {
			"SPS" => Self::Sps,
			"DPS" => Self::Dps,
			"SPC" => Self::Spc,
			"DPC" => Self::Dpc,
			"MV" => Self::Mv,
			"CMV" => Self::Cmv,
			"SAV" => Self::Sav,
			"APC" => Self::Apc,
			"ASG" => Self::Asg,
			"ING" => Self::Ing,
			"ENG" => Self::Eng,
			"INS" => Self::Ins,
			"ENS" => Self::Ens,
			"ENC" => Self::Enc,
			"INC" => Self::Inc,
			"BCR" => Self::Bcr,
			"BSC" => Self::Bsc,
			"ISC" => Self::Isc,
			"ACT" => Self::Act,
			"ACD" => Self::Acd,
			"DIR" => Self::Dir,
			"WYE" => Self::Wye,
			"DEL" => Self::Del,
			"SEQ" => Self::Seq,
			"DPL" => Self::Dpl,
			"LPL" => Self::Lpl,
			"SPG" => Self::Spg,
			"CURVE" => Self::Curve,
			"ORG" => Self::Org,
			"VSS" => Self::Vss,
			_ => Self::Unknown,
		}
	}

	/// Whether OPC UA clients may write to data objects of this class. Only
	/// the controllable point classes are writable; everything else is
	/// projected read-only.
	#[must_use]
	pub const fn is_writable(self) -> bool {
		matches!(self, Self::Spc | Self::Dpc | Self::Apc)
	}

	/// The functional constraint a scalar-value read of this class uses.
	#[must_use]
	pub const fn default_fc(self) -> Fc {
		match self {
			Self::Mv | Self::Cmv | Self::Sav | Self::Apc | Self::Wye | Self::Del | Self::Seq => {
				Fc::Mx
			}
			Self::Asg | Self::Ing | Self::Eng | Self::Org | Self::Curve => Fc::Sp,
			Self::Spg => Fc::Sg,
			Self::Dpl | Self::Lpl => Fc::Dc,
			_ => Fc::St,
		}
	}

	/// The attribute suffix a scalar-value read of this class appends to the
	/// data object reference, where a scalar exists.
	#[must_use]
	pub const fn scalar_suffix(self) -> Option<&'static str> {
		match self {
			Self::Sps
			| Self::Dps
			| Self::Spc
			| Self::Dpc
			| Self::Ins
			| Self::Ens
			| Self::Enc
			| Self::Inc
			| Self::Bsc
			| Self::Isc => Some(".stVal"),
			Self::Mv | Self::Cmv | Self::Apc => Some(".mag.f"),
			Self::Sav => Some(".instMag.f"),
			Self::Asg => Some(".setMag.f"),
			Self::Ing | Self::Eng | Self::Spg => Some(".setVal"),
			Self::Bcr => Some(".actVal"),
			Self::Act | Self::Acd => Some(".general"),
			Self::Dir => Some(".dirGeneral"),
			Self::Vss => Some(".strVal"),
			_ => None,
		}
	}
}

impl std::fmt::Display for Cdc {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A data object and its common data class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataObject {
	/// The data object name.
	pub name: String,
	/// The inferred or declared class.
	pub cdc: Cdc,
}

/// A logical node: prefix, class, instance and its data objects in
/// discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalNode {
	/// The application-specific prefix, often empty.
	pub prefix: String,
	/// The four-letter logical node class, `LLN0` for the zero node.
	pub class: String,
	/// The instance suffix, empty for `LLN0`.
	pub instance: String,
	/// The data objects of the node.
	pub data_objects: Vec<DataObject>,
}

impl LogicalNode {
	/// Split a logical node name into prefix, class and instance. The class
	/// is the trailing four letters before the first digit; anything in
	/// front of it is the prefix.
	#[must_use]
	pub fn parse_name(name: &str) -> Self {
		if name == "LLN0" {
			return Self {
				prefix: String::new(),
				class: "LLN0".to_owned(),
				instance: String::new(),
				data_objects: Vec::new(),
			};
		}
		let split = name.find(|c: char| c.is_ascii_digit()).unwrap_or(name.len());
		let (letters, instance) = name.split_at(split);
		let class_start = letters.len().saturating_sub(4);
		Self {
			prefix: letters[..class_start].to_owned(),
			class: letters[class_start..].to_owned(),
			instance: instance.to_owned(),
			data_objects: Vec::new(),
		}
	}

	/// The full node name, `prefix + class + instance`.
	#[must_use]
	pub fn name(&self) -> String {
		format!("{}{}{}", self.prefix, self.class, self.instance)
	}
}

/// A logical device and its logical nodes in discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalDevice {
	/// The logical device instance name.
	pub instance: String,
	/// The logical nodes of the device.
	pub logical_nodes: Vec<LogicalNode>,
}

/// One IED as seen by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ied {
	/// The IED name.
	pub name: String,
	/// The vendor read from the device name plate, empty when unavailable.
	#[serde(default)]
	pub vendor: String,
	/// The network address of the IED, when known.
	#[serde(default)]
	pub address: Option<String>,
	/// The logical devices of the IED.
	pub logical_devices: Vec<LogicalDevice>,
}

/// The merged station model: every IED plus the shared type-template table
/// mapping DOType ids to their classes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationModel {
	/// The IEDs of the station, in document order.
	pub ieds: Vec<Ied>,
	/// DOType id to class, unioned over every source document.
	pub type_templates: BTreeMap<String, Cdc>,
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_cdc_names_round_trip() {
		for cdc in [
			Cdc::Sps,
			Cdc::Dpc,
			Cdc::Mv,
			Cdc::Apc,
			Cdc::Bcr,
			Cdc::Curve,
			Cdc::Lpl,
			Cdc::Vss,
		] {
			assert_eq!(Cdc::from_name(cdc.as_str()), cdc);
		}
		assert_eq!(Cdc::from_name("NOPE"), Cdc::Unknown);
	}

	#[test]
	fn test_writable_classes() {
		assert!(Cdc::Spc.is_writable());
		assert!(Cdc::Dpc.is_writable());
		assert!(Cdc::Apc.is_writable());
		for cdc in [Cdc::Sps, Cdc::Mv, Cdc::Inc, Cdc::Enc, Cdc::Unknown] {
			assert!(!cdc.is_writable(), "{cdc} must not be writable");
		}
	}

	#[test]
	fn test_scalar_access() {
		assert_eq!(Cdc::Mv.default_fc(), Fc::Mx);
		assert_eq!(Cdc::Mv.scalar_suffix(), Some(".mag.f"));
		assert_eq!(Cdc::Sps.default_fc(), Fc::St);
		assert_eq!(Cdc::Sps.scalar_suffix(), Some(".stVal"));
		assert_eq!(Cdc::Dpl.default_fc(), Fc::Dc);
		assert_eq!(Cdc::Unknown.scalar_suffix(), None);
	}

	#[test]
	fn test_logical_node_name_parsing() {
		let lln0 = LogicalNode::parse_name("LLN0");
		assert_eq!((lln0.prefix.as_str(), lln0.class.as_str(), lln0.instance.as_str()), ("", "LLN0", ""));

		let plain = LogicalNode::parse_name("GGIO1");
		assert_eq!(
			(plain.prefix.as_str(), plain.class.as_str(), plain.instance.as_str()),
			("", "GGIO", "1")
		);
		assert_eq!(plain.name(), "GGIO1");

		let prefixed = LogicalNode::parse_name("MyGGIO12");
		assert_eq!(
			(prefixed.prefix.as_str(), prefixed.class.as_str(), prefixed.instance.as_str()),
			("My", "GGIO", "12")
		);

		let no_digit = LogicalNode::parse_name("MMXU");
		assert_eq!(no_digit.class, "MMXU");
		assert_eq!(no_digit.instance, "");
	}
}
