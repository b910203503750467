//! Address-space projection and the binding table.
//!
//! The projector materializes a merged station model as OPC UA nodes in the
//! gateway namespace: an object per IED, per logical device and per logical
//! node, and a variable per data object, typed by its class. Every variable
//! creation records a binding in two direction-indexed maps that must stay
//! in sync; the binding table is the contract between the poller, the
//! report router and the write dispatcher.

use std::{
	collections::HashMap,
	sync::Mutex,
};

use iec61850::iec61850::data::{Bitstring, Iec61850Data};
use opcua::{
	server::prelude::DataTypeId,
	types::{NodeId, UAString, Variant},
};
use time::format_description::well_known::Rfc3339;
use tokio::sync::mpsc;

use crate::{
	mms::ObjectReference,
	model::{Cdc, Ied, StationModel},
	ua::{DuplicateBinding, SharedAddressSpace, UaError, WriteRequest},
};

/// The value a string-typed variable shows before its first successful
/// read.
const NO_CONNECTION: &str = "<No IED Connection>";

/// One entry of the binding table.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingEntry {
	/// The canonical reference, `IED/LD/LN.DO`.
	pub reference: String,
	/// The bound node.
	pub node: NodeId,
	/// The class of the data object.
	pub cdc: Cdc,
	/// Whether OPC UA clients may write to the node.
	pub writable: bool,
}

/// The bidirectional reference ↔ node map.
///
/// Both directions are updated under one lock, held only for inserts and
/// lookups. Every node in the reverse map resolves back to the reference
/// that created it, and neither side admits duplicates.
#[derive(Debug, Default)]
pub struct BindingTable {
	/// Both directions behind one mutex.
	maps: Mutex<Maps>,
}

/// The two direction-indexed maps.
#[derive(Debug, Default)]
struct Maps {
	/// Canonical reference to entry.
	by_reference: HashMap<String, BindingEntry>,
	/// Node id back to canonical reference.
	by_node: HashMap<NodeId, String>,
}

impl BindingTable {
	/// Create an empty table.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Record a binding. Fails without touching either map when the
	/// reference or the node is already bound.
	pub fn bind(&self, entry: BindingEntry) -> Result<(), UaError> {
		let mut maps = self.maps.lock().unwrap_or_else(|poison| poison.into_inner());
		if maps.by_reference.contains_key(&entry.reference) || maps.by_node.contains_key(&entry.node)
		{
			return DuplicateBinding { reference: entry.reference }.fail();
		}
		maps.by_node.insert(entry.node.clone(), entry.reference.clone());
		maps.by_reference.insert(entry.reference.clone(), entry);
		Ok(())
	}

	/// The entry bound to a canonical reference.
	#[must_use]
	pub fn entry(&self, reference: &str) -> Option<BindingEntry> {
		let maps = self.maps.lock().unwrap_or_else(|poison| poison.into_inner());
		maps.by_reference.get(reference).cloned()
	}

	/// The canonical reference bound to a node.
	#[must_use]
	pub fn reference_of(&self, node: &NodeId) -> Option<String> {
		let maps = self.maps.lock().unwrap_or_else(|poison| poison.into_inner());
		maps.by_node.get(node).cloned()
	}

	/// A snapshot of every bound reference, sorted.
	#[must_use]
	pub fn references(&self) -> Vec<String> {
		let maps = self.maps.lock().unwrap_or_else(|poison| poison.into_inner());
		let mut references: Vec<String> = maps.by_reference.keys().cloned().collect();
		references.sort();
		references
	}

	/// The number of bindings.
	#[must_use]
	pub fn len(&self) -> usize {
		let maps = self.maps.lock().unwrap_or_else(|poison| poison.into_inner());
		maps.by_reference.len()
	}

	/// Whether the table is empty.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Drop every binding. Used when the address space is rebuilt.
	pub fn clear(&self) {
		let mut maps = self.maps.lock().unwrap_or_else(|poison| poison.into_inner());
		maps.by_reference.clear();
		maps.by_node.clear();
	}
}

/// The projected gateway address space.
#[derive(Debug)]
pub struct GatewaySpace {
	/// The server address space handle.
	space: SharedAddressSpace,
	/// The binding table fed during builds.
	bindings: BindingTable,
	/// Where client writes on controllable nodes are queued.
	writes: mpsc::UnboundedSender<WriteRequest>,
}

impl GatewaySpace {
	/// Create a projector that queues client writes on the given channel.
	#[must_use]
	pub fn new(space: SharedAddressSpace, writes: mpsc::UnboundedSender<WriteRequest>) -> Self {
		Self { space, bindings: BindingTable::new(), writes }
	}

	/// The binding table.
	#[must_use]
	pub const fn bindings(&self) -> &BindingTable {
		&self.bindings
	}

	/// Materialize a station model. Existing bindings are dropped first;
	/// the address space is rebuilt, not patched.
	pub fn build(&self, station: &StationModel) -> Result<(), UaError> {
		self.bindings.clear();
		tracing::info!("Building OPC UA address space for {} IEDs", station.ieds.len());
		for ied in &station.ieds {
			self.build_ied(ied)?;
		}
		Ok(())
	}

	/// One IED subtree.
	fn build_ied(&self, ied: &Ied) -> Result<(), UaError> {
		let description = if ied.vendor.is_empty() {
			"IEC61850 IED Device".to_owned()
		} else {
			format!("{} IED", ied.vendor)
		};
		let ied_node = self.space.add_object(
			&ied.name,
			&ied.name,
			&ied.name,
			&description,
			&self.space.objects_folder(),
		)?;

		if let Some(address) = &ied.address {
			self.space.add_variable(
				&format!("{}.IPAddress", ied.name),
				"IPAddress",
				"IPAddress",
				"Configured endpoint address",
				&ied_node,
				DataTypeId::String,
				Variant::String(UAString::from(address.as_str())),
				None,
			)?;
		}

		for device in &ied.logical_devices {
			let device_id = format!("{}.{}", ied.name, device.instance);
			let device_node = self.space.add_object(
				&device_id,
				&device.instance,
				&device.instance,
				"Logical Device",
				&ied_node,
			)?;

			for node in &device.logical_nodes {
				let ln_name = node.name();
				let ln_id = format!("{device_id}.{ln_name}");
				let display = format!("{ln_name} [{}]", node.class);
				let ln_node =
					self.space.add_object(&ln_id, &ln_name, &display, "Logical Node", &device_node)?;

				for data_object in &node.data_objects {
					self.build_data_object(
						ied,
						&device.instance,
						&ln_name,
						&ln_id,
						&ln_node,
						&data_object.name,
						data_object.cdc,
					)?;
				}
			}
		}
		Ok(())
	}

	/// One data object variable plus its binding entry.
	#[allow(clippy::too_many_arguments)]
	fn build_data_object(
		&self,
		ied: &Ied,
		device: &str,
		ln_name: &str,
		ln_id: &str,
		ln_node: &NodeId,
		name: &str,
		cdc: Cdc,
	) -> Result<(), UaError> {
		let (data_type, initial) = initial_value(cdc);
		let writable = cdc.is_writable();
		let writes = writable.then(|| self.writes.clone());

		let node = self.space.add_variable(
			&format!("{ln_id}.{name}"),
			name,
			&format!("{name} [{cdc}]"),
			"Data Object",
			ln_node,
			data_type,
			initial,
			writes,
		)?;

		let reference =
			ObjectReference::from_parts(&ied.name, device, ln_name, vec![name.to_owned()]);
		self.bindings.bind(BindingEntry {
			reference: reference.to_string(),
			node,
			cdc,
			writable,
		})?;
		if writable {
			tracing::debug!("Registered write handler for {reference}");
		}
		Ok(())
	}

	/// Push a freshly read or reported value into the bound node. Values
	/// for unbound references are dropped.
	pub fn update(&self, reference: &str, value: &Iec61850Data) -> bool {
		let Some(entry) = self.bindings.entry(reference) else {
			tracing::debug!("Update for unbound reference {reference} dropped");
			return false;
		};
		self.space.write_value(&entry.node, variant_from_data(value))
	}
}

/// The OPC UA data type and initial value of a data object variable.
///
/// Boolean classes start out false, measurands start as NaN so clients can
/// tell "never read" from zero, integer statuses start at zero and
/// everything else is a string announcing the missing connection.
fn initial_value(cdc: Cdc) -> (DataTypeId, Variant) {
	match cdc {
		Cdc::Sps | Cdc::Spc | Cdc::Dps | Cdc::Dpc => {
			(DataTypeId::Boolean, Variant::Boolean(false))
		}
		Cdc::Mv | Cdc::Cmv => (DataTypeId::Float, Variant::Float(f32::NAN)),
		Cdc::Ins | Cdc::Ens | Cdc::Enc => (DataTypeId::Int32, Variant::Int32(0)),
		_ => (DataTypeId::String, Variant::String(UAString::from(NO_CONNECTION))),
	}
}

/// Convert an MMS value into the variant written to the address space.
#[must_use]
pub fn variant_from_data(value: &Iec61850Data) -> Variant {
	match value {
		Iec61850Data::Bool(value) => Variant::Boolean(*value),
		Iec61850Data::Integer(value) => Variant::Int32(*value),
		Iec61850Data::Unsigned(value) => Variant::UInt32(*value),
		Iec61850Data::FloatingPoint(value) => Variant::Float(*value),
		Iec61850Data::String(value) | Iec61850Data::MMSString(value) => {
			Variant::String(UAString::from(value.as_str()))
		}
		Iec61850Data::BitString(value) => Variant::UInt32(bitstring_as_integer(value)),
		Iec61850Data::UtcTime(value) | Iec61850Data::BinaryTime(value) => Variant::String(
			UAString::from(value.format(&Rfc3339).unwrap_or_default()),
		),
		Iec61850Data::OctetString(value) => {
			let hex: String = value.iter().map(|byte| format!("{byte:02X}")).collect();
			Variant::String(UAString::from(hex))
		}
		Iec61850Data::Array(_) | Iec61850Data::Structure(_) => {
			Variant::String(UAString::from(data_to_json(value).to_string()))
		}
	}
}

/// Interpret a bitstring as an integer, first wire bit most significant,
/// the way double-point positions are conventionally rendered (OFF = `01` =
/// 1, ON = `10` = 2).
#[must_use]
pub fn bitstring_as_integer(value: &Bitstring) -> u32 {
	let size = (value.bytes.len() * 8).saturating_sub(usize::from(value.padding));
	let mut out = 0_u32;
	for index in 0..size.min(32) {
		let bit = value.bytes[index / 8] >> (index % 8) & 1;
		out |= u32::from(bit) << (size.min(32) - 1 - index);
	}
	out
}

/// Render a composite MMS value as JSON for the string fallback.
fn data_to_json(value: &Iec61850Data) -> serde_json::Value {
	match value {
		Iec61850Data::Array(values) | Iec61850Data::Structure(values) => {
			serde_json::Value::Array(values.iter().map(data_to_json).collect())
		}
		Iec61850Data::Bool(value) => serde_json::Value::Bool(*value),
		Iec61850Data::Integer(value) => serde_json::Value::from(*value),
		Iec61850Data::Unsigned(value) => serde_json::Value::from(*value),
		Iec61850Data::FloatingPoint(value) => serde_json::Number::from_f64(f64::from(*value))
			.map_or(serde_json::Value::Null, serde_json::Value::Number),
		Iec61850Data::String(value) | Iec61850Data::MMSString(value) => {
			serde_json::Value::String(value.clone())
		}
		Iec61850Data::BitString(value) => serde_json::Value::from(bitstring_as_integer(value)),
		Iec61850Data::UtcTime(value) | Iec61850Data::BinaryTime(value) => {
			serde_json::Value::String(value.format(&Rfc3339).unwrap_or_default())
		}
		Iec61850Data::OctetString(value) => {
			serde_json::Value::String(value.iter().map(|byte| format!("{byte:02X}")).collect())
		}
	}
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
	use super::*;

	fn entry(reference: &str, node: u32) -> BindingEntry {
		BindingEntry {
			reference: reference.to_owned(),
			node: NodeId::new(2, node),
			cdc: Cdc::Sps,
			writable: false,
		}
	}

	#[test]
	fn test_binding_inverse_lookup() {
		let table = BindingTable::new();
		table.bind(entry("IED1/LD0/GGIO1.SPCSO1", 1)).unwrap();
		table.bind(entry("IED1/LD0/MMXU1.TotW", 2)).unwrap();

		for reference in table.references() {
			let bound = table.entry(&reference).unwrap();
			assert_eq!(table.reference_of(&bound.node).unwrap(), reference);
		}
		assert_eq!(table.len(), 2);
	}

	#[test]
	fn test_no_duplicate_references_or_nodes() {
		let table = BindingTable::new();
		table.bind(entry("IED1/LD0/GGIO1.SPCSO1", 1)).unwrap();

		let same_reference = table.bind(entry("IED1/LD0/GGIO1.SPCSO1", 3));
		assert!(matches!(same_reference, Err(UaError::DuplicateBinding { .. })));

		let same_node = table.bind(entry("IED1/LD0/GGIO1.SPCSO2", 1));
		assert!(matches!(same_node, Err(UaError::DuplicateBinding { .. })));

		// The failed inserts left both maps untouched.
		assert_eq!(table.len(), 1);
		assert_eq!(
			table.reference_of(&NodeId::new(2, 1_u32)).unwrap(),
			"IED1/LD0/GGIO1.SPCSO1"
		);
	}

	#[test]
	fn test_initial_values_by_class() {
		assert_eq!(initial_value(Cdc::Sps), (DataTypeId::Boolean, Variant::Boolean(false)));
		assert_eq!(initial_value(Cdc::Dpc), (DataTypeId::Boolean, Variant::Boolean(false)));
		let (kind, value) = initial_value(Cdc::Mv);
		assert_eq!(kind, DataTypeId::Float);
		assert!(matches!(value, Variant::Float(f) if f.is_nan()));
		assert_eq!(initial_value(Cdc::Ens), (DataTypeId::Int32, Variant::Int32(0)));
		assert_eq!(
			initial_value(Cdc::Unknown),
			(DataTypeId::String, Variant::String(UAString::from(NO_CONNECTION)))
		);
		// Controllable analogue values fall into the string bucket but stay
		// writable.
		assert!(Cdc::Apc.is_writable());
	}

	#[test]
	fn test_variant_conversion() {
		assert_eq!(variant_from_data(&Iec61850Data::Bool(true)), Variant::Boolean(true));
		assert_eq!(variant_from_data(&Iec61850Data::Integer(-3)), Variant::Int32(-3));
		assert_eq!(variant_from_data(&Iec61850Data::Unsigned(7)), Variant::UInt32(7));
		assert_eq!(variant_from_data(&Iec61850Data::FloatingPoint(42.5)), Variant::Float(42.5));
		assert_eq!(
			variant_from_data(&Iec61850Data::String("ok".to_owned())),
			Variant::String(UAString::from("ok"))
		);
		assert_eq!(
			variant_from_data(&Iec61850Data::OctetString(vec![0xAB, 0x01])),
			Variant::String(UAString::from("AB01"))
		);
	}

	#[test]
	fn test_bitstring_rendering() {
		// DblPos stVal: OFF = 01 -> 1, ON = 10 -> 2.
		let off = Bitstring { bytes: vec![0b10], padding: 6 };
		let on = Bitstring { bytes: vec![0b01], padding: 6 };
		assert_eq!(bitstring_as_integer(&off), 1);
		assert_eq!(bitstring_as_integer(&on), 2);

		let empty = Bitstring { bytes: Vec::new(), padding: 0 };
		assert_eq!(bitstring_as_integer(&empty), 0);
	}

	#[test]
	fn test_composite_values_render_as_json() {
		let value = Iec61850Data::Structure(vec![
			Iec61850Data::Bool(true),
			Iec61850Data::Integer(5),
			Iec61850Data::Array(vec![Iec61850Data::FloatingPoint(1.5)]),
		]);
		let variant = variant_from_data(&value);
		let Variant::String(text) = variant else { panic!("expected string") };
		assert_eq!(text.as_ref(), "[true,5,[1.5]]");
	}
}
