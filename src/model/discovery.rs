//! Online data-model discovery and CDC inference.
//!
//! Discovery walks a connected session's directory services — logical
//! devices, then logical nodes, then data objects — and infers a common
//! data class for every data object from the set of attribute names it
//! exposes. The inference is a prioritized decision list, most specific
//! first, evaluated over a set so it cannot depend on enumeration order.

use std::collections::HashSet;

use iec61850::iec61850::data::Iec61850Data;

use crate::{
	mms::{Fc, ObjectReference, SessionError, session::MmsSession},
	model::{Cdc, DataObject, Ied, LogicalDevice, LogicalNode},
};

/// Walk a connected session and return its fully populated model.
pub async fn discover(session: &MmsSession) -> Result<Ied, SessionError> {
	let mut logical_devices = Vec::new();

	for ld in session.enumerate_devices().await? {
		let mut device = LogicalDevice { instance: ld.clone(), logical_nodes: Vec::new() };

		for ln in session.enumerate_nodes(&ld).await? {
			let mut node = LogicalNode::parse_name(&ln);

			for name in session.enumerate_data_objects(&ld, &ln).await? {
				let attributes = session.enumerate_data_attributes(&ld, &ln, &name).await?;
				let cdc = infer_cdc(&attributes);
				node.data_objects.push(DataObject { name, cdc });
			}
			device.logical_nodes.push(node);
		}
		logical_devices.push(device);
	}

	let vendor = read_vendor(session, &logical_devices).await.unwrap_or_default();
	Ok(Ied { name: session.name().to_owned(), vendor, address: None, logical_devices })
}

/// Try to read the device name plate vendor from the first physical-device
/// node the model exposes. Absence is not an error.
async fn read_vendor(
	session: &MmsSession,
	logical_devices: &[LogicalDevice],
) -> Option<String> {
	for device in logical_devices {
		for node in &device.logical_nodes {
			if node.class != "LPHD" {
				continue;
			}
			let reference = ObjectReference::from_parts(
				session.name(),
				&device.instance,
				&node.name(),
				vec!["PhyNam".to_owned(), "vendor".to_owned()],
			);
			match session.read(&reference, Fc::Dc).await {
				Ok(Iec61850Data::String(vendor)) => return Some(vendor),
				Ok(_) => return None,
				Err(e) => {
					tracing::debug!("Name plate read failed on {reference}: {e}");
					return None;
				}
			}
		}
	}
	None
}

/// Infer the common data class of a data object from the set of attribute
/// names it exposes.
///
/// The rules form a prioritized decision list; the first match wins and
/// ties resolve toward the more constrained class. Data objects whose
/// attributes match nothing are [`Cdc::Unknown`]: still projected, but
/// read-only and treated as opaque strings.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn infer_cdc<S: AsRef<str>>(attributes: &[S]) -> Cdc {
	let set: HashSet<&str> = attributes.iter().map(AsRef::as_ref).collect();
	let has = |name: &str| set.contains(name);
	let has_any = |names: &[&str]| names.iter().any(|name| set.contains(name));

	// Name plates.
	if has("vendor") && has("swRev") && has("ldNs") {
		return Cdc::Lpl;
	}
	if has("vendor") && has("swRev") {
		return Cdc::Dpl;
	}
	// Setting groups and curves.
	if has("ActSG") && has("NumOfSG") {
		return Cdc::Spg;
	}
	if has("setCharact") && has("numPts") {
		return Cdc::Curve;
	}
	// Counters and step positions.
	if has("actVal") && has("frVal") && has("frTm") {
		return Cdc::Bcr;
	}
	if has("actVal") && has("ctlVal") {
		return Cdc::Bsc;
	}
	if has("actVal") && has("minVal") && has("maxVal") {
		return Cdc::Isc;
	}
	// Analogue control and settings.
	if has("ctlVal") && has("cVal") {
		return Cdc::Apc;
	}
	if has("cVal") && has_any(&["minVal", "maxVal", "stepSize"]) {
		return Cdc::Asg;
	}
	if has("cVal") {
		return Cdc::Asg;
	}
	if has("ctlVal") && (has("setMag") || has("mag")) {
		return Cdc::Apc;
	}
	if has("setMag") {
		return Cdc::Asg;
	}
	// Controllable status points.
	if has("ctlVal") && has("intVal") {
		return Cdc::Inc;
	}
	if has("ctlVal") && has("range") {
		return Cdc::Enc;
	}
	if has("ctlVal") && has("stVal") && has("dirGeneral") {
		return Cdc::Dpc;
	}
	if has("ctlVal") && has("stVal") {
		return Cdc::Spc;
	}
	if has("ctlVal") {
		return Cdc::Dpc;
	}
	// Integer and enumerated settings.
	if has("intVal") && has_any(&["minVal", "maxVal"]) {
		return Cdc::Ing;
	}
	if has("range") && has_any(&["minVal", "maxVal"]) {
		return Cdc::Eng;
	}
	// Measurands.
	if has("instMag") {
		return Cdc::Sav;
	}
	if has("cVal") && has_any(&["phsA", "phsAB"]) {
		return Cdc::Cmv;
	}
	if has("cVal") {
		return Cdc::Cmv;
	}
	if has("mag") {
		return Cdc::Mv;
	}
	// Phase collections.
	if has("seqA") {
		return Cdc::Seq;
	}
	if has("phsA") {
		return Cdc::Wye;
	}
	if has("phsAB") {
		return Cdc::Del;
	}
	// Protection activation and direction.
	if has("dirGeneral") && has("general") {
		return Cdc::Acd;
	}
	if has("dirGeneral") {
		return Cdc::Dir;
	}
	if has("general") || has("phsStr") {
		return Cdc::Act;
	}
	// Originator and strings.
	if has("orCat") && has("orIdent") {
		return Cdc::Org;
	}
	if has("strVal") {
		return Cdc::Vss;
	}
	// Plain status, least specific last.
	if has("stVal") && has("range") {
		return Cdc::Ens;
	}
	if has("stVal") && has("intVal") {
		return Cdc::Ins;
	}
	if has("stVal") {
		return Cdc::Sps;
	}
	Cdc::Unknown
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
	use super::*;

	fn infer(attributes: &[&str]) -> Cdc {
		infer_cdc(attributes)
	}

	#[test]
	fn test_name_plates_win_over_everything() {
		assert_eq!(infer(&["vendor", "swRev", "ldNs", "d"]), Cdc::Lpl);
		assert_eq!(infer(&["vendor", "swRev", "d", "configRev"]), Cdc::Dpl);
	}

	#[test]
	fn test_setting_groups_and_curves() {
		assert_eq!(infer(&["ActSG", "NumOfSG"]), Cdc::Spg);
		assert_eq!(infer(&["setCharact", "numPts", "xUnit"]), Cdc::Curve);
	}

	#[test]
	fn test_counters_and_step_positions() {
		assert_eq!(infer(&["actVal", "frVal", "frTm"]), Cdc::Bcr);
		assert_eq!(infer(&["actVal", "ctlVal", "q", "t"]), Cdc::Bsc);
		assert_eq!(infer(&["actVal", "minVal", "maxVal"]), Cdc::Isc);
	}

	#[test]
	fn test_analogue_control_and_settings() {
		assert_eq!(infer(&["ctlVal", "cVal"]), Cdc::Apc);
		assert_eq!(infer(&["cVal", "stepSize"]), Cdc::Asg);
		assert_eq!(infer(&["cVal", "minVal"]), Cdc::Asg);
		assert_eq!(infer(&["ctlVal", "setMag"]), Cdc::Apc);
		assert_eq!(infer(&["ctlVal", "mag"]), Cdc::Apc);
		assert_eq!(infer(&["setMag", "maxVal"]), Cdc::Asg);
		assert_eq!(infer(&["setMag"]), Cdc::Asg);
	}

	#[test]
	fn test_controllable_status_points() {
		assert_eq!(infer(&["ctlVal", "intVal"]), Cdc::Inc);
		assert_eq!(infer(&["ctlVal", "range"]), Cdc::Enc);
		assert_eq!(infer(&["ctlVal", "stVal", "dirGeneral"]), Cdc::Dpc);
		assert_eq!(infer(&["ctlVal", "stVal", "q", "t"]), Cdc::Spc);
		assert_eq!(infer(&["ctlVal"]), Cdc::Dpc);
	}

	#[test]
	fn test_settings_and_measurands() {
		assert_eq!(infer(&["intVal", "minVal"]), Cdc::Ing);
		assert_eq!(infer(&["range", "maxVal"]), Cdc::Eng);
		assert_eq!(infer(&["instMag", "q", "t"]), Cdc::Sav);
		assert_eq!(infer(&["mag", "q", "t"]), Cdc::Mv);
	}

	#[test]
	fn test_phase_collections() {
		assert_eq!(infer(&["seqA", "seqB"]), Cdc::Seq);
		assert_eq!(infer(&["phsA", "phsB", "phsC"]), Cdc::Wye);
		assert_eq!(infer(&["phsAB", "phsBC"]), Cdc::Del);
	}

	#[test]
	fn test_protection_and_strings() {
		assert_eq!(infer(&["dirGeneral", "general", "q", "t"]), Cdc::Acd);
		assert_eq!(infer(&["dirGeneral"]), Cdc::Dir);
		assert_eq!(infer(&["general", "q", "t"]), Cdc::Act);
		assert_eq!(infer(&["phsStr"]), Cdc::Act);
		assert_eq!(infer(&["orCat", "orIdent"]), Cdc::Org);
		assert_eq!(infer(&["strVal"]), Cdc::Vss);
	}

	#[test]
	fn test_plain_status_is_least_specific() {
		assert_eq!(infer(&["stVal", "range"]), Cdc::Ens);
		assert_eq!(infer(&["stVal", "intVal"]), Cdc::Ins);
		assert_eq!(infer(&["stVal", "q", "t"]), Cdc::Sps);
		assert_eq!(infer(&["q", "t"]), Cdc::Unknown);
		assert_eq!(infer(&[]), Cdc::Unknown);
	}

	#[test]
	fn test_inference_is_order_stable() {
		let forward = ["ctlVal", "stVal", "q", "t"];
		let backward = ["t", "q", "stVal", "ctlVal"];
		assert_eq!(infer(&forward), infer(&backward));

		let forward = ["vendor", "swRev", "ldNs"];
		let backward = ["ldNs", "swRev", "vendor"];
		assert_eq!(infer(&forward), infer(&backward));
	}

	#[test]
	fn test_inference_is_total_over_recognised_names() {
		// Every pair drawn from the recognised vocabulary must produce some
		// class without panicking.
		let names = [
			"vendor", "swRev", "ldNs", "ActSG", "NumOfSG", "setCharact", "numPts", "actVal",
			"frVal", "frTm", "ctlVal", "minVal", "maxVal", "cVal", "stepSize", "setMag", "mag",
			"intVal", "range", "stVal", "dirGeneral", "instMag", "phsA", "phsAB", "seqA",
			"general", "phsStr", "orCat", "orIdent", "strVal",
		];
		for a in names {
			for b in names {
				let _ = infer(&[a, b]);
			}
		}
	}
}
