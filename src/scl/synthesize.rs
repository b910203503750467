//! Single-IED SCL synthesis.
//!
//! Serializes one discovered IED to a well-formed SCL document, either as a
//! capability description (ICD, placeholder addresses) or as a configured
//! description (CID, actual endpoint). Synthesis is deterministic: equal
//! inputs produce byte-identical documents.

use std::collections::BTreeSet;

use crate::{
	model::{Cdc, Ied, LogicalNode},
	scl::{SCL_NAMESPACE, SCL_REVISION, SCL_VERSION, SclError, SclFormat, xml::XmlElement},
};

/// The `DOType` id used for the device name plate.
pub const PHYNAM_TYPE_ID: &str = "DPL_1_PhyNam";

/// The data attributes of the standard device name plate type.
pub const PHYNAM_ATTRIBUTES: [&str; 4] = ["vendor", "swRev", "d", "configRev"];

/// Serializer for one IED.
#[derive(Debug)]
pub struct SclSynthesizer<'a> {
	/// The discovered model to serialize.
	ied: &'a Ied,
}

impl<'a> SclSynthesizer<'a> {
	/// Create a synthesizer over a discovered model.
	#[must_use]
	pub const fn new(ied: &'a Ied) -> Self {
		Self { ied }
	}

	/// Produce the document in the requested format. The configured format
	/// uses the endpoint when one is given and falls back to placeholders
	/// otherwise.
	pub fn synthesize(
		&self,
		format: SclFormat,
		endpoint: Option<(&str, u16)>,
	) -> Result<String, SclError> {
		let mut root = XmlElement::new("SCL")
			.with_attr("xmlns", SCL_NAMESPACE)
			.with_attr("version", SCL_VERSION)
			.with_attr("revision", SCL_REVISION)
			.with_attr("release", "4");

		root.push(self.header(format));
		root.push(self.communication(format, endpoint));
		root.push(self.ied_section());
		root.push(self.data_type_templates());
		root.to_document()
	}

	/// The document header with a fixed history entry.
	fn header(&self, format: SclFormat) -> XmlElement {
		let what = match format {
			SclFormat::Icd => "ICD Generation",
			SclFormat::Cid => "CID Generation",
		};
		XmlElement::new("Header")
			.with_attr("id", &self.ied.name)
			.with_attr("version", "1.0")
			.with_attr("revision", "1")
			.with_attr("toolID", "iec61850-gateway")
			.with_child(XmlElement::new("History").with_child(
				XmlElement::new("Hitem")
					.with_attr("version", "1.0")
					.with_attr("revision", "1")
					.with_attr("when", "2025-01-01T00:00:00Z")
					.with_attr("who", "Gateway")
					.with_attr("what", what),
			))
	}

	/// The communication block. Capability documents carry placeholder
	/// addresses; configured documents carry the actual endpoint.
	fn communication(&self, format: SclFormat, endpoint: Option<(&str, u16)>) -> XmlElement {
		let (address, port) = match (format, endpoint) {
			(SclFormat::Cid, Some((address, port))) => (address.to_owned(), Some(port)),
			_ => ("0.0.0.0".to_owned(), None),
		};

		let mut address_node = XmlElement::new("Address");
		let mut add_p = |kind: &str, value: &str| {
			address_node.push(XmlElement::new("P").with_attr("type", kind).with_text(value));
		};
		add_p("IP", &address);
		add_p("IP-SUBNET", "255.255.255.0");
		add_p("IP-GATEWAY", "192.168.1.1");
		add_p("OSI-TSEL", "0001");
		add_p("OSI-PSEL", "00000001");
		add_p("OSI-SSEL", "0001");
		if let Some(port) = port {
			add_p("TCP-PORT", &port.to_string());
		}

		XmlElement::new("Communication").with_child(
			XmlElement::new("SubNetwork")
				.with_attr("name", "SubNetwork1")
				.with_attr("type", "8-MMS")
				.with_child(
					XmlElement::new("ConnectedAP")
						.with_attr("iedName", &self.ied.name)
						.with_attr("apName", "AP1")
						.with_child(address_node),
				),
		)
	}

	/// The IED section with the full logical device tree.
	fn ied_section(&self) -> XmlElement {
		let mut ied = XmlElement::new("IED").with_attr("name", &self.ied.name);
		if !self.ied.vendor.is_empty() {
			ied.set_attribute("manufacturer", &self.ied.vendor);
		}

		let mut server = XmlElement::new("Server")
			.with_child(XmlElement::new("Authentication").with_attr("none", "true"));
		for device in &self.ied.logical_devices {
			let mut ldevice = XmlElement::new("LDevice").with_attr("inst", &device.instance);
			for node in &device.logical_nodes {
				ldevice.push(logical_node(node));
			}
			server.push(ldevice);
		}

		ied.push(XmlElement::new("AccessPoint").with_attr("name", "AP1").with_child(server));
		ied
	}

	/// The type templates: one `DOType` per class in use, the standard name
	/// plate and the minimal physical-device node type.
	fn data_type_templates(&self) -> XmlElement {
		let mut used: BTreeSet<&'static str> = BTreeSet::new();
		let mut classes: Vec<Cdc> = Vec::new();
		let mut remember = |cdc: Cdc| {
			if cdc != Cdc::Unknown && used.insert(cdc.as_str()) {
				classes.push(cdc);
			}
		};
		// The physical-device stock always resolves.
		remember(Cdc::Sps);
		remember(Cdc::Dpl);
		for device in &self.ied.logical_devices {
			for node in &device.logical_nodes {
				for data_object in &node.data_objects {
					remember(data_object.cdc);
				}
			}
		}
		classes.sort_by_key(|cdc| cdc.as_str());

		let mut templates = XmlElement::new("DataTypeTemplates");
		templates.push(lphd_node_type());
		for cdc in classes {
			templates.push(do_type(cdc));
		}
		templates
	}
}

/// The template id a data object of a class points at.
#[must_use]
pub fn template_id(cdc: Cdc) -> String {
	if cdc == Cdc::Dpl { PHYNAM_TYPE_ID.to_owned() } else { format!("{}_Type", cdc.as_str()) }
}

/// Serialize one logical node with its data object instances.
fn logical_node(node: &LogicalNode) -> XmlElement {
	let mut element = if node.class == "LLN0" {
		XmlElement::new("LN0")
			.with_attr("lnClass", "LLN0")
			.with_attr("inst", "")
			.with_attr("lnType", "LLN0_Type")
	} else {
		let mut element = XmlElement::new("LN");
		if !node.prefix.is_empty() {
			element.set_attribute("prefix", &node.prefix);
		}
		element
			.with_attr("lnClass", &node.class)
			.with_attr("inst", &node.instance)
			.with_attr("lnType", &format!("{}_Type", node.class))
	};

	for data_object in &node.data_objects {
		let mut doi = XmlElement::new("DOI").with_attr("name", &data_object.name);
		if data_object.cdc != Cdc::Unknown {
			doi.set_attribute("type", &template_id(data_object.cdc));
		}
		element.push(doi);
	}
	element
}

/// The minimal `LPHD` logical node type.
fn lphd_node_type() -> XmlElement {
	let add_do = |name: &str, kind: &str| {
		XmlElement::new("DO").with_attr("name", name).with_attr("type", kind)
	};
	XmlElement::new("LNodeType")
		.with_attr("id", "LPHD_Type")
		.with_attr("lnClass", "LPHD")
		.with_child(add_do("PhyNam", PHYNAM_TYPE_ID))
		.with_child(add_do("PhyHealth", "SPS_Type"))
		.with_child(add_do("Proxy", "SPS_Type"))
}

/// The `DOType` template of a class, carrying its characteristic data
/// attributes.
fn do_type(cdc: Cdc) -> XmlElement {
	let mut element = XmlElement::new("DOType")
		.with_attr("id", &template_id(cdc))
		.with_attr("cdc", cdc.as_str());
	for (name, b_type, fc) in do_type_attributes(cdc) {
		element.push(
			XmlElement::new("DA")
				.with_attr("name", name)
				.with_attr("bType", b_type)
				.with_attr("fc", fc),
		);
	}
	element
}

/// The representative data attributes of each class: `(name, bType, fc)`.
fn do_type_attributes(cdc: Cdc) -> Vec<(&'static str, &'static str, &'static str)> {
	match cdc {
		Cdc::Sps => vec![
			("stVal", "BOOLEAN", "ST"),
			("q", "Quality", "ST"),
			("t", "Timestamp", "ST"),
		],
		Cdc::Dps => vec![("stVal", "Dbpos", "ST"), ("q", "Quality", "ST"), ("t", "Timestamp", "ST")],
		Cdc::Spc => vec![
			("stVal", "BOOLEAN", "ST"),
			("q", "Quality", "ST"),
			("t", "Timestamp", "ST"),
			("Oper", "Struct", "CO"),
			("ctlModel", "Enum", "CF"),
		],
		Cdc::Dpc => vec![
			("stVal", "Dbpos", "ST"),
			("q", "Quality", "ST"),
			("t", "Timestamp", "ST"),
			("Oper", "Struct", "CO"),
			("ctlModel", "Enum", "CF"),
		],
		Cdc::Mv => vec![("mag", "Struct", "MX"), ("q", "Quality", "MX"), ("t", "Timestamp", "MX")],
		Cdc::Cmv => vec![("cVal", "Struct", "MX"), ("q", "Quality", "MX"), ("t", "Timestamp", "MX")],
		Cdc::Sav => vec![("instMag", "Struct", "MX"), ("q", "Quality", "MX")],
		Cdc::Apc => vec![
			("mag", "Struct", "MX"),
			("Oper", "Struct", "CO"),
			("ctlModel", "Enum", "CF"),
		],
		Cdc::Asg => vec![("setMag", "Struct", "SP")],
		Cdc::Ing => vec![("setVal", "INT32", "SP")],
		Cdc::Eng => vec![("setVal", "Enum", "SP")],
		Cdc::Ins => vec![("stVal", "INT32", "ST"), ("q", "Quality", "ST"), ("t", "Timestamp", "ST")],
		Cdc::Ens => vec![("stVal", "Enum", "ST"), ("q", "Quality", "ST"), ("t", "Timestamp", "ST")],
		Cdc::Enc => vec![
			("stVal", "Enum", "ST"),
			("q", "Quality", "ST"),
			("t", "Timestamp", "ST"),
			("Oper", "Struct", "CO"),
			("ctlModel", "Enum", "CF"),
		],
		Cdc::Inc => vec![
			("stVal", "INT32", "ST"),
			("q", "Quality", "ST"),
			("t", "Timestamp", "ST"),
			("Oper", "Struct", "CO"),
			("ctlModel", "Enum", "CF"),
		],
		Cdc::Bcr => vec![
			("actVal", "INT64", "ST"),
			("frVal", "INT64", "ST"),
			("frTm", "Timestamp", "ST"),
		],
		Cdc::Bsc => vec![("valWTr", "Struct", "ST"), ("Oper", "Struct", "CO")],
		Cdc::Isc => vec![("valWTr", "Struct", "ST"), ("Oper", "Struct", "CO")],
		Cdc::Act => vec![("general", "BOOLEAN", "ST"), ("q", "Quality", "ST"), ("t", "Timestamp", "ST")],
		Cdc::Acd => vec![
			("general", "BOOLEAN", "ST"),
			("dirGeneral", "Enum", "ST"),
			("q", "Quality", "ST"),
			("t", "Timestamp", "ST"),
		],
		Cdc::Dir => vec![("dirGeneral", "Enum", "ST")],
		Cdc::Wye => vec![("phsA", "Struct", "MX"), ("phsB", "Struct", "MX"), ("phsC", "Struct", "MX")],
		Cdc::Del => vec![
			("phsAB", "Struct", "MX"),
			("phsBC", "Struct", "MX"),
			("phsCA", "Struct", "MX"),
		],
		Cdc::Seq => vec![("c1", "Struct", "MX"), ("c2", "Struct", "MX"), ("c3", "Struct", "MX")],
		Cdc::Dpl => {
			PHYNAM_ATTRIBUTES.iter().map(|name| (*name, "VisString255", "DC")).collect()
		}
		Cdc::Lpl => vec![
			("vendor", "VisString255", "DC"),
			("swRev", "VisString255", "DC"),
			("d", "VisString255", "DC"),
			("ldNs", "VisString255", "EX"),
		],
		Cdc::Spg => vec![("setVal", "BOOLEAN", "SG")],
		Cdc::Curve => vec![("setCharact", "Enum", "SP"), ("numPts", "INT16U", "SP")],
		Cdc::Org => vec![("orCat", "Enum", "ST"), ("orIdent", "Octet64", "ST")],
		Cdc::Vss => vec![("strVal", "VisString255", "ST")],
		Cdc::Unknown => Vec::new(),
	}
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{DataObject, LogicalDevice};

	fn minimal_ied() -> Ied {
		Ied {
			name: "IED1".to_owned(),
			vendor: "ACME".to_owned(),
			address: None,
			logical_devices: vec![LogicalDevice {
				instance: "LD0".to_owned(),
				logical_nodes: vec![LogicalNode {
					prefix: String::new(),
					class: "LLN0".to_owned(),
					instance: String::new(),
					data_objects: vec![
						DataObject { name: "Mod".to_owned(), cdc: Cdc::Spc },
						DataObject { name: "Health".to_owned(), cdc: Cdc::Sps },
					],
				}],
			}],
		}
	}

	#[test]
	fn test_capability_document_shape() {
		let ied = minimal_ied();
		let xml = SclSynthesizer::new(&ied).synthesize(SclFormat::Icd, None).unwrap();

		assert!(xml.contains("http://www.iec.ch/61850/2003/SCL"));
		assert!(xml.contains("SPC_Type"));
		assert!(xml.contains("SPS_Type"));
		assert!(xml.contains(PHYNAM_TYPE_ID));
		assert!(xml.contains("LPHD_Type"));
		// Capability mode carries placeholder addressing.
		assert!(xml.contains("0.0.0.0"));
		assert!(!xml.contains("TCP-PORT"));
	}

	#[test]
	fn test_configured_document_carries_endpoint() {
		let ied = minimal_ied();
		let xml = SclSynthesizer::new(&ied)
			.synthesize(SclFormat::Cid, Some(("192.168.1.50", 102)))
			.unwrap();
		assert!(xml.contains("192.168.1.50"));
		assert!(xml.contains("TCP-PORT"));
		assert!(xml.contains(">102<"));
	}

	#[test]
	fn test_synthesis_is_deterministic() {
		let ied = minimal_ied();
		let first = SclSynthesizer::new(&ied).synthesize(SclFormat::Icd, None).unwrap();
		let second = SclSynthesizer::new(&ied).synthesize(SclFormat::Icd, None).unwrap();
		assert_eq!(first, second);
	}

	#[test]
	fn test_unknown_objects_get_no_type_reference() {
		let mut ied = minimal_ied();
		ied.logical_devices[0].logical_nodes[0]
			.data_objects
			.push(DataObject { name: "Mystery".to_owned(), cdc: Cdc::Unknown });
		let xml = SclSynthesizer::new(&ied).synthesize(SclFormat::Icd, None).unwrap();
		assert!(xml.contains("name=\"Mystery\""));
		assert!(!xml.contains("Unknown_Type"));
	}

	#[test]
	fn test_name_plate_template() {
		let template = do_type(Cdc::Dpl);
		assert_eq!(template.attribute("id"), Some(PHYNAM_TYPE_ID));
		let names: Vec<&str> =
			template.children_named("DA").filter_map(|da| da.attribute("name")).collect();
		assert_eq!(names, vec!["vendor", "swRev", "d", "configRev"]);
		assert!(
			template
				.children_named("DA")
				.all(|da| da.attribute("fc") == Some("DC")
					&& da.attribute("bType") == Some("VisString255"))
		);
	}
}
