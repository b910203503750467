//! Station-level SCL composition.
//!
//! Combines any number of per-IED capability documents plus a per-IED
//! network configuration table into one station document. IED sections are
//! deep-copied verbatim; type templates are unioned by id with first-seen
//! precedence; two compatibility fix-ups patch the name-plate types that
//! common IEDs omit.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::scl::{
	SCL_NAMESPACE, SCL_REVISION, SCL_VERSION, SclError, SclMalformed,
	synthesize::{PHYNAM_ATTRIBUTES, PHYNAM_TYPE_ID},
	xml::XmlElement,
};

/// The default base address used when auto-assignment is enabled.
pub const DEFAULT_AUTO_ASSIGN_BASE: &str = "192.168.1.100";

/// Per-IED network parameters for the station communication section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
	/// The IP address of the IED's access point.
	pub ip: String,
	/// The subnet mask.
	#[serde(default = "default_subnet_mask")]
	pub subnet_mask: String,
	/// The default gateway.
	#[serde(default = "default_gateway")]
	pub gateway: String,
	/// The MMS port, when it differs from the protocol default.
	#[serde(default)]
	pub mms_port: Option<u16>,
}

/// The default subnet mask.
fn default_subnet_mask() -> String {
	"255.255.255.0".to_owned()
}

/// The default gateway address.
fn default_gateway() -> String {
	"192.168.1.1".to_owned()
}

impl NetworkConfig {
	/// A configuration carrying only an address, with default mask and
	/// gateway.
	#[must_use]
	pub fn with_ip(ip: &str) -> Self {
		Self {
			ip: ip.to_owned(),
			subnet_mask: default_subnet_mask(),
			gateway: default_gateway(),
			mms_port: None,
		}
	}
}

/// One source document queued for merging.
#[derive(Debug)]
struct SourceDocument {
	/// The IED names of the document's IED sections, in order.
	ied_names: Vec<String>,
	/// The parsed document root.
	root: XmlElement,
}

/// Builder for a station document.
#[derive(Debug)]
pub struct SclMerger {
	/// Source documents in merge order.
	sources: Vec<SourceDocument>,
	/// Explicit per-IED network parameters.
	network: HashMap<String, NetworkConfig>,
	/// Assign addresses sequentially to IEDs without explicit parameters.
	auto_assign: bool,
	/// The base address auto-assignment counts from.
	auto_assign_base: String,
	/// Emit a minimal substation section.
	include_substation: bool,
}

impl Default for SclMerger {
	fn default() -> Self {
		Self::new()
	}
}

impl SclMerger {
	/// Create an empty merger.
	#[must_use]
	pub fn new() -> Self {
		Self {
			sources: Vec::new(),
			network: HashMap::new(),
			auto_assign: false,
			auto_assign_base: DEFAULT_AUTO_ASSIGN_BASE.to_owned(),
			include_substation: false,
		}
	}

	/// Queue one source document. Capability documents carry a single IED;
	/// already-merged station documents are accepted as well, so merging is
	/// associative over the IED and type-id sets.
	pub fn add_document(&mut self, xml: &str) -> Result<(), SclError> {
		let root = XmlElement::parse(xml)?;
		if root.name != "SCL" {
			return SclMalformed { reason: format!("root element is {}", root.name) }.fail();
		}
		let ied_names: Vec<String> = root
			.children_named("IED")
			.filter_map(|ied| ied.attribute("name").map(str::to_owned))
			.collect();
		if ied_names.is_empty() {
			return SclMalformed { reason: "document has no named IED" }.fail();
		}
		tracing::info!("Queued description of {} for merge", ied_names.join(", "));
		self.sources.push(SourceDocument { ied_names, root });
		Ok(())
	}

	/// Set the per-IED network parameters.
	pub fn set_network(&mut self, network: HashMap<String, NetworkConfig>) {
		self.network = network;
	}

	/// Enable sequential address assignment for IEDs without explicit
	/// parameters, counting up from the given base (last octet).
	pub fn auto_assign_from(&mut self, base: &str) {
		self.auto_assign = true;
		base.clone_into(&mut self.auto_assign_base);
	}

	/// Emit a minimal substation section in the output.
	pub fn include_substation(&mut self, include: bool) {
		self.include_substation = include;
	}

	/// Compose the station document.
	pub fn merge(&self) -> Result<String, SclError> {
		let network = self.effective_network()?;

		let mut root = XmlElement::new("SCL")
			.with_attr("version", SCL_VERSION)
			.with_attr("revision", SCL_REVISION)
			.with_attr("xmlns", SCL_NAMESPACE);
		root.push(XmlElement::new("Header").with_attr("id", "Generated_SCD"));

		if self.include_substation {
			root.push(
				XmlElement::new("Substation").with_attr("name", "Substation1").with_child(
					XmlElement::new("VoltageLevel").with_attr("name", "110kV"),
				),
			);
		}

		root.push(self.communication(&network));

		// IED sections are deep-copied verbatim from their sources.
		for source in &self.sources {
			for ied in source.root.children_named("IED") {
				root.push(ied.clone());
			}
		}

		root.push(self.merged_templates());
		root.to_document()
	}

	/// The explicit network table, extended by auto-assignment when
	/// enabled. Auto-assigned addresses increment the last octet of the
	/// base by the IED's merge index.
	fn effective_network(&self) -> Result<HashMap<String, NetworkConfig>, SclError> {
		let mut network = self.network.clone();
		if !self.auto_assign {
			return Ok(network);
		}

		let (prefix, start) =
			self.auto_assign_base.rsplit_once('.').ok_or_else(|| SclError::SclMalformed {
				reason: format!("bad auto-assign base {}", self.auto_assign_base),
			})?;
		let start: u32 = start.parse().map_err(|_| SclError::SclMalformed {
			reason: format!("bad auto-assign base {}", self.auto_assign_base),
		})?;

		for (index, name) in self.ied_names().enumerate() {
			if !network.contains_key(name) {
				let ip = format!("{prefix}.{}", start + index as u32);
				network.insert(name.clone(), NetworkConfig::with_ip(&ip));
			}
		}
		Ok(network)
	}

	/// Every IED name across the queued sources, in merge order.
	fn ied_names(&self) -> impl Iterator<Item = &String> {
		self.sources.iter().flat_map(|source| source.ied_names.iter())
	}

	/// The station bus: one connected access point per IED.
	fn communication(&self, network: &HashMap<String, NetworkConfig>) -> XmlElement {
		let mut subnetwork = XmlElement::new("SubNetwork")
			.with_attr("name", "StationBus")
			.with_attr("type", "8-MMS");

		for name in self.ied_names() {
			let mut address = XmlElement::new("Address");
			if let Some(config) = network.get(name) {
				let mut add_p = |kind: &str, value: &str| {
					address.push(XmlElement::new("P").with_attr("type", kind).with_text(value));
				};
				add_p("IP", &config.ip);
				add_p("IP-SUBNET", &config.subnet_mask);
				add_p("IP-GATEWAY", &config.gateway);
				if let Some(port) = config.mms_port {
					add_p("TCP-PORT", &port.to_string());
				}
			}
			subnetwork.push(
				XmlElement::new("ConnectedAP")
					.with_attr("iedName", name)
					.with_attr("apName", "AP1")
					.with_child(address),
			);
		}

		XmlElement::new("Communication").with_child(subnetwork)
	}

	/// Union the source template sections by id, first seen wins, then
	/// apply the name-plate fix-ups.
	fn merged_templates(&self) -> XmlElement {
		let mut templates = XmlElement::new("DataTypeTemplates");
		let mut seen: Vec<String> = Vec::new();

		for source in &self.sources {
			let Some(source_templates) = source.root.child("DataTypeTemplates") else { continue };
			for node in &source_templates.children {
				let Some(id) = node.attribute("id") else { continue };
				if seen.iter().any(|existing| existing == id) {
					continue;
				}
				seen.push(id.to_owned());
				templates.push(node.clone());
			}
		}

		ensure_phynam_type(&mut templates);
		fix_phynam_references(&mut templates);
		templates
	}
}

/// Inject the standard device name plate type when no source carried one.
fn ensure_phynam_type(templates: &mut XmlElement) {
	if templates.find_by_attribute("DOType", "id", PHYNAM_TYPE_ID).is_some() {
		return;
	}
	tracing::info!("Injecting standard {PHYNAM_TYPE_ID} DOType");

	let mut do_type =
		XmlElement::new("DOType").with_attr("id", PHYNAM_TYPE_ID).with_attr("cdc", "DPL");
	for name in PHYNAM_ATTRIBUTES {
		do_type.push(
			XmlElement::new("DA")
				.with_attr("name", name)
				.with_attr("fc", "DC")
				.with_attr("bType", "VisString255"),
		);
	}
	templates.push(do_type);
}

/// Ensure a physical-device node type exists and rewrite every `PhyNam`
/// data object whose referenced type is missing to point at the standard
/// name plate.
fn fix_phynam_references(templates: &mut XmlElement) {
	if templates.find_by_attribute("LNodeType", "id", "LPHD_Type").is_none() {
		tracing::info!("Injecting missing LPHD_Type");
		let add_do = |name: &str, kind: &str| {
			XmlElement::new("DO").with_attr("name", name).with_attr("type", kind)
		};
		templates.push(
			XmlElement::new("LNodeType")
				.with_attr("id", "LPHD_Type")
				.with_attr("lnClass", "LPHD")
				.with_child(add_do("Proxy", "SPS_Type"))
				.with_child(add_do("PhyNam", PHYNAM_TYPE_ID))
				.with_child(add_do("PhyHealth", "SPS_Type")),
		);
	}

	let known_do_types: Vec<String> = templates
		.children_named("DOType")
		.filter_map(|do_type| do_type.attribute("id").map(str::to_owned))
		.collect();

	for node_type in &mut templates.children {
		if node_type.name != "LNodeType" {
			continue;
		}
		let id = node_type.attribute("id").unwrap_or_default().to_owned();
		for data_object in &mut node_type.children {
			if data_object.name != "DO" || data_object.attribute("name") != Some("PhyNam") {
				continue;
			}
			let current = data_object.attribute("type").unwrap_or_default();
			if current.is_empty() || !known_do_types.iter().any(|known| known == current) {
				tracing::info!("Fixing PhyNam type in LNodeType {id} -> {PHYNAM_TYPE_ID}");
				data_object.set_attribute("type", PHYNAM_TYPE_ID);
			}
		}
	}
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		model::{Cdc, DataObject, Ied, LogicalDevice, LogicalNode},
		scl::{SclFormat, project, synthesize::SclSynthesizer},
	};

	fn capability(name: &str, objects: &[(&str, Cdc)]) -> String {
		let ied = Ied {
			name: name.to_owned(),
			vendor: String::new(),
			address: None,
			logical_devices: vec![LogicalDevice {
				instance: "LD0".to_owned(),
				logical_nodes: vec![LogicalNode {
					prefix: String::new(),
					class: "LLN0".to_owned(),
					instance: String::new(),
					data_objects: objects
						.iter()
						.map(|(name, cdc)| DataObject { name: (*name).to_owned(), cdc: *cdc })
						.collect(),
				}],
			}],
		};
		SclSynthesizer::new(&ied).synthesize(SclFormat::Icd, None).unwrap()
	}

	/// A hand-written capability document with no name plate type and a
	/// dangling PhyNam reference.
	fn capability_missing_phynam(name: &str) -> String {
		format!(
			r#"<?xml version="1.0" encoding="UTF-8"?>
<SCL xmlns="http://www.iec.ch/61850/2003/SCL" version="2007" revision="B">
  <Header id="{name}"/>
  <IED name="{name}">
    <AccessPoint name="AP1">
      <Server>
        <LDevice inst="LD0">
          <LN0 lnClass="LLN0" inst="" lnType="LLN0_Type"/>
          <LN lnClass="LPHD" inst="1" lnType="LPHD_1"/>
        </LDevice>
      </Server>
    </AccessPoint>
  </IED>
  <DataTypeTemplates>
    <LNodeType id="LPHD_1" lnClass="LPHD">
      <DO name="PhyNam" type="MissingType"/>
      <DO name="PhyHealth" type="SPS_Type"/>
    </LNodeType>
    <DOType id="SPS_Type" cdc="SPS">
      <DA name="stVal" bType="BOOLEAN" fc="ST"/>
    </DOType>
  </DataTypeTemplates>
</SCL>"#
		)
	}

	#[test]
	fn test_merge_preserves_ied_set() {
		let mut merger = SclMerger::new();
		merger.add_document(&capability("IED1", &[("Mod", Cdc::Spc)])).unwrap();
		merger.add_document(&capability("IED2", &[("TotW", Cdc::Mv)])).unwrap();
		let scd = merger.merge().unwrap();

		let station = project(&scd).unwrap();
		let names: Vec<&str> = station.ieds.iter().map(|ied| ied.name.as_str()).collect();
		assert_eq!(names, vec!["IED1", "IED2"]);
	}

	#[test]
	fn test_station_bus_layout() {
		let mut merger = SclMerger::new();
		merger.add_document(&capability("IED1", &[("Mod", Cdc::Spc)])).unwrap();
		merger.set_network(HashMap::from([(
			"IED1".to_owned(),
			NetworkConfig {
				ip: "10.0.0.5".to_owned(),
				subnet_mask: "255.255.0.0".to_owned(),
				gateway: "10.0.0.1".to_owned(),
				mms_port: Some(102),
			},
		)]));
		let scd = merger.merge().unwrap();

		assert!(scd.contains("StationBus"));
		assert!(scd.contains("8-MMS"));
		assert!(scd.contains("10.0.0.5"));
		assert!(scd.contains("255.255.0.0"));
		assert!(scd.contains("TCP-PORT"));
	}

	#[test]
	fn test_missing_phynam_is_injected_and_rewritten() {
		let mut merger = SclMerger::new();
		merger.add_document(&capability_missing_phynam("IED1")).unwrap();
		merger.add_document(&capability_missing_phynam("IED2")).unwrap();
		let scd = merger.merge().unwrap();

		// Exactly one injected name plate type with the four standard
		// attributes.
		assert_eq!(scd.matches(&format!("id=\"{PHYNAM_TYPE_ID}\"")).count(), 1);
		let root = XmlElement::parse(&scd).unwrap();
		let templates = root.child("DataTypeTemplates").unwrap();
		let phynam = templates.find_by_attribute("DOType", "id", PHYNAM_TYPE_ID).unwrap();
		let names: Vec<&str> =
			phynam.children_named("DA").filter_map(|da| da.attribute("name")).collect();
		assert_eq!(names, vec!["vendor", "swRev", "d", "configRev"]);

		// The dangling reference now points at the injected type.
		let lphd = templates.find_by_attribute("LNodeType", "id", "LPHD_1").unwrap();
		let phynam_do = lphd.find_by_attribute("DO", "name", "PhyNam").unwrap();
		assert_eq!(phynam_do.attribute("type"), Some(PHYNAM_TYPE_ID));
		// Valid references stay untouched.
		let health_do = lphd.find_by_attribute("DO", "name", "PhyHealth").unwrap();
		assert_eq!(health_do.attribute("type"), Some("SPS_Type"));
	}

	#[test]
	fn test_templates_deduplicate_first_seen() {
		let mut merger = SclMerger::new();
		merger.add_document(&capability("IED1", &[("Mod", Cdc::Spc)])).unwrap();
		merger.add_document(&capability("IED2", &[("Mod", Cdc::Spc)])).unwrap();
		let scd = merger.merge().unwrap();
		assert_eq!(scd.matches("id=\"SPC_Type\"").count(), 1);
		assert_eq!(scd.matches("id=\"LPHD_Type\"").count(), 1);
	}

	#[test]
	fn test_auto_assignment_counts_from_base() {
		let mut merger = SclMerger::new();
		merger.add_document(&capability("IED1", &[("Mod", Cdc::Spc)])).unwrap();
		merger.add_document(&capability("IED2", &[("TotW", Cdc::Mv)])).unwrap();
		merger.add_document(&capability("IED3", &[("Health", Cdc::Sps)])).unwrap();
		merger.set_network(HashMap::from([(
			"IED2".to_owned(),
			NetworkConfig::with_ip("10.1.1.2"),
		)]));
		merger.auto_assign_from("192.168.1.100");
		let scd = merger.merge().unwrap();

		assert!(scd.contains("192.168.1.100"));
		assert!(scd.contains("10.1.1.2"));
		assert!(scd.contains("192.168.1.102"));
	}

	#[test]
	fn test_merge_is_associative_on_ied_and_type_sets() {
		let a = capability("IED1", &[("Mod", Cdc::Spc)]);
		let b = capability("IED2", &[("TotW", Cdc::Mv)]);
		let c = capability("IED3", &[("Health", Cdc::Sps)]);

		let merge_two = |x: &str, y: &str| {
			let mut merger = SclMerger::new();
			merger.add_document(x).unwrap();
			merger.add_document(y).unwrap();
			merger.merge().unwrap()
		};
		let left = merge_two(&merge_two(&a, &b), &c);
		let right = merge_two(&a, &merge_two(&b, &c));

		let left = project(&left).unwrap();
		let right = project(&right).unwrap();
		let names = |station: &crate::model::StationModel| {
			station.ieds.iter().map(|ied| ied.name.clone()).collect::<Vec<_>>()
		};
		assert_eq!(names(&left), names(&right));
		assert_eq!(left.type_templates, right.type_templates);
	}

	#[test]
	fn test_rejects_documents_without_ied() {
		let mut merger = SclMerger::new();
		let result = merger.add_document("<SCL><Header id=\"x\"/></SCL>");
		assert!(matches!(result, Err(SclError::SclMalformed { .. })));
		assert!(merger.add_document("<notscl/>").is_err());
	}
}
