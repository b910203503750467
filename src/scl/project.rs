//! Station document projection.
//!
//! Parses an SCD back into the typed in-memory tree the address-space
//! builder consumes. The class of every data object instance is resolved
//! through `DataTypeTemplates`, never taken from the raw `DOI` attribute
//! alone: the templates are scanned once into a DOType-id → class map and an
//! LNodeType-id → (DO name → DOType id) map, and `DOI` entries without a
//! type attribute fall back through their node's `lnType`.

use std::collections::{BTreeMap, HashMap};

use snafu::ResultExt as _;

use crate::{
	model::{Cdc, DataObject, Ied, LogicalDevice, LogicalNode, StationModel},
	scl::{SclError, SclMalformed, SclParse},
};

/// Parse a station document into a [`StationModel`].
pub fn project(scd: &str) -> Result<StationModel, SclError> {
	let document = roxmltree::Document::parse(scd).context(SclParse)?;
	let root = document.root_element();
	if root.tag_name().name() != "SCL" {
		return SclMalformed { reason: format!("root element is {}", root.tag_name().name()) }
			.fail();
	}

	let templates = Templates::scan(root);
	let addresses = connected_ap_addresses(root);

	let mut ieds = Vec::new();
	for ied_node in children(root, "IED") {
		let Some(name) = ied_node.attribute("name") else {
			return SclMalformed { reason: "IED without a name" }.fail();
		};
		let mut ied = Ied {
			name: name.to_owned(),
			vendor: ied_node.attribute("manufacturer").unwrap_or_default().to_owned(),
			address: addresses.get(name).cloned(),
			logical_devices: Vec::new(),
		};

		for access_point in children(ied_node, "AccessPoint") {
			for server in children(access_point, "Server") {
				for ldevice in children(server, "LDevice") {
					ied.logical_devices.push(logical_device(ldevice, &templates));
				}
			}
		}
		ieds.push(ied);
	}

	Ok(StationModel { ieds, type_templates: templates.do_types })
}

/// The template maps, built in one scan.
struct Templates {
	/// DOType id to class.
	do_types: BTreeMap<String, Cdc>,
	/// LNodeType id to its DO-name → DOType-id table.
	ln_types: HashMap<String, HashMap<String, String>>,
}

impl Templates {
	/// Scan the `DataTypeTemplates` section of a document.
	fn scan(root: roxmltree::Node<'_, '_>) -> Self {
		let mut do_types = BTreeMap::new();
		let mut ln_types = HashMap::new();

		for templates in children(root, "DataTypeTemplates") {
			for do_type in children(templates, "DOType") {
				if let (Some(id), Some(cdc)) = (do_type.attribute("id"), do_type.attribute("cdc")) {
					do_types.insert(id.to_owned(), Cdc::from_name(cdc));
				}
			}
			for ln_type in children(templates, "LNodeType") {
				let Some(id) = ln_type.attribute("id") else { continue };
				let mut data_objects = HashMap::new();
				for data_object in children(ln_type, "DO") {
					if let (Some(name), Some(kind)) =
						(data_object.attribute("name"), data_object.attribute("type"))
					{
						data_objects.insert(name.to_owned(), kind.to_owned());
					}
				}
				ln_types.insert(id.to_owned(), data_objects);
			}
		}
		tracing::debug!(
			"Scanned {} DOTypes and {} LNodeTypes from templates",
			do_types.len(),
			ln_types.len()
		);
		Self { do_types, ln_types }
	}

	/// Resolve the class of one data object instance.
	fn resolve(&self, doi_type: Option<&str>, ln_type: Option<&str>, do_name: &str) -> Cdc {
		let type_id = doi_type.filter(|id| !id.is_empty()).map(str::to_owned).or_else(|| {
			let ln_type = ln_type?;
			self.ln_types.get(ln_type)?.get(do_name).cloned()
		});
		match type_id {
			Some(id) => self.do_types.get(&id).copied().unwrap_or(Cdc::Unknown),
			None => Cdc::Unknown,
		}
	}
}

/// One logical device subtree.
fn logical_device(node: roxmltree::Node<'_, '_>, templates: &Templates) -> LogicalDevice {
	let mut device = LogicalDevice {
		instance: node.attribute("inst").unwrap_or_default().to_owned(),
		logical_nodes: Vec::new(),
	};

	for child in node.children().filter(roxmltree::Node::is_element) {
		let logical_node = match child.tag_name().name() {
			"LN0" => LogicalNode {
				prefix: String::new(),
				class: "LLN0".to_owned(),
				instance: String::new(),
				data_objects: data_objects(child, templates),
			},
			"LN" => LogicalNode {
				prefix: child.attribute("prefix").unwrap_or_default().to_owned(),
				class: child.attribute("lnClass").unwrap_or_default().to_owned(),
				instance: child.attribute("inst").unwrap_or_default().to_owned(),
				data_objects: data_objects(child, templates),
			},
			_ => continue,
		};
		device.logical_nodes.push(logical_node);
	}
	device
}

/// The data object instances of one logical node.
fn data_objects(node: roxmltree::Node<'_, '_>, templates: &Templates) -> Vec<DataObject> {
	let ln_type = node.attribute("lnType");
	children(node, "DOI")
		.filter_map(|doi| {
			let name = doi.attribute("name")?;
			let cdc = templates.resolve(doi.attribute("type"), ln_type, name);
			Some(DataObject { name: name.to_owned(), cdc })
		})
		.collect()
}

/// The IP address of every connected access point, keyed by IED name.
fn connected_ap_addresses(root: roxmltree::Node<'_, '_>) -> HashMap<String, String> {
	let mut addresses = HashMap::new();
	for communication in children(root, "Communication") {
		for subnetwork in children(communication, "SubNetwork") {
			for access_point in children(subnetwork, "ConnectedAP") {
				let Some(ied_name) = access_point.attribute("iedName") else { continue };
				for address in children(access_point, "Address") {
					for p in children(address, "P") {
						if p.attribute("type") == Some("IP")
							&& let Some(ip) = p.text()
						{
							addresses.insert(ied_name.to_owned(), ip.trim().to_owned());
						}
					}
				}
			}
		}
	}
	addresses
}

/// The element children of a node with a given local name.
fn children<'a, 'input>(
	node: roxmltree::Node<'a, 'input>,
	name: &'static str,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
	node.children().filter(move |child| child.is_element() && child.tag_name().name() == name)
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		model::Ied,
		scl::{SclFormat, synthesize::SclSynthesizer},
	};

	fn sample_scd() -> &'static str {
		r#"<?xml version="1.0" encoding="UTF-8"?>
<SCL xmlns="http://www.iec.ch/61850/2003/SCL" version="2007" revision="B">
  <Header id="Generated_SCD"/>
  <Communication>
    <SubNetwork name="StationBus" type="8-MMS">
      <ConnectedAP iedName="IED1" apName="AP1">
        <Address>
          <P type="IP">192.168.1.100</P>
          <P type="IP-SUBNET">255.255.255.0</P>
        </Address>
      </ConnectedAP>
    </SubNetwork>
  </Communication>
  <IED name="IED1" manufacturer="ACME">
    <AccessPoint name="AP1">
      <Server>
        <LDevice inst="LD0">
          <LN0 lnClass="LLN0" inst="" lnType="LLN0_Type">
            <DOI name="Mod" type="SPC_Type"/>
            <DOI name="Health"/>
          </LN0>
          <LN prefix="My" lnClass="MMXU" inst="1" lnType="MMXU_Type">
            <DOI name="TotW" type="MV_Type"/>
            <DOI name="Strange" type="NoSuchType"/>
          </LN>
        </LDevice>
      </Server>
    </AccessPoint>
  </IED>
  <DataTypeTemplates>
    <LNodeType id="LLN0_Type" lnClass="LLN0">
      <DO name="Mod" type="SPC_Type"/>
      <DO name="Health" type="SPS_Type"/>
    </LNodeType>
    <DOType id="SPC_Type" cdc="SPC"/>
    <DOType id="SPS_Type" cdc="SPS"/>
    <DOType id="MV_Type" cdc="MV"/>
  </DataTypeTemplates>
</SCL>"#
	}

	#[test]
	fn test_projection_resolves_through_templates() {
		let station = project(sample_scd()).unwrap();
		assert_eq!(station.ieds.len(), 1);

		let ied = &station.ieds[0];
		assert_eq!(ied.name, "IED1");
		assert_eq!(ied.vendor, "ACME");
		assert_eq!(ied.address.as_deref(), Some("192.168.1.100"));

		let lln0 = &ied.logical_devices[0].logical_nodes[0];
		assert_eq!(lln0.class, "LLN0");
		assert_eq!(lln0.data_objects[0], DataObject { name: "Mod".to_owned(), cdc: Cdc::Spc });
		// No DOI type attribute: resolved through the LNodeType fallback.
		assert_eq!(lln0.data_objects[1], DataObject { name: "Health".to_owned(), cdc: Cdc::Sps });

		let mmxu = &ied.logical_devices[0].logical_nodes[1];
		assert_eq!(mmxu.prefix, "My");
		assert_eq!(mmxu.name(), "MyMMXU1");
		assert_eq!(mmxu.data_objects[0].cdc, Cdc::Mv);
		// A dangling type reference projects as Unknown, still present.
		assert_eq!(mmxu.data_objects[1].cdc, Cdc::Unknown);
	}

	#[test]
	fn test_template_table_is_extracted() {
		let station = project(sample_scd()).unwrap();
		assert_eq!(station.type_templates.get("SPC_Type"), Some(&Cdc::Spc));
		assert_eq!(station.type_templates.get("MV_Type"), Some(&Cdc::Mv));
		assert_eq!(station.type_templates.len(), 3);
	}

	#[test]
	fn test_malformed_documents_are_rejected() {
		assert!(matches!(project("<nope/>"), Err(SclError::SclMalformed { .. })));
		assert!(matches!(project("not xml at all"), Err(SclError::SclParse { .. })));
	}

	#[test]
	fn test_synthesize_project_round_trip() {
		use crate::model::{DataObject, LogicalDevice, LogicalNode};

		let ied = Ied {
			name: "IED7".to_owned(),
			vendor: String::new(),
			address: None,
			logical_devices: vec![LogicalDevice {
				instance: "CTRL".to_owned(),
				logical_nodes: vec![
					LogicalNode {
						prefix: String::new(),
						class: "LLN0".to_owned(),
						instance: String::new(),
						data_objects: vec![
							DataObject { name: "Mod".to_owned(), cdc: Cdc::Spc },
							DataObject { name: "Health".to_owned(), cdc: Cdc::Sps },
						],
					},
					LogicalNode {
						prefix: String::new(),
						class: "MMXU".to_owned(),
						instance: "1".to_owned(),
						data_objects: vec![DataObject { name: "TotW".to_owned(), cdc: Cdc::Mv }],
					},
				],
			}],
		};

		let xml = SclSynthesizer::new(&ied).synthesize(SclFormat::Icd, None).unwrap();
		let station = project(&xml).unwrap();
		assert_eq!(station.ieds.len(), 1);
		assert_eq!(station.ieds[0].name, ied.name);
		assert_eq!(station.ieds[0].logical_devices, ied.logical_devices);
	}
}
