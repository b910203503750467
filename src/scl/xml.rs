//! Owned XML element tree.
//!
//! The synthesizer and merger build documents, the merger also rewrites
//! pieces of documents it parsed, so both sides meet in one small owned
//! tree: parsing goes through `roxmltree`, serialization through
//! `quick-xml`. Namespace prefixes are not modelled; SCL uses a single
//! default namespace carried as a root attribute.

use quick_xml::{
	Writer,
	events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
};
use snafu::ResultExt as _;

use crate::scl::{SclError, SclParse};

/// One XML element: name, attributes in document order, children and
/// optional text content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
	/// The element name.
	pub name: String,
	/// Attributes in document order.
	pub attributes: Vec<(String, String)>,
	/// Child elements in document order.
	pub children: Vec<XmlElement>,
	/// Trimmed text content, if any.
	pub text: Option<String>,
}

impl XmlElement {
	/// Create an element without attributes or children.
	#[must_use]
	pub fn new(name: &str) -> Self {
		Self { name: name.to_owned(), attributes: Vec::new(), children: Vec::new(), text: None }
	}

	/// Builder-style attribute append.
	#[must_use]
	pub fn with_attr(mut self, name: &str, value: &str) -> Self {
		self.attributes.push((name.to_owned(), value.to_owned()));
		self
	}

	/// Builder-style text content.
	#[must_use]
	pub fn with_text(mut self, text: &str) -> Self {
		self.text = Some(text.to_owned());
		self
	}

	/// Builder-style child append.
	#[must_use]
	pub fn with_child(mut self, child: XmlElement) -> Self {
		self.children.push(child);
		self
	}

	/// Append a child element.
	pub fn push(&mut self, child: XmlElement) {
		self.children.push(child);
	}

	/// The value of an attribute.
	#[must_use]
	pub fn attribute(&self, name: &str) -> Option<&str> {
		self.attributes
			.iter()
			.find(|(attribute, _)| attribute == name)
			.map(|(_, value)| value.as_str())
	}

	/// Set or replace an attribute.
	pub fn set_attribute(&mut self, name: &str, value: &str) {
		match self.attributes.iter_mut().find(|(attribute, _)| attribute == name) {
			Some((_, slot)) => value.clone_into(slot),
			None => self.attributes.push((name.to_owned(), value.to_owned())),
		}
	}

	/// The first child with the given name.
	#[must_use]
	pub fn child(&self, name: &str) -> Option<&XmlElement> {
		self.children.iter().find(|child| child.name == name)
	}

	/// All children with the given name, in document order.
	pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
		self.children.iter().filter(move |child| child.name == name)
	}

	/// The first child with the given name and attribute value.
	#[must_use]
	pub fn find_by_attribute(&self, name: &str, attribute: &str, value: &str) -> Option<&XmlElement> {
		self.children_named(name).find(|child| child.attribute(attribute) == Some(value))
	}

	/// Parse a document into its root element.
	pub fn parse(xml: &str) -> Result<Self, SclError> {
		let document = roxmltree::Document::parse(xml).context(SclParse)?;
		Ok(Self::from_node(document.root_element()))
	}

	/// Convert a parsed node. Namespace declarations are dropped; element
	/// and attribute names keep their local part.
	fn from_node(node: roxmltree::Node<'_, '_>) -> Self {
		let mut element = Self::new(node.tag_name().name());
		for attribute in node.attributes() {
			element.attributes.push((attribute.name().to_owned(), attribute.value().to_owned()));
		}
		for child in node.children() {
			if child.is_element() {
				element.children.push(Self::from_node(child));
			} else if child.is_text()
				&& let Some(text) = child.text()
				&& !text.trim().is_empty()
			{
				element.text = Some(text.trim().to_owned());
			}
		}
		element
	}

	/// Serialize the element as a standalone document with an XML
	/// declaration and two-space indentation.
	pub fn to_document(&self) -> Result<String, SclError> {
		let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
		writer
			.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
			.map_err(|e| SclError::SclSerialize { reason: e.to_string() })?;
		self.write_into(&mut writer)?;
		String::from_utf8(writer.into_inner())
			.map_err(|e| SclError::SclSerialize { reason: e.to_string() })
	}

	/// Write this element and its subtree.
	fn write_into(&self, writer: &mut Writer<Vec<u8>>) -> Result<(), SclError> {
		let mut start = BytesStart::new(self.name.as_str());
		for (name, value) in &self.attributes {
			start.push_attribute((name.as_str(), value.as_str()));
		}

		if self.children.is_empty() && self.text.is_none() {
			return writer
				.write_event(Event::Empty(start))
				.map_err(|e| SclError::SclSerialize { reason: e.to_string() });
		}

		writer
			.write_event(Event::Start(start))
			.map_err(|e| SclError::SclSerialize { reason: e.to_string() })?;
		if let Some(text) = &self.text {
			writer
				.write_event(Event::Text(BytesText::new(text)))
				.map_err(|e| SclError::SclSerialize { reason: e.to_string() })?;
		}
		for child in &self.children {
			child.write_into(writer)?;
		}
		writer
			.write_event(Event::End(BytesEnd::new(self.name.as_str())))
			.map_err(|e| SclError::SclSerialize { reason: e.to_string() })
	}
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_serialize_round_trip() {
		let document = XmlElement::new("SCL")
			.with_attr("version", "2007")
			.with_child(
				XmlElement::new("Header").with_attr("id", "Test").with_attr("toolID", "a & b"),
			)
			.with_child(XmlElement::new("P").with_attr("type", "IP").with_text("192.168.1.10"));

		let xml = document.to_document().unwrap();
		assert!(xml.starts_with("<?xml"));
		let parsed = XmlElement::parse(&xml).unwrap();
		assert_eq!(parsed, document);
	}

	#[test]
	fn test_attribute_escaping() {
		let element = XmlElement::new("E").with_attr("d", "a<b>\"c\"&d");
		let xml = element.to_document().unwrap();
		let parsed = XmlElement::parse(&xml).unwrap();
		assert_eq!(parsed.attribute("d"), Some("a<b>\"c\"&d"));
	}

	#[test]
	fn test_lookup_helpers() {
		let parent = XmlElement::new("Templates")
			.with_child(XmlElement::new("DOType").with_attr("id", "SPS_Type"))
			.with_child(XmlElement::new("DOType").with_attr("id", "MV_Type"))
			.with_child(XmlElement::new("LNodeType").with_attr("id", "LPHD_Type"));

		assert_eq!(parent.children_named("DOType").count(), 2);
		assert!(parent.find_by_attribute("DOType", "id", "MV_Type").is_some());
		assert!(parent.find_by_attribute("DOType", "id", "LPHD_Type").is_none());
		assert_eq!(parent.child("LNodeType").and_then(|c| c.attribute("id")), Some("LPHD_Type"));
	}

	#[test]
	fn test_set_attribute_replaces() {
		let mut element = XmlElement::new("DO").with_attr("type", "old");
		element.set_attribute("type", "new");
		element.set_attribute("name", "PhyNam");
		assert_eq!(element.attribute("type"), Some("new"));
		assert_eq!(element.attribute("name"), Some("PhyNam"));
	}

	#[test]
	fn test_parse_rejects_garbage() {
		assert!(XmlElement::parse("<SCL><unclosed></SCL>").is_err());
	}
}
