//! OPC UA server side.
//!
//! A thin wrapper around the `opcua` server crate plus the address-space
//! projector that materializes the merged station model as nodes and keeps
//! the bidirectional binding table between canonical references and node
//! identifiers.

use opcua::types::{NodeId, Variant};
use snafu::Snafu;

pub mod server;
pub mod space;

pub use server::{SharedAddressSpace, UaServer, UaServerConfig};
pub use space::{BindingEntry, BindingTable, GatewaySpace};

/// The namespace URI registered for gateway nodes. With the two stock
/// server namespaces in front of it, it lands at index 2.
pub const GATEWAY_NAMESPACE_URI: &str = "urn:iec61850-gateway";

/// One write received from an OPC UA client, queued for the dispatcher.
#[derive(Debug, Clone)]
pub struct WriteRequest {
	/// The written node.
	pub node: NodeId,
	/// The written value.
	pub value: Variant,
}

/// The error type for the OPC UA side.
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum UaError {
	#[snafu(display("Failed to build the OPC UA server"))]
	ServerBuild,
	#[snafu(display("Failed to register the gateway namespace"))]
	NamespaceRegistration,
	#[snafu(display("Failed to create node {}", node))]
	NodeCreation { node: String },
	#[snafu(display("Duplicate binding for {}", reference))]
	DuplicateBinding { reference: String },
}
