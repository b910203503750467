//! OPC UA server wrapper.
//!
//! Everything that touches the `opcua` crate's server API is confined to
//! this module: building the server, registering the gateway namespace,
//! creating nodes and writing values. The rest of the crate only sees
//! [`SharedAddressSpace`] and plain `NodeId`/`Variant` values.

use std::sync::Arc;

use opcua::server::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::ua::{GATEWAY_NAMESPACE_URI, NamespaceRegistration, ServerBuild, UaError, WriteRequest};

/// Endpoint configuration of the embedded OPC UA server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UaServerConfig {
	/// The application name announced by the server.
	#[serde(default = "default_application_name")]
	pub application_name: String,
	/// The host the server binds to.
	#[serde(default = "default_host")]
	pub host: String,
	/// The port the server listens on.
	#[serde(default = "default_port")]
	pub port: u16,
}

/// The default announced application name.
fn default_application_name() -> String {
	"iec61850-gateway".to_owned()
}

/// The default bind host.
fn default_host() -> String {
	"0.0.0.0".to_owned()
}

/// The default OPC UA port.
const fn default_port() -> u16 {
	4840
}

impl Default for UaServerConfig {
	fn default() -> Self {
		Self {
			application_name: default_application_name(),
			host: default_host(),
			port: default_port(),
		}
	}
}

/// The embedded OPC UA server. Running it consumes the value; keep a
/// [`SharedAddressSpace`] clone around for node management while the server
/// loop owns the rest.
pub struct UaServer {
	/// The library server.
	server: Server,
	/// The shared address space handle.
	space: SharedAddressSpace,
}

impl std::fmt::Debug for UaServer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("UaServer").field("namespace", &self.space.namespace).finish_non_exhaustive()
	}
}

impl UaServer {
	/// Build the server with an anonymous endpoint and register the gateway
	/// namespace.
	pub fn new(config: &UaServerConfig) -> Result<Self, UaError> {
		let server = ServerBuilder::new_anonymous(&config.application_name)
			.application_uri(GATEWAY_NAMESPACE_URI)
			.host_and_port(&config.host, config.port)
			.server()
			.ok_or_else(|| ServerBuild.build())?;

		let address_space = server.address_space();
		let namespace = {
			let mut space = address_space.write();
			space.register_namespace(GATEWAY_NAMESPACE_URI).map_err(|()| NamespaceRegistration.build())?
		};
		tracing::info!(
			"OPC UA server listening on {}:{} (gateway namespace index {namespace})",
			config.host,
			config.port
		);

		Ok(Self { server, space: SharedAddressSpace { inner: address_space, namespace } })
	}

	/// A handle for node management, independent of the server loop.
	#[must_use]
	pub fn space(&self) -> SharedAddressSpace {
		self.space.clone()
	}

	/// Run the server loop on the current thread until shutdown.
	pub fn run_blocking(self) {
		self.server.run();
	}
}

/// A cloneable handle on the server's address space, pinned to the gateway
/// namespace. Value writes go through the library, which serializes them
/// internally; node creation takes the space write lock.
#[derive(Clone)]
pub struct SharedAddressSpace {
	/// The library address space.
	inner: Arc<opcua::sync::RwLock<AddressSpace>>,
	/// The registered gateway namespace index.
	namespace: u16,
}

impl std::fmt::Debug for SharedAddressSpace {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SharedAddressSpace").field("namespace", &self.namespace).finish_non_exhaustive()
	}
}

impl SharedAddressSpace {
	/// The gateway namespace index.
	#[must_use]
	pub const fn namespace(&self) -> u16 {
		self.namespace
	}

	/// A string node id in the gateway namespace.
	#[must_use]
	pub fn node_id(&self, id: &str) -> NodeId {
		NodeId::new(self.namespace, id)
	}

	/// The objects folder every IED object hangs off.
	#[must_use]
	pub fn objects_folder(&self) -> NodeId {
		ObjectId::ObjectsFolder.into()
	}

	/// Create an object node organized under a parent.
	pub fn add_object(
		&self,
		id: &str,
		browse_name: &str,
		display_name: &str,
		description: &str,
		parent: &NodeId,
	) -> Result<NodeId, UaError> {
		let node_id = self.node_id(id);
		let mut space = self.inner.write();
		let created = ObjectBuilder::new(&node_id, browse_name, display_name)
			.description(description)
			.organized_by(parent.clone())
			.insert(&mut space);
		if created {
			Ok(node_id)
		} else {
			crate::ua::NodeCreation { node: id }.fail()
		}
	}

	/// Create a variable node under a parent. When a write queue is given
	/// the variable is writable and every client write is forwarded to it.
	pub fn add_variable(
		&self,
		id: &str,
		browse_name: &str,
		display_name: &str,
		description: &str,
		parent: &NodeId,
		data_type: DataTypeId,
		initial: Variant,
		writes: Option<mpsc::UnboundedSender<WriteRequest>>,
	) -> Result<NodeId, UaError> {
		let node_id = self.node_id(id);
		let mut space = self.inner.write();

		let mut builder = VariableBuilder::new(&node_id, browse_name, display_name)
			.description(description)
			.data_type(data_type)
			.value(initial)
			.component_of(parent.clone());

		if let Some(writes) = writes {
			let setter_node = node_id.clone();
			let setter = AttrFnSetter::new(move |_node_id, _attribute_id, _index_range, value| {
				if let Some(variant) = value.value.clone() {
					let request = WriteRequest { node: setter_node.clone(), value: variant };
					if writes.send(request).is_err() {
						tracing::warn!("Write on {setter_node} dropped, dispatcher is gone");
					}
				}
				Ok(())
			});
			builder = builder
				.writable()
				.value_setter(Arc::new(opcua::sync::Mutex::new(setter)));
		}

		if builder.insert(&mut space) {
			Ok(node_id)
		} else {
			crate::ua::NodeCreation { node: id }.fail()
		}
	}

	/// Write a value to a variable node, stamping it with the current time.
	pub fn write_value(&self, node: &NodeId, value: Variant) -> bool {
		let now = DateTime::now();
		let mut space = self.inner.write();
		space.set_variable_value(node.clone(), value, &now, &now)
	}
}
