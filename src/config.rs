//! Gateway configuration.
//!
//! Read-only input, deserialized once at startup. Nothing here is persisted
//! back; a restart re-reads the file and rebuilds the address space.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt as _, Snafu};

use crate::{
	mms::{
		control::{ControlChecks, Originator},
		session::SessionConfig,
	},
	scl::merge::{DEFAULT_AUTO_ASSIGN_BASE, NetworkConfig},
	ua::server::UaServerConfig,
};

/// One configured IED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IedConfig {
	/// The IED name, also the key in the session registry.
	pub name: String,
	/// The IP address or host name.
	pub ip: String,
	/// The MMS port.
	#[serde(default = "default_mms_port")]
	pub port: u16,
	/// Disabled IEDs are kept in the configuration but never connected.
	#[serde(default = "default_enabled")]
	pub enabled: bool,
	/// Station-document network parameters, derived from the endpoint when
	/// absent.
	#[serde(default)]
	pub network: Option<NetworkConfig>,
}

/// The default MMS port.
const fn default_mms_port() -> u16 {
	102
}

/// IEDs are enabled unless the configuration says otherwise.
const fn default_enabled() -> bool {
	true
}

impl IedConfig {
	/// The session endpoint of this IED.
	#[must_use]
	pub fn endpoint(&self) -> SessionConfig {
		SessionConfig { address: self.ip.clone(), port: self.port }
	}

	/// The network parameters used in the station document.
	#[must_use]
	pub fn network_config(&self) -> NetworkConfig {
		self.network.clone().unwrap_or_else(|| {
			let mut config = NetworkConfig::with_ip(&self.ip);
			config.mms_port = Some(self.port);
			config
		})
	}
}

/// The whole gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
	/// The embedded OPC UA server endpoint.
	#[serde(default)]
	pub opcua: UaServerConfig,
	/// The polling period in milliseconds.
	#[serde(default = "default_update_interval_ms")]
	pub update_interval_ms: u64,
	/// The IEDs to bridge.
	#[serde(default)]
	pub ieds: Vec<IedConfig>,
	/// The originator attached to control operations.
	#[serde(default)]
	pub originator: Originator,
	/// The interlock and synchrocheck flags attached to control
	/// operations.
	#[serde(default)]
	pub checks: ControlChecks,
	/// Assign station-bus addresses to IEDs without network parameters.
	#[serde(default)]
	pub auto_assign_addresses: bool,
	/// The base address auto-assignment counts from.
	#[serde(default = "default_auto_assign_base")]
	pub auto_assign_base: String,
	/// Emit a substation section in the station document.
	#[serde(default)]
	pub include_substation: bool,
}

/// The default polling period.
const fn default_update_interval_ms() -> u64 {
	1000
}

/// The default auto-assignment base address.
fn default_auto_assign_base() -> String {
	DEFAULT_AUTO_ASSIGN_BASE.to_owned()
}

impl Default for GatewayConfig {
	fn default() -> Self {
		Self {
			opcua: UaServerConfig::default(),
			update_interval_ms: default_update_interval_ms(),
			ieds: Vec::new(),
			originator: Originator::default(),
			checks: ControlChecks::default(),
			auto_assign_addresses: false,
			auto_assign_base: default_auto_assign_base(),
			include_substation: false,
		}
	}
}

impl GatewayConfig {
	/// Parse a configuration document.
	pub fn from_json(json: &str) -> Result<Self, ConfigError> {
		serde_json::from_str(json).context(ParseConfig)
	}

	/// Load a configuration file.
	pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
		let json = std::fs::read_to_string(path)
			.with_context(|_| ReadConfig { path: path.display().to_string() })?;
		Self::from_json(&json)
	}

	/// The configuration of one IED.
	#[must_use]
	pub fn ied(&self, name: &str) -> Option<&IedConfig> {
		self.ieds.iter().find(|ied| ied.name == name)
	}

	/// The per-IED network table handed to the station merger.
	#[must_use]
	pub fn network_table(&self) -> HashMap<String, NetworkConfig> {
		self.ieds.iter().map(|ied| (ied.name.clone(), ied.network_config())).collect()
	}
}

/// The error type for configuration loading.
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum ConfigError {
	#[snafu(display("Failed to read configuration file {}", path))]
	ReadConfig { path: String, source: std::io::Error },
	#[snafu(display("Failed to parse configuration"))]
	ParseConfig { source: serde_json::Error },
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_minimal_config() {
		let config = GatewayConfig::from_json(
			r#"{
				"ieds": [
					{ "name": "IED1", "ip": "192.168.1.10" },
					{ "name": "IED2", "ip": "192.168.1.11", "port": 10102, "enabled": false }
				]
			}"#,
		)
		.unwrap();

		assert_eq!(config.update_interval_ms, 1000);
		assert_eq!(config.opcua.port, 4840);
		assert_eq!(config.ieds.len(), 2);
		assert_eq!(config.ied("IED1").unwrap().port, 102);
		assert!(!config.ied("IED2").unwrap().enabled);
		assert!(config.ied("IED3").is_none());

		let network = config.network_table();
		assert_eq!(network.get("IED2").unwrap().ip, "192.168.1.11");
		assert_eq!(network.get("IED2").unwrap().mms_port, Some(10102));
	}

	#[test]
	fn test_bad_config_is_rejected() {
		assert!(matches!(
			GatewayConfig::from_json("{ \"ieds\": 5 }"),
			Err(ConfigError::ParseConfig { .. })
		));
	}
}
