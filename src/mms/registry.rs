//! Session registry.
//!
//! A keyed pool of shared [`MmsSession`] handles. The registry mutex covers
//! only the map; handles are cloned out before any session operation runs,
//! so a slow connect or read never blocks a lookup.

use std::{
	collections::HashMap,
	sync::{Arc, Mutex},
};

use crate::mms::session::{MmsSession, SessionConfig};

/// The pool of per-IED sessions, keyed by IED name.
///
/// Creating an entry does not connect it; connection is explicit and so is
/// reconnection after a transport failure.
#[derive(Debug, Default)]
pub struct SessionRegistry {
	/// The session map. Held only across map operations.
	sessions: Mutex<HashMap<String, Arc<MmsSession>>>,
}

impl SessionRegistry {
	/// Create an empty registry.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Return the session for an IED, creating it if absent. The endpoint of
	/// an existing session is left untouched.
	pub fn ensure(&self, name: &str, config: SessionConfig) -> Arc<MmsSession> {
		let mut sessions = self.sessions.lock().unwrap_or_else(|poison| poison.into_inner());
		Arc::clone(
			sessions
				.entry(name.to_owned())
				.or_insert_with(|| Arc::new(MmsSession::new(name, config))),
		)
	}

	/// Look up a session by IED name.
	#[must_use]
	pub fn get(&self, name: &str) -> Option<Arc<MmsSession>> {
		let sessions = self.sessions.lock().unwrap_or_else(|poison| poison.into_inner());
		sessions.get(name).cloned()
	}

	/// The names of all registered IEDs, sorted.
	#[must_use]
	pub fn names(&self) -> Vec<String> {
		let sessions = self.sessions.lock().unwrap_or_else(|poison| poison.into_inner());
		let mut names: Vec<String> = sessions.keys().cloned().collect();
		names.sort();
		names
	}

	/// Disconnect and drop the session of an IED, if present.
	pub async fn remove(&self, name: &str) {
		let session = {
			let mut sessions = self.sessions.lock().unwrap_or_else(|poison| poison.into_inner());
			sessions.remove(name)
		};
		if let Some(session) = session {
			session.disconnect().await;
			tracing::info!("Removed MMS session {name}");
		}
	}

	/// Disconnect every session. The map is kept so sessions can be
	/// reconnected by name.
	pub async fn disconnect_all(&self) {
		let sessions: Vec<Arc<MmsSession>> = {
			let sessions = self.sessions.lock().unwrap_or_else(|poison| poison.into_inner());
			sessions.values().cloned().collect()
		};
		for session in sessions {
			session.disconnect().await;
		}
	}
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
	use super::*;

	fn endpoint() -> SessionConfig {
		SessionConfig { address: "192.0.2.1".to_owned(), port: 102 }
	}

	#[test]
	fn test_ensure_is_create_or_return() {
		let registry = SessionRegistry::new();
		let first = registry.ensure("IED1", endpoint());
		let second = registry.ensure("IED1", endpoint());
		assert!(Arc::ptr_eq(&first, &second));
		assert_eq!(registry.names(), vec!["IED1".to_owned()]);
	}

	#[test]
	fn test_creation_does_not_connect() {
		let registry = SessionRegistry::new();
		let session = registry.ensure("IED1", endpoint());
		assert!(!session.is_connected());
		assert!(registry.get("IED1").is_some());
		assert!(registry.get("IED2").is_none());
	}

	#[tokio::test]
	async fn test_remove_drops_the_entry() {
		let registry = SessionRegistry::new();
		registry.ensure("IED1", endpoint());
		registry.remove("IED1").await;
		assert!(registry.get("IED1").is_none());
		registry.remove("IED1").await;
	}
}
