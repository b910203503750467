//! The write dispatcher.
//!
//! Client writes on controllable nodes are queued by the address-space
//! write handlers and consumed here, off the server thread. The value type
//! picks the path back to the device: booleans become control operations
//! with select-before-operate where the model demands it, floats become
//! analogue setpoint writes, 32-bit integers become status writes, and
//! everything else is rejected. The dispatcher never retries; a failed
//! write is the client's problem.

use std::sync::{
	Arc,
	atomic::{AtomicBool, Ordering},
};

use iec61850::iec61850::data::Iec61850Data;
use opcua::types::Variant;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
	mms::{
		Fc, NotConnected, ObjectReference, SessionError, Unsupported,
		control::{ControlChecks, Originator, coerce_bool_ctl_val},
		registry::SessionRegistry,
		session::MmsSession,
	},
	ua::{WriteRequest, space::GatewaySpace},
};

/// A routed write command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WriteCommand {
	/// A boolean command: run the control service against the data object.
	Control(bool),
	/// An analogue setpoint: write the magnitude under `MX`.
	Setpoint(f32),
	/// An integer status: write `stVal` under `ST`.
	IntegerStatus(i32),
}

/// Map an OPC UA value onto its write path. Types without a routing rule
/// yield `None` and the write is rejected.
#[must_use]
pub fn route_value(value: &Variant) -> Option<WriteCommand> {
	match value {
		Variant::Boolean(value) => Some(WriteCommand::Control(*value)),
		Variant::Float(value) => Some(WriteCommand::Setpoint(*value)),
		Variant::Int32(value) => Some(WriteCommand::IntegerStatus(*value)),
		_ => None,
	}
}

/// Execute one routed command on a session.
pub async fn execute(
	session: &MmsSession,
	reference: &ObjectReference,
	command: WriteCommand,
	origin: &Originator,
	checks: ControlChecks,
) -> Result<(), SessionError> {
	match command {
		WriteCommand::Control(value) => {
			let declared = session.ctl_val_type(reference).await?;
			let ctl_val = coerce_bool_ctl_val(declared.as_deref(), value);
			tracing::info!("Control {reference} <- {value} (ctlVal as {declared:?})");
			session.control(reference, ctl_val, origin, checks).await
		}
		WriteCommand::Setpoint(value) => {
			let target = reference.with_suffix("mag.f");
			tracing::info!("Write {target} <- {value}");
			session.write(&target, Fc::Mx, Iec61850Data::FloatingPoint(value)).await
		}
		WriteCommand::IntegerStatus(value) => {
			let target = reference.with_suffix("stVal");
			tracing::info!("Write {target} <- {value}");
			session.write(&target, Fc::St, Iec61850Data::Integer(value)).await
		}
	}
}

/// The consumer of the client-write queue.
#[derive(Debug)]
pub struct WriteDispatcher {
	/// Where sessions are looked up.
	registry: Arc<SessionRegistry>,
	/// Used for the reverse node → reference lookup.
	space: Arc<GatewaySpace>,
	/// The originator attached to control operations.
	origin: Originator,
	/// The condition flags attached to control operations.
	checks: ControlChecks,
	/// Cleared on shutdown.
	running: Arc<AtomicBool>,
}

impl WriteDispatcher {
	/// Create a dispatcher.
	#[must_use]
	pub const fn new(
		registry: Arc<SessionRegistry>,
		space: Arc<GatewaySpace>,
		origin: Originator,
		checks: ControlChecks,
		running: Arc<AtomicBool>,
	) -> Self {
		Self { registry, space, origin, checks, running }
	}

	/// Consume the write queue until it closes or the running flag clears.
	/// Failures are logged and the loop continues.
	pub fn spawn(self, mut writes: mpsc::UnboundedReceiver<WriteRequest>) -> JoinHandle<()> {
		tokio::spawn(async move {
			while let Some(request) = writes.recv().await {
				if !self.running.load(Ordering::Acquire) {
					break;
				}
				if let Err(e) = self.handle(request).await {
					tracing::warn!("Write failed: {e}");
				}
			}
			tracing::info!("Write dispatcher stopped");
		})
	}

	/// Resolve and execute one queued write.
	async fn handle(&self, request: WriteRequest) -> Result<(), SessionError> {
		let Some(reference) = self.space.bindings().reference_of(&request.node) else {
			tracing::warn!("No bound reference for node {}", request.node);
			return Ok(());
		};
		let reference = ObjectReference::parse(&reference)?;

		let Some(command) = route_value(&request.value) else {
			return Unsupported {
				reason: format!("no write routing for {:?} on {reference}", request.value),
			}
			.fail();
		};

		let session = self
			.registry
			.get(reference.ied())
			.ok_or_else(|| NotConnected { ied: reference.ied() }.build())?;
		execute(&session, &reference, command, &self.origin, self.checks).await
	}
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_value_routing() {
		assert_eq!(route_value(&Variant::Boolean(true)), Some(WriteCommand::Control(true)));
		assert_eq!(route_value(&Variant::Float(42.5)), Some(WriteCommand::Setpoint(42.5)));
		assert_eq!(route_value(&Variant::Int32(7)), Some(WriteCommand::IntegerStatus(7)));
		// No routing rule: rejected as unsupported.
		assert_eq!(route_value(&Variant::Double(1.0)), None);
		assert_eq!(route_value(&Variant::UInt32(1)), None);
		assert_eq!(route_value(&Variant::Empty), None);
	}

	#[tokio::test]
	async fn test_execute_needs_a_connected_session() {
		use crate::mms::session::SessionConfig;

		let session = MmsSession::new(
			"IED1",
			SessionConfig { address: "192.0.2.9".to_owned(), port: 102 },
		);
		let reference = ObjectReference::parse("IED1/LD0/MMXU1.TotW").unwrap();
		let result = execute(
			&session,
			&reference,
			WriteCommand::Setpoint(1.0),
			&Originator::default(),
			ControlChecks::default(),
		)
		.await;
		assert!(matches!(result, Err(SessionError::NotConnected { .. })));
	}
}
