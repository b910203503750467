//! The polling loop.
//!
//! One cooperative loop keeps every bound node fresh: each tick snapshots
//! the binding table, groups references by IED and, for every IED with a
//! connected session, refreshes each bound data object with a fixed probe
//! sequence. Probes on one IED run sequentially on its session; the loop
//! itself is sequential across IEDs as well. Errors never escape a tick.

use std::sync::{
	Arc,
	atomic::{AtomicBool, Ordering},
};

use iec61850::iec61850::data::Iec61850Data;
use tokio::task::JoinHandle;

use crate::{
	mms::{Fc, ObjectReference, SessionError, registry::SessionRegistry, session::MmsSession},
	ua::space::GatewaySpace,
};

/// What the status probe decided about a `.stVal` read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusProbe {
	/// The value is a plain status scalar; bind it as-is.
	Use,
	/// The value is not a status scalar; leave the node untouched and try
	/// the measurand attribute instead.
	TryMagnitude,
}

/// Classify a `.stVal` read result.
const fn classify_status(value: &Iec61850Data) -> StatusProbe {
	match value {
		Iec61850Data::Bool(_)
		| Iec61850Data::Integer(_)
		| Iec61850Data::Unsigned(_)
		| Iec61850Data::BitString(_) => StatusProbe::Use,
		_ => StatusProbe::TryMagnitude,
	}
}

/// The periodic scanner over the binding table.
#[derive(Debug)]
pub struct Poller {
	/// Where sessions are looked up each tick.
	registry: Arc<SessionRegistry>,
	/// The projected space the fresh values land in.
	space: Arc<GatewaySpace>,
	/// The tick period.
	interval: std::time::Duration,
	/// Cleared to make the next tick the last.
	running: Arc<AtomicBool>,
}

impl Poller {
	/// Create a poller with the given tick period in milliseconds.
	#[must_use]
	pub fn new(
		registry: Arc<SessionRegistry>,
		space: Arc<GatewaySpace>,
		update_interval_ms: u64,
		running: Arc<AtomicBool>,
	) -> Self {
		Self {
			registry,
			space,
			interval: std::time::Duration::from_millis(update_interval_ms.max(1)),
			running,
		}
	}

	/// Run the loop until the running flag clears.
	pub fn spawn(self) -> JoinHandle<()> {
		tokio::spawn(async move {
			tracing::info!("Starting data polling loop (interval: {:?})", self.interval);
			loop {
				tokio::time::sleep(self.interval).await;
				if !self.running.load(Ordering::Acquire) {
					break;
				}
				self.tick().await;
			}
			tracing::info!("Polling loop stopped");
		})
	}

	/// One full scan over the binding table.
	pub async fn tick(&self) {
		let references = self.space.bindings().references();
		if references.is_empty() {
			return;
		}

		// Group by IED; the snapshot is already sorted, so groups keep a
		// stable order.
		let mut by_ied: Vec<(String, Vec<ObjectReference>)> = Vec::new();
		for reference in &references {
			let Ok(parsed) = ObjectReference::parse(reference) else { continue };
			let starts_new_group =
				by_ied.last().is_none_or(|(ied, _)| ied != parsed.ied());
			if starts_new_group {
				by_ied.push((parsed.ied().to_owned(), Vec::new()));
			}
			if let Some((_, group)) = by_ied.last_mut() {
				group.push(parsed);
			}
		}

		for (ied, group) in by_ied {
			let Some(session) = self.registry.get(&ied) else { continue };
			if !session.is_connected() {
				continue;
			}
			tracing::debug!("Polling {} references on {ied}", group.len());

			for reference in group {
				match probe(&session, &reference).await {
					Ok((attribute, value)) => {
						self.space.update(&reference.to_string(), &value);
						tracing::trace!("Read {attribute} for {reference}");
					}
					Err(e) => {
						tracing::warn!("Failed to refresh {reference}: {e}");
					}
				}
			}
		}
	}
}

/// Refresh one data object: `.stVal` under `ST` first, the measurand
/// magnitude under `MX` when the status shape does not fit, the bare data
/// object as a last resort. A non-scalar `.stVal` is discarded without
/// touching the node's current value.
async fn probe(
	session: &MmsSession,
	reference: &ObjectReference,
) -> Result<(&'static str, Iec61850Data), SessionError> {
	match session.read(&reference.with_suffix("stVal"), Fc::St).await {
		Ok(value) => match classify_status(&value) {
			StatusProbe::Use => return Ok(("stVal", value)),
			StatusProbe::TryMagnitude => {
				drop(value);
			}
		},
		Err(SessionError::ObjectDoesNotExist { .. }) => {}
		Err(e) => return Err(e),
	}

	match session.read(&reference.with_suffix("mag.f"), Fc::Mx).await {
		Ok(value) => return Ok(("mag.f", value)),
		Err(SessionError::ObjectDoesNotExist { .. }) => {}
		Err(e) => return Err(e),
	}

	session.read(reference, Fc::St).await.map(|value| ("value", value))
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
	use iec61850::iec61850::data::Bitstring;

	use super::*;

	#[test]
	fn test_status_scalars_are_used_directly() {
		assert_eq!(classify_status(&Iec61850Data::Bool(true)), StatusProbe::Use);
		assert_eq!(classify_status(&Iec61850Data::Integer(2)), StatusProbe::Use);
		assert_eq!(classify_status(&Iec61850Data::Unsigned(1)), StatusProbe::Use);
		assert_eq!(
			classify_status(&Iec61850Data::BitString(Bitstring {
				bytes: vec![0b01],
				padding: 6
			})),
			StatusProbe::Use
		);
	}

	#[test]
	fn test_non_scalars_fall_through_to_magnitude() {
		assert_eq!(
			classify_status(&Iec61850Data::FloatingPoint(1.0)),
			StatusProbe::TryMagnitude
		);
		assert_eq!(
			classify_status(&Iec61850Data::String("x".to_owned())),
			StatusProbe::TryMagnitude
		);
		assert_eq!(
			classify_status(&Iec61850Data::Structure(Vec::new())),
			StatusProbe::TryMagnitude
		);
	}
}
