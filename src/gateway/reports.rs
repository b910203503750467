//! Report routing.
//!
//! The router owns the path from an IED's unsolicited reports to the
//! address space: it drains each session's report queue, and it turns
//! subscription requests into report-control-block activations. Requests
//! are detached onto a short-lived task so callers return immediately;
//! activation failures are logged, never surfaced.

use std::sync::Arc;

use async_trait::async_trait;
use snafu::OptionExt as _;
use tokio::task::JoinHandle;

use crate::{
	mms::{
		NotConnected, SessionError,
		registry::SessionRegistry,
		session::{DatasetUpdate, MmsSession, RcbRef, ReportSink},
	},
	ua::space::GatewaySpace,
};

/// An opaque handle on one subscription, returned to the caller
/// immediately. It doubles as the report-control-block reference.
pub type SubscriptionId = String;

/// The sink that lands dataset updates in the address space, in dataset
/// order.
struct SpaceSink {
	/// The projected space.
	space: Arc<GatewaySpace>,
}

#[async_trait]
impl ReportSink for SpaceSink {
	async fn on_dataset_update(&self, update: DatasetUpdate) {
		tracing::debug!(
			"Report {} from {} carries {} values",
			update.report_id,
			update.rcb,
			update.values.len()
		);
		for (reference, value) in &update.values {
			self.space.update(&reference.to_string(), value);
		}
	}
}

/// Establishes report subscriptions and fans dataset updates out to the
/// address space.
#[derive(Debug)]
pub struct ReportRouter {
	/// Where sessions are looked up.
	registry: Arc<SessionRegistry>,
	/// The projected space updates land in.
	space: Arc<GatewaySpace>,
}

impl ReportRouter {
	/// Create a router over the registry and the projected space.
	#[must_use]
	pub const fn new(registry: Arc<SessionRegistry>, space: Arc<GatewaySpace>) -> Self {
		Self { registry, space }
	}

	/// Drain a freshly connected session's report queue until the
	/// connection goes away. Attaching twice is harmless; the queue can
	/// only be taken once per connection.
	pub fn attach(&self, session: Arc<MmsSession>) -> Option<JoinHandle<()>> {
		let mut reports = session.take_report_stream()?;
		Some(tokio::spawn(async move {
			while let Some(report) = reports.recv().await {
				session.dispatch_report(report).await;
			}
			tracing::debug!("Report queue of {} closed", session.name());
		}))
	}

	/// Request a subscription on a report control block. The activation is
	/// queued on a detached task and the id returns immediately; an
	/// activation failure is logged and the block stays unsubscribed.
	pub fn subscribe(&self, ied: &str, rcb: RcbRef) -> Result<SubscriptionId, SessionError> {
		let session = self.registry.get(ied).with_context(|| NotConnected { ied })?;
		if !session.is_connected() {
			return NotConnected { ied }.fail();
		}

		let id = rcb.to_string();
		let sink = Arc::new(SpaceSink { space: Arc::clone(&self.space) });
		tokio::spawn(async move {
			if let Err(e) = session.subscribe_report(&rcb, sink).await {
				tracing::error!("Subscription to {rcb} failed: {e}");
			}
		});
		tracing::info!("Subscription initiated for {id} on {ied}");
		Ok(id)
	}

	/// Tear down a subscription.
	pub async fn unsubscribe(&self, ied: &str, id: &SubscriptionId) -> Result<(), SessionError> {
		let session = self.registry.get(ied).with_context(|| NotConnected { ied })?;
		let rcb = parse_subscription_id(id)?;
		session.unsubscribe_report(&rcb).await
	}
}

/// Recover the block reference from a subscription id.
fn parse_subscription_id(id: &str) -> Result<RcbRef, SessionError> {
	let Some((ld, block)) = id.split_once('/') else {
		return crate::mms::InvalidReference { reference: id }.fail();
	};
	Ok(RcbRef { ld: ld.to_owned(), block: block.to_owned() })
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_subscription_id_round_trip() {
		let rcb = RcbRef { ld: "LD0".to_owned(), block: "LLN0$BR$brcbA01".to_owned() };
		let id: SubscriptionId = rcb.to_string();
		assert_eq!(parse_subscription_id(&id).unwrap(), rcb);
		assert!(parse_subscription_id("nonsense").is_err());
	}
}
