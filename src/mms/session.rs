//! Per-IED MMS session.
//!
//! An [`MmsSession`] owns one client connection to one IED and serializes
//! every request on it: a single async mutex covers the library handle, so
//! request order on a session is the order callers acquire the lock. The
//! connection-wide report callback installed at connect time never touches
//! session state; it posts each report to an unbounded queue that the report
//! router drains.
//!
//! Transport errors do not clear the connection flag and do not reconnect;
//! reconnection policy belongs to the registry's caller.

use std::{
	collections::HashMap,
	sync::{
		Arc, Mutex as StdMutex,
		atomic::{AtomicBool, Ordering},
	},
};

use async_trait::async_trait;
use iec61850::{
	ClientConfig, Iec61850Client,
	iec61850::{
		ObjectPath,
		data::{Bitstring, Iec61850Data},
		model::Node,
		rcb::{ReportControlBlock, TriggerOptions},
		report::Report,
	},
	mms::ReportCallback,
};
use serde::{Deserialize, Serialize};
use snafu::OptionExt as _;
use tokio::sync::{Mutex, mpsc};
use tracing::instrument;

use crate::mms::{
	Fc, NotConnected, ObjectReference, SessionError,
	control::{ControlChecks, ControlObject, Originator},
};

/// The integrity period requested when enabling a report control block, in
/// milliseconds.
const REPORT_INTEGRITY_PERIOD_MS: u32 = 5000;

/// Endpoint of one IED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
	/// The IP address or host name of the IED.
	pub address: String,
	/// The MMS port of the IED.
	#[serde(default = "default_mms_port")]
	pub port: u16,
}

/// The default MMS port.
const fn default_mms_port() -> u16 {
	102
}

/// A reference to a report control block on an IED.
///
/// The block name carries the `BR`/`RP` tag that distinguishes buffered from
/// unbuffered blocks, e.g. `LLN0$BR$brcbA01`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RcbRef {
	/// The logical device instance the block lives in.
	pub ld: String,
	/// The MMS block name, `LN$BR$name` or `LN$RP$name`.
	pub block: String,
}

impl RcbRef {
	/// Whether this is a buffered report control block.
	#[must_use]
	pub fn is_buffered(&self) -> bool {
		self.block.split('$').nth(1) == Some("BR")
	}

	/// The `iec61850` client path of the block.
	#[must_use]
	fn object_path(&self) -> ObjectPath {
		(self.ld.as_str(), self.block.as_str()).into()
	}
}

impl std::fmt::Display for RcbRef {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}/{}", self.ld, self.block)
	}
}

/// A dataset update extracted from one report.
#[derive(Debug)]
pub struct DatasetUpdate {
	/// The report control block the report came from.
	pub rcb: String,
	/// The report id.
	pub report_id: String,
	/// The dataset reference carried by the subscription.
	pub dataset: String,
	/// Included members in dataset order, resolved to DO-level references.
	pub values: Vec<(ObjectReference, Iec61850Data)>,
}

/// A consumer of dataset updates.
#[async_trait]
pub trait ReportSink: Send + Sync {
	/// Called for every report that matched a subscription.
	async fn on_dataset_update(&self, update: DatasetUpdate);
}

/// One active report subscription.
struct Subscription {
	/// The subscribed block.
	rcb: RcbRef,
	/// The report id the block was enabled with.
	rpt_id: String,
	/// The dataset reference read from the block.
	dataset: String,
	/// Dataset members in order. Entries that do not name a data object
	/// keep their slot so inclusion indices stay aligned.
	entries: Vec<Option<ObjectReference>>,
	/// The caller's callback.
	sink: Arc<dyn ReportSink>,
}

/// State behind the session mutex.
struct Inner {
	/// The library connection, present after a successful connect.
	client: Option<Iec61850Client>,
	/// Active subscriptions keyed by rcb path.
	subscriptions: HashMap<String, Subscription>,
}

/// A single logical client connection to one IED.
pub struct MmsSession {
	/// The IED name.
	name: String,
	/// The endpoint to connect to.
	config: SessionConfig,
	/// Set once connect succeeds; cleared only by disconnect.
	connected: AtomicBool,
	/// Everything the library handle touches.
	inner: Mutex<Inner>,
	/// The unconsumed report queue of the current connection.
	reports: StdMutex<Option<mpsc::UnboundedReceiver<Report>>>,
}

impl std::fmt::Debug for MmsSession {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MmsSession")
			.field("name", &self.name)
			.field("config", &self.config)
			.field("connected", &self.connected.load(Ordering::Relaxed))
			.finish_non_exhaustive()
	}
}

/// The connection-wide report callback: queue and return.
struct QueueReportCallback {
	/// The producer side of the session report queue.
	tx: mpsc::UnboundedSender<Report>,
}

#[async_trait]
impl ReportCallback for QueueReportCallback {
	async fn on_report(&self, report: Report) {
		if self.tx.send(report).is_err() {
			tracing::debug!("Report dropped, session queue is gone");
		}
	}
}

impl MmsSession {
	/// Create a session. No connection is attempted.
	#[must_use]
	pub fn new(name: &str, config: SessionConfig) -> Self {
		Self {
			name: name.to_owned(),
			config,
			connected: AtomicBool::new(false),
			inner: Mutex::new(Inner { client: None, subscriptions: HashMap::new() }),
			reports: StdMutex::new(None),
		}
	}

	/// The IED name this session belongs to.
	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Whether connect has succeeded and disconnect has not been called.
	/// Transport errors observed by reads and writes do not clear this.
	#[must_use]
	pub fn is_connected(&self) -> bool {
		self.connected.load(Ordering::Acquire)
	}

	/// Connect to the IED and load its data model. Idempotent.
	#[instrument(skip(self), fields(ied = %self.name))]
	pub async fn connect(&self) -> Result<(), SessionError> {
		let mut inner = self.inner.lock().await;
		if inner.client.is_some() {
			return Ok(());
		}

		let (tx, rx) = mpsc::unbounded_channel();
		let config = ClientConfig {
			address: self.config.address.clone(),
			port: self.config.port,
			..ClientConfig::default()
		};
		let client = Iec61850Client::new(config, Box::new(QueueReportCallback { tx }))
			.await
			.map_err(|source| SessionError::Transport { source })?;

		inner.client = Some(client);
		self.connected.store(true, Ordering::Release);
		if let Ok(mut slot) = self.reports.lock() {
			*slot = Some(rx);
		}
		tracing::info!(
			"Connected to IED {} at {}:{}",
			self.name,
			self.config.address,
			self.config.port
		);
		Ok(())
	}

	/// Disconnect. Idempotent; disables any subscribed report control block
	/// first, best effort.
	#[instrument(skip(self), fields(ied = %self.name))]
	pub async fn disconnect(&self) {
		let mut inner = self.inner.lock().await;
		if let Some(client) = inner.client.as_ref() {
			for subscription in inner.subscriptions.values() {
				let path = subscription.rcb.object_path();
				if let Err(e) = client.set_rcb_enabled(&path, false).await {
					tracing::debug!("Failed to disable {}: {e:?}", subscription.rcb);
				}
			}
		}
		inner.subscriptions.clear();
		inner.client = None;
		self.connected.store(false, Ordering::Release);
		if let Ok(mut slot) = self.reports.lock() {
			*slot = None;
		}
		tracing::info!("Disconnected from IED {}", self.name);
	}

	/// Take the report queue of the current connection. The report router
	/// calls this once after each successful connect.
	#[must_use]
	pub fn take_report_stream(&self) -> Option<mpsc::UnboundedReceiver<Report>> {
		self.reports.lock().ok().and_then(|mut slot| slot.take())
	}

	/// Read one attribute. On an object-non-existent answer the read is
	/// retried exactly once with `.stVal` appended under FC `ST`.
	#[instrument(skip(self), fields(ied = %self.name))]
	pub async fn read(
		&self,
		reference: &ObjectReference,
		fc: Fc,
	) -> Result<Iec61850Data, SessionError> {
		match self.read_raw(reference, fc).await {
			Err(SessionError::ObjectDoesNotExist { .. }) => {
				let retry = reference.with_suffix("stVal");
				tracing::debug!("Object not found, retrying as {retry} with FC ST");
				self.read_raw(&retry, Fc::St).await.map_err(|e| match e {
					SessionError::ObjectDoesNotExist { .. } => {
						SessionError::ObjectDoesNotExist { reference: reference.to_string() }
					}
					other => other,
				})
			}
			result => result,
		}
	}

	/// Read without the `.stVal` retry.
	async fn read_raw(
		&self,
		reference: &ObjectReference,
		fc: Fc,
	) -> Result<Iec61850Data, SessionError> {
		self.ensure_connected()?;
		let inner = self.inner.lock().await;
		let client = inner.client.as_ref().context(NotConnected { ied: &self.name })?;
		let item = reference.mms_item(fc);
		let mut data = client
			.read_data_from_ld(reference.ld(), &[item.as_str()])
			.await
			.map_err(|e| SessionError::from_client(&reference.to_string(), e))?;
		data.pop().with_context(|| crate::mms::TypeMismatch {
			reference: reference.to_string(),
			expected: "a single access result",
		})
	}

	/// Write one attribute under the given functional constraint.
	#[instrument(skip(self, value), fields(ied = %self.name))]
	pub async fn write(
		&self,
		reference: &ObjectReference,
		fc: Fc,
		value: Iec61850Data,
	) -> Result<(), SessionError> {
		self.ensure_connected()?;
		let inner = self.inner.lock().await;
		let client = inner.client.as_ref().context(NotConnected { ied: &self.name })?;
		client
			.set_data_value(&reference.object_path(fc), value)
			.await
			.map_err(|e| SessionError::from_client(&reference.to_string(), e))
	}

	/// Run a full IEC 61850 control operation against a controllable data
	/// object: query its control model, select first where the model demands
	/// it, then operate.
	#[instrument(skip(self, ctl_val, origin), fields(ied = %self.name))]
	pub async fn control(
		&self,
		reference: &ObjectReference,
		ctl_val: Iec61850Data,
		origin: &Originator,
		checks: ControlChecks,
	) -> Result<(), SessionError> {
		ControlObject::new(self, reference.clone()).operate(ctl_val, origin, checks).await
	}

	/// The logical device instances of the IED, in discovery order.
	pub async fn enumerate_devices(&self) -> Result<Vec<String>, SessionError> {
		self.with_model(|model| {
			model.logical_devices.iter().map(|ld| ld.name.clone()).collect()
		})
		.await
	}

	/// The logical nodes of a logical device, in discovery order.
	pub async fn enumerate_nodes(&self, ld: &str) -> Result<Vec<String>, SessionError> {
		self.with_model(|model| {
			model
				.logical_devices
				.iter()
				.find(|device| device.name == ld)
				.map(|device| device.logical_nodes.iter().map(|ln| ln.name.clone()).collect())
				.unwrap_or_default()
		})
		.await
	}

	/// The data objects of a logical node: the union over the functional
	/// constraint groups, preserving first-seen order.
	pub async fn enumerate_data_objects(
		&self,
		ld: &str,
		ln: &str,
	) -> Result<Vec<String>, SessionError> {
		self.with_model(|model| {
			let mut names = Vec::new();
			for group in fc_groups(model, ld, ln) {
				for node in group {
					let name = node_name(node);
					if !names.iter().any(|n| n == name) {
						names.push(name.to_owned());
					}
				}
			}
			names
		})
		.await
	}

	/// The data attributes of a data object: the union over the functional
	/// constraint groups. Control structures (`Oper`, `SBOw`) are expanded
	/// one level so their members (`ctlVal` and siblings) show up as well.
	pub async fn enumerate_data_attributes(
		&self,
		ld: &str,
		ln: &str,
		data_object: &str,
	) -> Result<Vec<String>, SessionError> {
		self.with_model(|model| {
			let mut names = Vec::new();
			let mut push = |name: &str| {
				if !names.iter().any(|n| n == name) {
					names.push(name.to_owned());
				}
			};
			for group in fc_groups(model, ld, ln) {
				for node in group {
					if node_name(node) != data_object {
						continue;
					}
					let Node::DataObject { nodes, .. } = node else { continue };
					for attribute in nodes {
						let name = node_name(attribute);
						push(name);
						if let Node::DataObject { nodes: members, .. } = attribute
							&& (name == "Oper" || name == "SBOw")
						{
							for member in members {
								push(node_name(member));
							}
						}
					}
				}
			}
			names
		})
		.await
	}

	/// The declared type of a control value, if the data object carries an
	/// `Oper` structure with a `ctlVal` member.
	pub async fn ctl_val_type(
		&self,
		reference: &ObjectReference,
	) -> Result<Option<String>, SessionError> {
		let (ld, ln, data_object) =
			(reference.ld().to_owned(), reference.ln().to_owned(), reference.data_object().to_owned());
		self.with_model(move |model| {
			for group in fc_groups(model, &ld, &ln) {
				for node in group {
					let Node::DataObject { name, nodes, .. } = node else { continue };
					if name != &data_object {
						continue;
					}
					for attribute in nodes {
						let Node::DataObject { name, nodes: members, .. } = attribute else {
							continue;
						};
						if name != "Oper" && name != "SBOw" {
							continue;
						}
						for member in members {
							if let Node::DataAttribute { name, r#type, .. } = member
								&& name == "ctlVal"
							{
								return Some(r#type.clone());
							}
						}
					}
				}
			}
			None
		})
		.await
	}

	/// Enumerate buffered and unbuffered report control blocks across all
	/// logical nodes, sorted for stable output.
	pub async fn list_report_blocks(&self) -> Result<Vec<RcbRef>, SessionError> {
		let mut blocks = self
			.with_model(|model| {
				let mut blocks = Vec::new();
				for device in &model.logical_devices {
					for ln in &device.logical_nodes {
						for name in ln.reports.keys() {
							blocks.push(RcbRef { ld: device.name.clone(), block: name.clone() });
						}
					}
				}
				blocks
			})
			.await?;
		blocks.sort_by(|a, b| a.ld.cmp(&b.ld).then_with(|| a.block.cmp(&b.block)));
		Ok(blocks)
	}

	/// Subscribe to a report control block: enable it with data-update,
	/// integrity and general-interrogation triggers, a 5 s integrity period
	/// and one immediate general interrogation, then remember the caller's
	/// sink keyed by the block.
	#[instrument(skip(self, sink), fields(ied = %self.name, rcb = %rcb))]
	pub async fn subscribe_report(
		&self,
		rcb: &RcbRef,
		sink: Arc<dyn ReportSink>,
	) -> Result<(), SessionError> {
		self.ensure_connected()?;
		let mut inner = self.inner.lock().await;
		let client = inner.client.as_ref().context(NotConnected { ied: &self.name })?;
		let path = rcb.object_path();

		let block = client
			.get_rcb(&path)
			.await
			.map_err(|e| SessionError::from_client(&rcb.to_string(), e))?;
		let (rpt_id, dataset) = match block {
			ReportControlBlock::Buffered(block) => (block.id, block.dataset),
			ReportControlBlock::Unbuffered(block) => (block.id, block.dataset),
		};

		let entries = if dataset.is_empty() {
			Vec::new()
		} else {
			let (ld, item) = dataset.split_once('/').unwrap_or((rcb.ld.as_str(), dataset.as_str()));
			client
				.get_dataset(item, Some(ld))
				.await
				.map_err(|e| SessionError::from_client(&dataset, e))?
				.iter()
				.map(|entry| ObjectReference::from_mms_entry(&self.name, entry).ok())
				.collect()
		};

		let enable = async {
			client
				.set_rcb_trigger_options(
					&path,
					vec![TriggerOptions::DataUpdate, TriggerOptions::Integrity, TriggerOptions::Gi],
				)
				.await?;
			client.set_rcb_integrity_period(&path, REPORT_INTEGRITY_PERIOD_MS).await?;
			client.set_rcb_enabled(&path, true).await?;
			client.set_rcb_gi(&path, true).await
		};
		enable.await.map_err(|e| SessionError::from_client(&rcb.to_string(), e))?;

		let rpt_id = if rpt_id.is_empty() { rcb.to_string() } else { rpt_id };
		inner.subscriptions.insert(
			rcb.to_string(),
			Subscription { rcb: rcb.clone(), rpt_id, dataset, entries, sink },
		);
		tracing::info!("Report subscription active for {rcb}");
		Ok(())
	}

	/// Drop a subscription and disable the block, best effort.
	#[instrument(skip(self), fields(ied = %self.name, rcb = %rcb))]
	pub async fn unsubscribe_report(&self, rcb: &RcbRef) -> Result<(), SessionError> {
		let mut inner = self.inner.lock().await;
		inner.subscriptions.remove(&rcb.to_string());
		let Some(client) = inner.client.as_ref() else { return Ok(()) };
		client
			.set_rcb_enabled(&rcb.object_path(), false)
			.await
			.map_err(|e| SessionError::from_client(&rcb.to_string(), e))
	}

	/// Match a queued report against the active subscriptions and feed the
	/// matching sink. The session mutex is held only while the subscription
	/// is looked up, never across the sink call.
	pub async fn dispatch_report(&self, report: Report) {
		let matched = {
			let inner = self.inner.lock().await;
			inner
				.subscriptions
				.values()
				.find(|sub| {
					sub.rpt_id == report.id
						|| report.dataset.as_deref().is_some_and(|ds| ds == sub.dataset)
				})
				.map(|sub| {
					(sub.rcb.to_string(), sub.dataset.clone(), sub.entries.clone(), Arc::clone(&sub.sink))
				})
		};
		let Some((rcb, dataset, entries, sink)) = matched else {
			tracing::debug!("Report {} matched no subscription", report.id);
			return;
		};

		let mut values = report.values.into_iter();
		let mut update = DatasetUpdate {
			rcb,
			report_id: report.id,
			dataset,
			values: Vec::new(),
		};
		for (index, entry) in entries.iter().enumerate() {
			if !bit_is_set(&report.inclusion, index) {
				continue;
			}
			let Some(value) = values.next() else { break };
			if let Some(reference) = entry {
				update.values.push((reference.clone(), value));
			}
		}
		sink.on_dataset_update(update).await;
	}

	/// Fail closed when the connection flag is not set.
	fn ensure_connected(&self) -> Result<(), SessionError> {
		if self.is_connected() {
			Ok(())
		} else {
			NotConnected { ied: &self.name }.fail()
		}
	}

	/// Run a closure over the cached IED model.
	async fn with_model<T>(
		&self,
		f: impl FnOnce(&iec61850::iec61850::model::IedModel) -> T,
	) -> Result<T, SessionError> {
		self.ensure_connected()?;
		let inner = self.inner.lock().await;
		let client = inner.client.as_ref().context(NotConnected { ied: &self.name })?;
		Ok(f(client.model()))
	}
}

/// The functional constraint groups of a logical node, i.e. the first level
/// of its component tree.
fn fc_groups<'a>(
	model: &'a iec61850::iec61850::model::IedModel,
	ld: &str,
	ln: &str,
) -> impl Iterator<Item = &'a Vec<Node>> {
	model
		.logical_devices
		.iter()
		.filter(move |device| device.name == ld)
		.flat_map(|device| device.logical_nodes.iter())
		.filter(move |node| node.name == ln)
		.flat_map(|node| node.nodes.iter())
		.filter_map(|group| match group {
			Node::DataObject { nodes, .. } => Some(nodes),
			Node::DataAttribute { .. } => None,
		})
}

/// The name of a model node.
fn node_name(node: &Node) -> &str {
	match node {
		Node::DataAttribute { name, .. } | Node::DataObject { name, .. } => name,
	}
}

/// Whether bit `index` of an MMS inclusion bitstring is set. Bit 0 is the
/// first dataset member.
fn bit_is_set(bitstring: &Bitstring, index: usize) -> bool {
	bitstring.bytes.get(index / 8).is_some_and(|byte| byte & (1 << (index % 8)) != 0)
}
