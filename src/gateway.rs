//! The gateway context.
//!
//! One [`Gateway`] value owns the whole data plane: the session registry,
//! the projected address space with its binding table, the polling loop,
//! the report router and the write dispatcher, plus the REST-facing
//! operations the outer HTTP surface calls into. Collaborators receive this
//! context explicitly; there is no module-level state.

use std::sync::{
	Arc, Mutex,
	atomic::{AtomicBool, Ordering},
};

use snafu::{OptionExt as _, ResultExt as _, Snafu};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
	config::GatewayConfig,
	mms::{
		SessionError,
		registry::SessionRegistry,
		session::{MmsSession, RcbRef},
	},
	model::{Cdc, Ied, StationModel, discovery},
	scl::{SclError, SclFormat, SclMerger, SclSynthesizer, project},
	ua::{SharedAddressSpace, UaError, WriteRequest, space::GatewaySpace},
};

pub mod dispatch;
pub mod poller;
pub mod reports;

pub use dispatch::{WriteCommand, WriteDispatcher};
pub use poller::Poller;
pub use reports::{ReportRouter, SubscriptionId};

/// The error type of the gateway surface.
#[allow(missing_docs)]
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum GatewayError {
	#[snafu(display("IED {} is not configured", name))]
	UnknownIed { name: String },
	#[snafu(display("Session error"))]
	Session { source: SessionError },
	#[snafu(display("SCL error"))]
	Scl { source: SclError },
	#[snafu(display("Address space error"))]
	Space { source: UaError },
	#[snafu(display("No station document has been built yet"))]
	NoStation,
}

/// The assembled data-plane engine.
#[derive(Debug)]
pub struct Gateway {
	/// The static configuration.
	config: GatewayConfig,
	/// The session pool.
	registry: Arc<SessionRegistry>,
	/// The projected address space and binding table.
	space: Arc<GatewaySpace>,
	/// The report router.
	router: ReportRouter,
	/// The client-write queue, handed to the dispatcher on start.
	writes: Mutex<Option<mpsc::UnboundedReceiver<WriteRequest>>>,
	/// Signals every loop to wind down.
	running: Arc<AtomicBool>,
	/// The spawned loop handles.
	tasks: Mutex<Vec<JoinHandle<()>>>,
	/// The last merged station document.
	station: Mutex<Option<String>>,
}

impl Gateway {
	/// Assemble a gateway over an OPC UA address space handle.
	#[must_use]
	pub fn new(config: GatewayConfig, space: SharedAddressSpace) -> Self {
		let (writes_tx, writes_rx) = mpsc::unbounded_channel();
		let space = Arc::new(GatewaySpace::new(space, writes_tx));
		let registry = Arc::new(SessionRegistry::new());
		let router = ReportRouter::new(Arc::clone(&registry), Arc::clone(&space));
		Self {
			config,
			registry,
			space,
			router,
			writes: Mutex::new(Some(writes_rx)),
			running: Arc::new(AtomicBool::new(true)),
			tasks: Mutex::new(Vec::new()),
			station: Mutex::new(None),
		}
	}

	/// The session registry.
	#[must_use]
	pub fn registry(&self) -> &SessionRegistry {
		&self.registry
	}

	/// Connect one configured IED and start draining its reports.
	pub async fn connect_ied(&self, name: &str) -> Result<(), GatewayError> {
		let session = self.session_for(name)?;
		session.connect().await.context(Session)?;
		self.router.attach(Arc::clone(&session));
		Ok(())
	}

	/// Disconnect one IED. The session stays registered for reconnection.
	pub async fn disconnect_ied(&self, name: &str) -> Result<(), GatewayError> {
		let session = self.registry.get(name).with_context(|| UnknownIed { name })?;
		session.disconnect().await;
		Ok(())
	}

	/// Discover every enabled IED, synthesize per-IED capability documents,
	/// merge them into the station document and materialize the result as
	/// OPC UA nodes. IEDs that cannot be reached are skipped with a log
	/// entry; the station is built from the rest.
	pub async fn build_station(&self) -> Result<StationModel, GatewayError> {
		let mut merger = SclMerger::new();
		merger.set_network(self.config.network_table());
		if self.config.auto_assign_addresses {
			merger.auto_assign_from(&self.config.auto_assign_base);
		}
		merger.include_substation(self.config.include_substation);

		let mut discovered = 0_usize;
		for ied in self.config.ieds.iter().filter(|ied| ied.enabled) {
			let session = self.registry.ensure(&ied.name, ied.endpoint());
			if let Err(e) = session.connect().await {
				tracing::error!("Skipping {}: {e}", ied.name);
				continue;
			}
			self.router.attach(Arc::clone(&session));

			let model = discovery::discover(&session).await.context(Session)?;
			let icd =
				SclSynthesizer::new(&model).synthesize(SclFormat::Icd, None).context(Scl)?;
			merger.add_document(&icd).context(Scl)?;
			discovered += 1;
		}
		tracing::info!("Discovered {discovered} IEDs for the station document");

		let scd = merger.merge().context(Scl)?;
		let station = project(&scd).context(Scl)?;
		self.space.build(&station).context(Space)?;
		if let Ok(mut slot) = self.station.lock() {
			*slot = Some(scd);
		}
		Ok(station)
	}

	/// Start the polling loop and the write dispatcher.
	pub fn start(&self) {
		let mut tasks = self.tasks.lock().unwrap_or_else(|poison| poison.into_inner());

		let poller = Poller::new(
			Arc::clone(&self.registry),
			Arc::clone(&self.space),
			self.config.update_interval_ms,
			Arc::clone(&self.running),
		);
		tasks.push(poller.spawn());

		let writes = self.writes.lock().ok().and_then(|mut slot| slot.take());
		if let Some(writes) = writes {
			let dispatcher = WriteDispatcher::new(
				Arc::clone(&self.registry),
				Arc::clone(&self.space),
				self.config.originator.clone(),
				self.config.checks,
				Arc::clone(&self.running),
			);
			tasks.push(dispatcher.spawn(writes));
		}
	}

	/// Signal every loop to stop and disconnect every session. In-flight
	/// protocol operations complete; nothing is aborted mid-request.
	pub async fn shutdown(&self) {
		self.running.store(false, Ordering::Release);
		self.registry.disconnect_all().await;
		tracing::info!("Gateway shut down");
	}

	/// Every bound reference, sorted.
	#[must_use]
	pub fn list_bindings(&self) -> Vec<String> {
		self.space.bindings().references()
	}

	/// The report control blocks of one IED.
	pub async fn describe_rcbs(&self, ied: &str) -> Result<Vec<RcbRef>, GatewayError> {
		let session = self.registry.get(ied).with_context(|| UnknownIed { name: ied })?;
		session.list_report_blocks().await.context(Session)
	}

	/// Subscribe to a report control block. Returns immediately; the
	/// activation happens on a detached task.
	pub fn subscribe(&self, ied: &str, rcb: RcbRef) -> Result<SubscriptionId, GatewayError> {
		self.router.subscribe(ied, rcb).context(Session)
	}

	/// Tear down a report subscription.
	pub async fn unsubscribe(&self, ied: &str, id: &SubscriptionId) -> Result<(), GatewayError> {
		self.router.unsubscribe(ied, id).await.context(Session)
	}

	/// Direct write path, bypassing the address space: route a typed value
	/// at an MMS object reference of the form `LD/LN.DO`.
	pub async fn write(
		&self,
		ied: &str,
		reference: &str,
		command: WriteCommand,
	) -> Result<(), GatewayError> {
		let session = self.registry.get(ied).with_context(|| UnknownIed { name: ied })?;
		let reference =
			crate::mms::ObjectReference::parse(&format!("{ied}/{reference}")).context(Session)?;
		dispatch::execute(
			&session,
			&reference,
			command,
			&self.config.originator,
			self.config.checks,
		)
		.await
		.context(Session)
	}

	/// Export a single-IED description in the requested format.
	pub async fn export_scl(&self, ied: &str, format: SclFormat) -> Result<String, GatewayError> {
		let session = self.registry.get(ied).with_context(|| UnknownIed { name: ied })?;
		let model = discovery::discover(&session).await.context(Session)?;

		let endpoint = self.config.ied(ied).map(|config| (config.ip.clone(), config.port));
		let endpoint = endpoint.as_ref().map(|(ip, port)| (ip.as_str(), *port));
		SclSynthesizer::new(&model).synthesize(format, endpoint).context(Scl)
	}

	/// Browse one IED: every data object reference with its inferred
	/// class.
	pub async fn browse(&self, ied: &str) -> Result<Vec<(String, Cdc)>, GatewayError> {
		let session = self.registry.get(ied).with_context(|| UnknownIed { name: ied })?;
		let model = discovery::discover(&session).await.context(Session)?;
		Ok(flatten_references(&model))
	}

	/// The last merged station document.
	pub fn station_document(&self) -> Result<String, GatewayError> {
		let slot = self.station.lock().unwrap_or_else(|poison| poison.into_inner());
		slot.clone().context(NoStation)
	}

	/// Resolve the session of a configured IED, registering it on first
	/// use.
	fn session_for(&self, name: &str) -> Result<Arc<MmsSession>, GatewayError> {
		let config = self.config.ied(name).with_context(|| UnknownIed { name })?;
		Ok(self.registry.ensure(&config.name, config.endpoint()))
	}
}

/// Flatten a discovered model into `(reference, class)` rows.
fn flatten_references(ied: &Ied) -> Vec<(String, Cdc)> {
	let mut rows = Vec::new();
	for device in &ied.logical_devices {
		for node in &device.logical_nodes {
			let ln_name = node.name();
			for data_object in &node.data_objects {
				rows.push((
					format!("{}/{}/{}.{}", ied.name, device.instance, ln_name, data_object.name),
					data_object.cdc,
				));
			}
		}
	}
	rows
}
