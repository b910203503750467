//! IEC 61850 (MMS) to OPC UA protocol gateway.
//!
//! This crate bridges an industrial substation automation bus (IEC 61850 over
//! MMS) to OPC UA. It connects to a set of IEDs through the pure-rust
//! `iec61850` client, discovers their data model, projects the model into an
//! OPC UA address space served by the `opcua` crate, keeps the projected
//! values fresh through polling and report subscriptions, and routes OPC UA
//! writes back to the devices as plain writes or IEC 61850 control
//! operations.
//!
//! The crate does not implement either wire protocol itself; it composes the
//! two protocol libraries and owns everything in between: session lifecycle,
//! CDC inference, SCL synthesis/merge/projection, the binding table and the
//! polling, report and write paths.

pub mod config;
pub mod gateway;
pub mod mms;
pub mod model;
pub mod scl;
pub mod ua;

pub use config::GatewayConfig;
pub use gateway::Gateway;
