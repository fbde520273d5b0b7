//! # domocontrol - UPnP control point
//!
//! The consumer side of the DomoCore runtime: discover devices over
//! SSDP, resolve their descriptions, invoke their actions over SOAP and
//! follow their state through GENA subscriptions.
//!
//! The protocol plumbing (codecs, HTTP transport, SSDP sockets) lives
//! in `domoupnp`; this crate owns the remote-device cache and the two
//! client-side proxies.
//!
//! ```no_run
//! use domocontrol::ControlPoint;
//! use domoupnp::SearchTarget;
//!
//! let cp = ControlPoint::start().unwrap();
//! cp.search(&SearchTarget::All).unwrap();
//! for event in cp.device_events().iter() {
//!     println!("{event:?}");
//! }
//! ```

pub mod action;
pub mod description;
pub mod discovery;
pub mod events;
pub mod model;
pub mod registry;
pub mod subscription;

mod control_point;

pub use action::{ActionProxy, InvokeResult};
pub use control_point::ControlPoint;
pub use description::{DescriptionError, Descriptions, XmlDescriptions};
pub use events::EventBus;
pub use model::{DeviceEvent, RemoteDevice};
pub use registry::DeviceRegistry;
pub use subscription::{EventProxy, SubscriptionEvent};
