//! Beacon Core Library
//!
//! Connection registry, snapshot broadcasting and the transport contract
//! for the realtime location service.

pub mod broadcast;
pub mod error;
pub mod model;
pub mod protocol;
pub mod registry;
pub mod transport;

pub use broadcast::{BroadcastCoordinator, CoordinatorStats};
pub use error::{BeaconError, BeaconResult};
pub use model::{ConnectionId, Location, Snapshot, UserEntry};
pub use registry::Registry;
pub use transport::{ClientConnection, ClientSink, DeliveryError, Frame};
