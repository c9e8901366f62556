//! Model lifecycle and the bridge call surface.
//!
//! Ties the model store, the inference runtime and the stream bridge
//! together: at most one model resident, downloads on demand, generations
//! relayed to the presentation layer as events.

mod config;
mod controller;
mod error;
mod startup;
mod surface;

pub use config::{AppConfig, ConfigError};
pub use controller::{LifecycleState, ModelLifecycleController, ModelSource};
pub use error::{BridgeError, Result};
pub use startup::{bus_progress, prepare_models, Readiness, ReadinessProbe};
pub use surface::InferenceBridge;
