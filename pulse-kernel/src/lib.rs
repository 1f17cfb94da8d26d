/**
 * PULSE KERNEL - Monitoring matériel local multi-cadence
 *
 * Sampler → cache des dernières mesures → push coalescé vers le dashboard,
 * chaque mesure réussie étant aussi rangée dans l'historique SQLite borné.
 */

pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod http;
pub mod kernel;
pub mod models;
pub mod mqtt;
pub mod query;
pub mod sampler;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod ws;

pub use kernel::{Kernel, KernelOptions};
pub use models::{FieldValue, Fields, MetricKind, Reading, Snapshot, Tier};
