/// Execution Layer
///
/// This layer is responsible for:
/// - Talking to miners over HTTP (or the local fetch client)
/// - Fanning a query out to the roster under a per-miner deadline
/// - Establishing the reference from trusted miners or a direct fetch
/// - Driving the periodic validator loop and its configuration

pub mod config;
pub mod dispatch;
pub mod miner_client;
pub mod reference;
pub mod validator;

// Tests
#[cfg(test)]
pub(crate) mod tests;

// Re-export key components from the execution layer
pub use config::{ValidatorConfig, ValidatorConfigRoot};
pub use dispatch::DispatchCoordinator;
pub use miner_client::{HttpMinerClient, LocalMinerClient, MinerClient};
pub use reference::{ReferenceMode, ReferenceResolver, select_reference};
pub use validator::{RoundOutcome, Validator, ValidatorBuilder};
