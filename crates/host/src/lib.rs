//! HTTP clients for the attachment host and the metadata backend.
//!
//! The pipeline talks to the network exclusively through the
//! [`HostTransport`] and [`BackendApi`] traits, so consumers can be tested
//! with mocks. [`HostClient`] and [`BackendClient`] are the reqwest-backed
//! implementations.

mod backend;
mod error;
mod traits;
mod upload;

pub use backend::BackendClient;
pub use error::HostError;
pub use traits::{BackendApi, HostTransport, ProgressFn};
pub use upload::{HostClient, Webhook, WebhookPool};
