//! Remote GPU offload.
//!
//! A [`RemoteSessionFactory`] starts a rented instance, waits for its job
//! server to answer health checks and hands out a [`RemoteSession`] bound
//! to a [`FileTransfer`] strategy and a [`JobClient`]. Every wait is bounded
//! by a deadline, and a session stops its instance exactly once.

mod config;
mod error;
mod factory;
mod job_client;
mod runpod;
mod session;
mod traits;
mod transfer;
mod types;

pub use config::{expand_home, RemoteConfig, UpscaleJobConfig};
pub use error::RemoteError;
pub use factory::{JobClientConnector, RemoteSessionFactory};
pub use job_client::UpscaleServerClient;
pub use runpod::RunPodProvider;
pub use session::RemoteSession;
pub use traits::{ComputeProvider, FileTransfer, JobClient};
pub use transfer::{await_credential, read_relay_code, RelayTransfer, ScpTransfer};
pub use types::{JobRecord, JobRequest, JobStatus, SshEndpoint, TransferMethod};
