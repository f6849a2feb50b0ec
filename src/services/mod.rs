//! Worker logic: identity, backend client, validation, channel session and supervision.

pub mod abort;
pub mod backend;
pub mod identity;
pub mod monitor;
pub mod reporter;
pub mod session;
pub mod supervisor;
pub mod validator;

pub use abort::{abort_pair, AbortHandle, AbortSignal};
pub use backend::{ChunkStream, InferenceBackend, ModelTag, OllamaBackend};
pub use identity::{derive_worker_id, generate_salt, WorkerIdentity};
pub use monitor::{StatusSnapshot, WorkerMonitor};
pub use reporter::{MessageFn, Reporter};
pub use session::ChannelSession;
pub use supervisor::{Supervisor, WorkerControl, WorkerHandle};
pub use validator::{parse_request, Rejection};
