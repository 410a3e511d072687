//! Server-side functionality modules and trait.

mod external;
mod locks;
mod register;
mod replica;

pub use external::{ApiReply, ApiRequest, RequestId};
pub use register::RegisterEntry;
pub use replica::{GenericReplica, ReplicaId};

pub(crate) use external::ExternalApi;
pub(crate) use locks::LockTable;
pub(crate) use register::RegisterStore;
