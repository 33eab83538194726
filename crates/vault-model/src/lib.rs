//! In-memory aggregate over the credential vault tree.
//!
//! An [`IdentityModel`] binds to one [`StorageSystem`](vault_store::StorageSystem),
//! loads the whole tree eagerly and mediates every read and write after
//! that. Nodes are handed to callers by [`OpaqueReference`](vault_types::OpaqueReference)
//! so that no caller holds on to a storage id.

pub mod error;
pub mod event;
pub mod model;

pub use error::{ModelError, ModelResult};
pub use event::{ChannelListener, ListenerId, ModelEvent, ModelListener};
pub use model::{IdentityModel, LevelCount, Node, TransferReport};
