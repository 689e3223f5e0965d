//! Client core: entity store, exchange controller and selection policy.

pub mod directory;
pub mod error;
pub mod exchange;
pub mod interpret;
pub mod session;
pub mod store;

use std::sync::Arc;

use agentdesk_protocol::Backend;

pub use directory::AgentDirectory;
pub use error::{ClientError, ClientResult};
pub use exchange::{ExchangeController, ExchangeState, IgnoreReason, SubmitOutcome};
pub use interpret::interpret;
pub use session::{SessionContext, SessionSelector};
pub use store::{EntityStore, Notice};

/// All client components wired to one backend and one store.
pub struct ClientCore {
    pub store: Arc<EntityStore>,
    pub exchanges: ExchangeController,
    pub selector: SessionSelector,
    pub directory: AgentDirectory,
}

impl ClientCore {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let store = Arc::new(EntityStore::new());
        Self {
            exchanges: ExchangeController::new(Arc::clone(&backend), Arc::clone(&store)),
            selector: SessionSelector::new(Arc::clone(&backend), Arc::clone(&store)),
            directory: AgentDirectory::new(backend, Arc::clone(&store)),
            store,
        }
    }
}
