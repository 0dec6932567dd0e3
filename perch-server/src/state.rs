//! Shared application state
//!
//! Every collaborator the services need, constructed once in `main` (or a
//! test) and handed to the router.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::forge::Forge;
use crate::logging::LogStreams;
use crate::pipeline::PipelineBuilder;
use crate::pubsub::Publisher;
use crate::queue::Queue;
use crate::repository::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub queue: Arc<dyn Queue>,
    pub bus: Arc<Publisher>,
    pub logs: Arc<LogStreams>,
    pub builder: Arc<dyn PipelineBuilder>,
    pub forge: Arc<dyn Forge>,
    pub config: Arc<ServerConfig>,
    /// Cancelled on shutdown; every stream connection holds a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn Queue>,
        builder: Arc<dyn PipelineBuilder>,
        forge: Arc<dyn Forge>,
        config: ServerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            bus: Arc::new(Publisher::new(config.subscriber_backlog)),
            logs: Arc::new(LogStreams::new()),
            builder,
            forge,
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }
}
