use std::sync::Arc;

use crate::broker::Broker;
use crate::config::Config;
use crate::db::store::Store;
use crate::engine::Executor;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub broker: Arc<Broker>,
    pub executor: Executor,
    pub config: Arc<Config>,
}
