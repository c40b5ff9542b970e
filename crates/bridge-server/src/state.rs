use std::path::PathBuf;
use std::sync::Arc;

use bridge_core::config::AppConfig;
use bridge_core::dispatcher::Dispatcher;
use bridge_core::healing::N8nWorkflowLister;
use bridge_core::registry::AgentRegistry;
use bridge_core::streaming::StreamingChannel;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher<N8nWorkflowLister>>,
    pub streaming: Arc<StreamingChannel>,
    pub registry: AgentRegistry,
    pub config: Arc<AppConfig>,
    pub state_dir: PathBuf,
}

impl AppState {
    pub fn new(config: AppConfig, app_root: PathBuf, state_dir: PathBuf) -> Self {
        let deliverables_dir = app_root.join("deliverables");
        let lister = N8nWorkflowLister::new(config.http.base_url.clone(), String::new());
        let registry = AgentRegistry::new();

        let dispatcher = Dispatcher::new(
            config.http.webhook_url.clone(),
            config.http.base_url.clone(),
            state_dir.clone(),
            app_root,
            deliverables_dir,
            registry.clone(),
            lister,
            config.supervisor.brand_tokens.clone(),
        );

        let streaming = StreamingChannel::new(state_dir.clone(), vec![]);

        Self {
            dispatcher: Arc::new(dispatcher),
            streaming: Arc::new(streaming),
            registry,
            config: Arc::new(config),
            state_dir,
        }
    }
}
