use std::sync::Arc;

use ezbids_core::{
    ArtifactGateway, Config, SessionStore, StagePoller, StageRequests, UploadTracker,
    WorkdirLayout,
};

/// Shared application state
pub struct AppState {
    config: Config,
    store: Arc<dyn SessionStore>,
    gateway: ArtifactGateway,
    uploads: UploadTracker,
    requests: StageRequests,
    poller: Option<Arc<StagePoller>>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn SessionStore>,
        poller: Option<Arc<StagePoller>>,
    ) -> Self {
        let layout = WorkdirLayout::new(config.workspace.root.clone());
        Self {
            gateway: ArtifactGateway::new(Arc::clone(&store), layout.clone()),
            uploads: UploadTracker::new(Arc::clone(&store), layout.clone()),
            requests: StageRequests::new(Arc::clone(&store), layout),
            config,
            store,
            poller,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &dyn SessionStore {
        self.store.as_ref()
    }

    pub fn gateway(&self) -> &ArtifactGateway {
        &self.gateway
    }

    pub fn uploads(&self) -> &UploadTracker {
        &self.uploads
    }

    pub fn requests(&self) -> &StageRequests {
        &self.requests
    }

    pub fn poller(&self) -> Option<&Arc<StagePoller>> {
        self.poller.as_ref()
    }
}
