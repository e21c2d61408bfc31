use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use action_flow::PlaybookEngine;
use action_gate::StepVerifier;
use action_primitives::PageDriver;

use crate::config::AppConfig;
use crate::executor::PageStepExecutor;

pub struct CliContext {
    config: Arc<AppConfig>,
    config_path: PathBuf,
}

impl CliContext {
    pub fn new(config: AppConfig, config_path: PathBuf) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
        }
    }

    pub fn config(&self) -> &AppConfig {
        self.config.as_ref()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Executor wired with the configured strategy switches.
    pub fn executor(&self, page: Arc<dyn PageDriver>) -> PageStepExecutor {
        PageStepExecutor::with_options(
            page,
            self.config.resolution,
            Duration::from_millis(self.config.engine.default_wait_ms),
        )
    }

    /// Engine driving `page` through the configured executor and verifier.
    pub fn engine(&self, page: Arc<dyn PageDriver>) -> PlaybookEngine {
        let executor = Arc::new(self.executor(page.clone()));
        let verifier = Arc::new(StepVerifier::new(self.config.verifier.to_verifier_config()));
        PlaybookEngine::with_capacity(self.config.engine.event_capacity)
            .with_executor(executor)
            .with_verifier(verifier)
            .with_page(page)
    }
}
