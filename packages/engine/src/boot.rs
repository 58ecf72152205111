use crate::backend::EngineBackend;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::EngineError;

pub struct BootArgs {
    pub backend: Box<dyn EngineBackend + Send + Sync>,
    pub config: EngineConfig,
}

impl BootArgs {
    pub fn new(backend: Box<dyn EngineBackend + Send + Sync>) -> Self {
        Self {
            backend,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }
}

/// Validates the configuration and wraps the backend in an [`Engine`].
pub fn boot(args: BootArgs) -> Result<Engine, EngineError> {
    args.config.validate()?;
    Ok(Engine::from_boot_args(args))
}
