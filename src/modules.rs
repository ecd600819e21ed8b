//! Runtime-loadable feature modules.

use crate::error::CommandError;

use tokio::sync::RwLock;

/// A feature group that can be loaded and unloaded while the bot runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Module {
    /// Message relay and the `aichat` commands.
    AiChat,
    /// `help` and `ping`.
    Help,
}

impl Module {
    pub const ALL: [Module; 2] = [Module::AiChat, Module::Help];

    pub fn name(self) -> &'static str {
        match self {
            Module::AiChat => "aichat",
            Module::Help => "help",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|module| module.name().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Tracks which modules are loaded, in load order.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    loaded: RwLock<Vec<Module>>,
}

impl ModuleRegistry {
    /// Registry with every module loaded, as at startup.
    pub fn with_all_loaded() -> Self {
        Self {
            loaded: RwLock::new(Module::ALL.to_vec()),
        }
    }

    pub async fn is_loaded(&self, module: Module) -> bool {
        self.loaded.read().await.contains(&module)
    }

    pub async fn load(&self, name: &str) -> Result<Module, CommandError> {
        let module = resolve(name)?;
        let mut loaded = self.loaded.write().await;
        if loaded.contains(&module) {
            return Err(CommandError::AlreadyLoaded(module.name().into()));
        }
        loaded.push(module);
        tracing::info!(%module, "module loaded");
        Ok(module)
    }

    pub async fn unload(&self, name: &str) -> Result<Module, CommandError> {
        let module = resolve(name)?;
        let mut loaded = self.loaded.write().await;
        let Some(position) = loaded.iter().position(|m| *m == module) else {
            return Err(CommandError::NotLoaded(module.name().into()));
        };
        loaded.remove(position);
        tracing::info!(%module, "module unloaded");
        Ok(module)
    }

    /// Resolve a module for reloading. Only loaded modules can be reloaded.
    pub async fn reloadable(&self, name: &str) -> Result<Module, CommandError> {
        let module = resolve(name)?;
        if !self.is_loaded(module).await {
            return Err(CommandError::NotLoaded(module.name().into()));
        }
        Ok(module)
    }

    pub async fn loaded(&self) -> Vec<Module> {
        self.loaded.read().await.clone()
    }
}

fn resolve(name: &str) -> Result<Module, CommandError> {
    Module::from_name(name).ok_or_else(|| CommandError::UnknownModule(name.into()))
}
