//! Structured errors surfaced by the module host core.
//!
//! One variant per error kind in the core's error table: boot-time errors are
//! fatal (discovery, resolution, construction, start), steady-state errors
//! (stop, handler, health probe) are logged and contained by their callers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BaseplateError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("module '{name}' is registered more than once in layer '{layer}'")]
    DuplicateModule { name: &'static str, layer: &'static str },

    #[error("module '{module}' depends on unknown or disabled module '{missing}'")]
    MissingDependency {
        module: &'static str,
        missing: &'static str,
    },

    #[error("circular dependency detected: {}", path.join(" -> "))]
    CircularDependency { path: Vec<&'static str> },

    #[error("failed to construct module '{module}'")]
    ModuleLoad {
        module: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("module '{module}' failed to start")]
    ModuleStart {
        module: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("unknown module referenced: '{0}'")]
    UnknownModule(String),
}

pub type BaseplateResult<T> = Result<T, BaseplateError>;
