//! Process-wide Resolver Registration
//!
//! For call sites that cannot be handed a resolver explicitly. Written once,
//! read-only afterwards; there is no way to replace or remove it.

use std::sync::{Arc, OnceLock};
use anyhow::bail;
use tracing::info;

use crate::Result;
use super::{ProxyResolver, ScopedProxyResolver};

static INSTALLED: OnceLock<Arc<dyn ProxyResolver>> = OnceLock::new();

/// Install `resolver` as the process-wide proxy resolver.
///
/// Fails if a resolver has already been installed.
pub fn install(resolver: Arc<dyn ProxyResolver>) -> Result<()> {
    if INSTALLED.set(resolver).is_err() {
        bail!("A proxy resolver is already installed for this process");
    }

    info!("Process-wide proxy resolver installed");
    Ok(())
}

/// Install a [`ScopedProxyResolver`]
pub fn install_default() -> Result<()> {
    install(Arc::new(ScopedProxyResolver::new()))
}

/// The installed resolver, if any
pub fn installed() -> Option<Arc<dyn ProxyResolver>> {
    INSTALLED.get().cloned()
}

/// Whether a resolver has been installed
pub fn is_installed() -> bool {
    INSTALLED.get().is_some()
}
