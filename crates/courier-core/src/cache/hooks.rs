//! Named pre-send hooks.
//!
//! A cached descriptor only stores a hook name; the action behind it is
//! registered here at startup.

use crate::request::RequestDescriptor;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Future returned by a pre-send hook.
pub type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Out-of-band handler that takes over delivery of a cached request.
pub type PreSendHook = Arc<dyn Fn(RequestDescriptor) -> HookFuture + Send + Sync>;

/// Registry of pre-send hooks by name.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<String, PreSendHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` under `name`, replacing any previous hook.
    pub fn register<F, Fut>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn(RequestDescriptor) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        debug!("Registered pre-send hook '{}'", name);
        let hook: PreSendHook = Arc::new(move |descriptor| Box::pin(hook(descriptor)));
        self.hooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, hook);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.hooks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some()
    }

    pub fn get(&self, name: &str) -> Option<PreSendHook> {
        self.hooks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hooks = self.hooks.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<&String> = hooks.keys().collect();
        names.sort();
        f.debug_struct("HookRegistry").field("hooks", &names).finish()
    }
}
