//! Shared router state. Everything here is built once at startup and read-only afterwards.

use crate::error::ConfigError;
use crate::extractors::CallerIdentity;
use crate::schema::Registry;
use axum::extract::FromRef;
use regex::Regex;
use std::sync::Arc;

/// Path ids the record routes accept.
pub const ID_PATTERN: &str = "^[0-9]+$";

pub struct DispatchState<H> {
    pub handlers: Arc<H>,
    pub registry: Arc<Registry>,
    pub identity: Arc<dyn CallerIdentity>,
    pub id_pattern: Regex,
}

impl<H> DispatchState<H> {
    pub fn new(handlers: Arc<H>, registry: Arc<Registry>, identity: Arc<dyn CallerIdentity>) -> Result<Self, ConfigError> {
        let id_pattern = Regex::new(ID_PATTERN).map_err(|e| ConfigError::Validation(e.to_string()))?;
        Ok(Self {
            handlers,
            registry,
            identity,
            id_pattern,
        })
    }
}

impl<H> Clone for DispatchState<H> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
            registry: self.registry.clone(),
            identity: self.identity.clone(),
            id_pattern: self.id_pattern.clone(),
        }
    }
}

impl<H> FromRef<DispatchState<H>> for Arc<dyn CallerIdentity> {
    fn from_ref(state: &DispatchState<H>) -> Self {
        state.identity.clone()
    }
}
