use axum::extract::FromRef;

use crate::listening::AggregateMaintainer;
use std::time::Instant;

use super::ServerConfig;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub maintainer: AggregateMaintainer,
}

impl ServerState {
    pub fn new(config: ServerConfig, maintainer: AggregateMaintainer) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            maintainer,
        }
    }
}

impl FromRef<ServerState> for AggregateMaintainer {
    fn from_ref(input: &ServerState) -> Self {
        input.maintainer.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
