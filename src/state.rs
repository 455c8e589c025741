// src/state.rs

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::{config::Config, utils::upload::UploadStore};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub uploads: UploadStore,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let uploads = UploadStore::new(config.upload_dir.clone());
        Self {
            pool,
            config,
            uploads,
        }
    }
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for UploadStore {
    fn from_ref(state: &AppState) -> Self {
        state.uploads.clone()
    }
}
