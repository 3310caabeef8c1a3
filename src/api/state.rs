use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    auth::AuthKeys,
    services::{CatalogClient, ListService, RecommendationService},
};

/// Shared application state, cloned into every handler
#[derive(Clone)]
pub struct AppState {
    pub lists: Arc<ListService>,
    pub recommendations: Arc<RecommendationService>,
    pub catalog: Arc<dyn CatalogClient>,
    pub auth: AuthKeys,
}

impl FromRef<AppState> for AuthKeys {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}
