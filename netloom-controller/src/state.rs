//! Shared state handed to every HTTP handler.

use std::sync::Arc;

use crate::controller::Controller;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
}
