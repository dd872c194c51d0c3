use std::sync::Arc;

use crate::messaging::Messenger;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub messenger: Messenger,
    pub jwt_secret: String,
}
