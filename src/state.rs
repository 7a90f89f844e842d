use crate::hunter::Hunter;
use crate::storage::FileRemote;

#[derive(Clone)]
pub struct AppState {
    pub hunter: Hunter<FileRemote>,
}

impl AppState {
    pub fn new(hunter: Hunter<FileRemote>) -> Self {
        Self { hunter }
    }
}
