//! Menu bar display state, owned by the main thread.

use crate::session::view::{UiUpdate, ViewState};
use once_cell::sync::OnceCell;
use std::sync::{Arc, Mutex};

/// Global application state.
pub static APP_STATE: OnceCell<Arc<AppState>> = OnceCell::new();

/// Initialize the global application state.
pub fn init_app_state() -> Arc<AppState> {
    APP_STATE.get_or_init(|| Arc::new(AppState::new())).clone()
}

/// Get the global application state.
pub fn get_app_state() -> Option<Arc<AppState>> {
    APP_STATE.get().cloned()
}

#[derive(Debug, Default)]
pub struct AppState {
    view: Mutex<ViewState>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> ViewState {
        self.view.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn apply(&self, update: UiUpdate) {
        if let Ok(mut view) = self.view.lock() {
            view.apply(update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state() {
        let state = AppState::new();
        assert!(!state.view().sign_out_enabled);

        state.apply(UiUpdate::Account(Some("jane".into())));
        assert_eq!(state.view().label, "jane");
        assert!(state.view().sign_out_enabled);

        state.apply(UiUpdate::SignOutEnabled(false));
        assert!(!state.view().sign_out_enabled);
    }
}
