//! Presenter that applies session updates on the main thread.
//!
//! All AppKit operations run on the main thread.

use crate::auth::account::Account;
use crate::menubar::builder::MenuBar;
use crate::menubar::state::get_app_state;
use crate::session::view::UiUpdate;
use crate::session::Presenter;
use dispatch::Queue;
use objc2_foundation::MainThreadMarker;
use tracing::debug;

/// Presenter backed by the status bar menu.
pub struct MenuBarPresenter;

impl Presenter for MenuBarPresenter {
    fn show_account(&self, account: Option<&Account>) {
        apply(UiUpdate::account(account));
    }

    fn set_sign_out_enabled(&self, enabled: bool) {
        apply(UiUpdate::SignOutEnabled(enabled));
    }

    fn log(&self, text: &str) {
        apply(UiUpdate::Log(text.to_string()));
    }
}

/// Apply `update` to the app state and rebuild the menu.
fn apply(update: UiUpdate) {
    dispatch_to_main(move || {
        if let Some(mtm) = MainThreadMarker::new() {
            debug!("UI update: {:?}", update);
            if let Some(state) = get_app_state() {
                state.apply(update);
            }
            MenuBar::rebuild_menu(mtm);
        }
    });
}

/// Helper to dispatch a closure to the main thread.
fn dispatch_to_main<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    if MainThreadMarker::new().is_some() {
        f();
    } else {
        Queue::main().exec_async(f);
    }
}
