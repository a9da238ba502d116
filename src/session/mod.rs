//! Account session: the signed-in/signed-out state machine and its driver.
//!
//! The controller owns the current account and the in-memory access token.
//! UI front ends send [`SessionAction`]s over a channel; the controller task
//! handles them one at a time and reports back through a [`Presenter`].

pub mod controller;
pub mod view;

use crate::auth::account::Account;

pub use controller::SessionController;

/// Actions the UI can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Re-read the current account (start-up, app foregrounded).
    LoadAccount,
    /// Acquire a token, silently when possible.
    Authorize,
    SignOut,
    /// Call the authenticated API with the current token.
    CallApi,
    DeviceInfo,
}

/// Receives session state for display.
///
/// Called from the controller task. Implementations must hop onto their
/// presentation context before touching UI state.
pub trait Presenter: Send + Sync {
    /// Update the username label and Sign Out enablement for `account`.
    fn show_account(&self, account: Option<&Account>);

    fn set_sign_out_enabled(&self, enabled: bool);

    /// Replace the log view text.
    fn log(&self, text: &str);
}
