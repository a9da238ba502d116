//! Display state shared by the front ends.

use crate::auth::account::Account;
use crate::session::Presenter;
use tokio::sync::mpsc;
use tracing::debug;

pub const SIGNED_OUT_LABEL: &str = "Signed out";

/// One change to the displayed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiUpdate {
    /// Username label; `None` when signed out.
    Account(Option<String>),
    SignOutEnabled(bool),
    Log(String),
}

impl UiUpdate {
    pub fn account(account: Option<&Account>) -> Self {
        UiUpdate::Account(account.map(|a| a.display_name().to_string()))
    }
}

/// What the user currently sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    pub label: String,
    pub sign_out_enabled: bool,
    pub log: String,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            label: SIGNED_OUT_LABEL.to_string(),
            sign_out_enabled: false,
            log: String::new(),
        }
    }
}

impl ViewState {
    pub fn apply(&mut self, update: UiUpdate) {
        match update {
            UiUpdate::Account(Some(name)) => {
                self.label = name;
                self.sign_out_enabled = true;
            }
            UiUpdate::Account(None) => {
                self.label = SIGNED_OUT_LABEL.to_string();
                self.sign_out_enabled = false;
            }
            UiUpdate::SignOutEnabled(enabled) => self.sign_out_enabled = enabled,
            // The log view shows the latest message only
            UiUpdate::Log(text) => self.log = text,
        }
    }

    /// The first `max_lines` lines of the log, each cut to `width` chars.
    pub fn log_preview(&self, max_lines: usize, width: usize) -> Vec<String> {
        let mut lines: Vec<String> = self
            .log
            .lines()
            .take(max_lines)
            .map(|line| {
                if line.chars().count() > width {
                    let cut: String = line.chars().take(width.saturating_sub(1)).collect();
                    format!("{}…", cut)
                } else {
                    line.to_string()
                }
            })
            .collect();
        if self.log.lines().count() > max_lines {
            lines.push("…".to_string());
        }
        lines
    }
}

/// Presenter that forwards updates to a render task.
pub struct ChannelPresenter {
    tx: mpsc::UnboundedSender<UiUpdate>,
}

impl ChannelPresenter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UiUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, update: UiUpdate) {
        if self.tx.send(update).is_err() {
            debug!("Render task is gone, dropping UI update");
        }
    }
}

impl Presenter for ChannelPresenter {
    fn show_account(&self, account: Option<&Account>) {
        self.send(UiUpdate::account(account));
    }

    fn set_sign_out_enabled(&self, enabled: bool) {
        self.send(UiUpdate::SignOutEnabled(enabled));
    }

    fn log(&self, text: &str) {
        self.send(UiUpdate::Log(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::account::tests::test_account;

    #[test]
    fn test_apply_account() {
        let mut view = ViewState::default();
        assert_eq!(view.label, SIGNED_OUT_LABEL);
        assert!(!view.sign_out_enabled);

        view.apply(UiUpdate::Account(Some("jane".into())));
        assert_eq!(view.label, "jane");
        assert!(view.sign_out_enabled);

        view.apply(UiUpdate::Account(None));
        assert_eq!(view, ViewState::default());
    }

    #[test]
    fn test_log_replaces_text() {
        let mut view = ViewState::default();
        view.apply(UiUpdate::Log("first".into()));
        view.apply(UiUpdate::Log("second".into()));
        assert_eq!(view.log, "second");
    }

    #[test]
    fn test_log_preview() {
        let mut view = ViewState::default();
        assert!(view.log_preview(3, 10).is_empty());

        view.apply(UiUpdate::Log("short\nthis line is too long\nc\nd".into()));
        assert_eq!(
            view.log_preview(3, 10),
            vec!["short", "this line…", "c", "…"]
        );
        assert_eq!(view.log_preview(10, 100).len(), 4);
    }

    #[test]
    fn test_channel_presenter_forwards_in_order() {
        let (presenter, mut rx) = ChannelPresenter::new();
        let jane = test_account("id-jane", "jane@example.com");

        presenter.show_account(Some(&jane));
        presenter.set_sign_out_enabled(false);
        presenter.log("hello");

        assert_eq!(
            rx.try_recv().unwrap(),
            UiUpdate::Account(Some("jane@example.com".into()))
        );
        assert_eq!(rx.try_recv().unwrap(), UiUpdate::SignOutEnabled(false));
        assert_eq!(rx.try_recv().unwrap(), UiUpdate::Log("hello".into()));
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (presenter, rx) = ChannelPresenter::new();
        drop(rx);
        presenter.log("nobody listening");
    }
}
