//! Menu item action delegates.
//!
//! Menu clicks become [`SessionAction`]s for the controller task.

use objc2::mutability::MainThreadOnly;
use objc2::rc::Retained;
use objc2::{declare_class, msg_send_id, ClassType, DeclaredClass};
use objc2_app_kit::NSPasteboard;
use objc2_foundation::{MainThreadMarker, NSObject, NSObjectProtocol, NSString};
use once_cell::sync::OnceCell;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::menubar::state::get_app_state;
use crate::session::SessionAction;

/// Channel for sending menu actions to the Tokio runtime.
static ACTION_SENDER: OnceCell<mpsc::Sender<SessionAction>> = OnceCell::new();

/// Initialize the action channel. Returns `None` if already initialized.
pub fn init_action_channel() -> Option<mpsc::Receiver<SessionAction>> {
    let (tx, rx) = mpsc::channel(10);
    ACTION_SENDER.set(tx).ok()?;
    Some(rx)
}

/// Send an action to be processed.
pub fn send_action(action: SessionAction) {
    if let Some(sender) = ACTION_SENDER.get() {
        if let Err(e) = sender.try_send(action) {
            error!("Failed to send menu action: {}", e);
        }
    }
}

declare_class!(
    pub struct MenuActionTarget;

    unsafe impl ClassType for MenuActionTarget {
        type Super = NSObject;
        type Mutability = MainThreadOnly;
        const NAME: &'static str = "B2cMenuActionTarget";
    }

    impl DeclaredClass for MenuActionTarget {}

    unsafe impl NSObjectProtocol for MenuActionTarget {}

    unsafe impl MenuActionTarget {
        #[method(authorize:)]
        fn authorize(&self, _sender: &NSObject) {
            info!("Authorize clicked");
            send_action(SessionAction::Authorize);
        }

        #[method(signOut:)]
        fn sign_out(&self, _sender: &NSObject) {
            info!("Sign Out clicked");
            send_action(SessionAction::SignOut);
        }

        #[method(callApi:)]
        fn call_api(&self, _sender: &NSObject) {
            info!("Call Graph API clicked");
            send_action(SessionAction::CallApi);
        }

        #[method(deviceInfo:)]
        fn device_info(&self, _sender: &NSObject) {
            info!("Get Device Info clicked");
            send_action(SessionAction::DeviceInfo);
        }

        #[method(copyLog:)]
        fn copy_log(&self, _sender: &NSObject) {
            if let Some(mtm) = MainThreadMarker::new() {
                copy_log_to_clipboard(mtm);
            }
        }
    }
);

impl MenuActionTarget {
    pub fn new(mtm: MainThreadMarker) -> Retained<Self> {
        unsafe { msg_send_id![mtm.alloc::<Self>(), init] }
    }
}

/// Copy the log view text to the clipboard.
pub fn copy_log_to_clipboard(_mtm: MainThreadMarker) {
    let text = get_app_state().map(|s| s.view().log).unwrap_or_default();
    if text.is_empty() {
        info!("Log is empty, nothing to copy");
        return;
    }

    unsafe {
        let pasteboard = NSPasteboard::generalPasteboard();
        pasteboard.clearContents();
        // NSPasteboardTypeString
        let type_str = NSString::from_str("public.utf8-plain-text");
        pasteboard.setString_forType(&NSString::from_str(&text), &type_str);
    }

    info!("Log copied to clipboard");
}
