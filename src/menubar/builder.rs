//! Menu bar and menu construction using AppKit.

use crate::menubar::delegate::MenuActionTarget;
use crate::menubar::state::get_app_state;
use crate::session::view::ViewState;
use objc2::rc::Retained;
use objc2::runtime::Sel;
use objc2::sel;
use objc2_app_kit::{
    NSImage, NSMenu, NSMenuItem, NSStatusBar, NSStatusItem, NSVariableStatusItemLength,
};
use objc2_foundation::{MainThreadMarker, NSString};
use once_cell::sync::OnceCell;
use std::sync::Mutex;
use tracing::{debug, info};

const LOG_PREVIEW_LINES: usize = 20;
const LOG_PREVIEW_WIDTH: usize = 80;

/// Global menu bar instance.
static MENU_BAR: OnceCell<Mutex<MenuBarInner>> = OnceCell::new();

/// Menu bar wrapper that holds the status item and menu.
pub struct MenuBarInner {
    /// Retained to keep the status item alive (never read, but must not be dropped).
    _status_item: Retained<NSStatusItem>,
    pub menu: Retained<NSMenu>,
    pub action_target: Retained<MenuActionTarget>,
}

// SAFETY: MenuBarInner is only accessed from the main thread via MainThreadMarker checks.
unsafe impl Send for MenuBarInner {}
unsafe impl Sync for MenuBarInner {}

impl MenuBarInner {
    fn new(mtm: MainThreadMarker) -> Self {
        info!("Creating menu bar");

        let action_target = MenuActionTarget::new(mtm);

        unsafe {
            let status_bar = NSStatusBar::systemStatusBar();
            let status_item = status_bar.statusItemWithLength(NSVariableStatusItemLength);

            if let Some(button) = status_item.button(mtm) {
                let symbol_name = NSString::from_str("person.badge.key");

                if let Some(image) = NSImage::imageWithSymbolName_variableValue(&symbol_name, 1.0)
                {
                    // Template images adapt to dark/light menu bar
                    image.setTemplate(true);
                    button.setImage(Some(&image));
                } else {
                    button.setTitle(&NSString::from_str("B2C"));
                }
            }

            let menu = NSMenu::new(mtm);
            // Sign Out enablement is driven by session state, not the responder chain
            menu.setAutoenablesItems(false);
            status_item.setMenu(Some(&menu));

            Self {
                _status_item: status_item,
                menu,
                action_target,
            }
        }
    }
}

/// Public menu bar API.
pub struct MenuBar;

impl MenuBar {
    /// Create the status item and build the initial menu.
    pub fn init(mtm: MainThreadMarker) {
        MENU_BAR.get_or_init(|| Mutex::new(MenuBarInner::new(mtm)));
        Self::rebuild_menu(mtm);
    }

    /// Rebuild the menu from the current view state.
    pub fn rebuild_menu(mtm: MainThreadMarker) {
        let view = get_app_state().map(|s| s.view()).unwrap_or_default();
        if let Some(menu_bar) = MENU_BAR.get() {
            if let Ok(inner) = menu_bar.lock() {
                build_menu(mtm, &inner, &view);
            }
        }
    }
}

fn build_menu(mtm: MainThreadMarker, inner: &MenuBarInner, view: &ViewState) {
    let menu = &inner.menu;
    let target = Some(&*inner.action_target);

    unsafe {
        menu.removeAllItems();
    }

    add_disabled(mtm, menu, &view.label);
    menu.addItem(&NSMenuItem::separatorItem(mtm));

    menu.addItem(&create_menu_item(mtm, "Authorize", Some(sel!(authorize:)), target));

    let sign_out_item = create_menu_item(mtm, "Sign Out", Some(sel!(signOut:)), target);
    unsafe {
        sign_out_item.setEnabled(view.sign_out_enabled);
    }
    menu.addItem(&sign_out_item);

    menu.addItem(&create_menu_item(mtm, "Call Graph API", Some(sel!(callApi:)), target));
    menu.addItem(&create_menu_item(
        mtm,
        "Get Device Info",
        Some(sel!(deviceInfo:)),
        target,
    ));

    menu.addItem(&NSMenuItem::separatorItem(mtm));

    let log_menu = NSMenu::new(mtm);
    let preview = view.log_preview(LOG_PREVIEW_LINES, LOG_PREVIEW_WIDTH);
    if preview.is_empty() {
        add_disabled(mtm, &log_menu, "No log yet");
    }
    for line in &preview {
        add_disabled(mtm, &log_menu, line);
    }
    let log_item = create_menu_item(mtm, "Log", None, None);
    log_item.setSubmenu(Some(&log_menu));
    menu.addItem(&log_item);

    menu.addItem(&create_menu_item(mtm, "Copy Log", Some(sel!(copyLog:)), target));

    menu.addItem(&NSMenuItem::separatorItem(mtm));

    let quit_item = create_menu_item(mtm, "Quit", Some(sel!(terminate:)), None);
    unsafe {
        quit_item.setKeyEquivalent(&NSString::from_str("q"));
    }
    menu.addItem(&quit_item);

    debug!("Built menu for {}", view.label);
}

fn add_disabled(mtm: MainThreadMarker, menu: &NSMenu, title: &str) {
    let item = create_menu_item(mtm, title, None, None);
    unsafe {
        item.setEnabled(false);
    }
    menu.addItem(&item);
}

/// Create a menu item with the given title, action, and optional target.
fn create_menu_item(
    mtm: MainThreadMarker,
    title: &str,
    action: Option<Sel>,
    target: Option<&MenuActionTarget>,
) -> Retained<NSMenuItem> {
    let ns_title = NSString::from_str(title);
    let key_equiv = NSString::from_str("");

    let item = unsafe {
        NSMenuItem::initWithTitle_action_keyEquivalent(mtm.alloc(), &ns_title, action, &key_equiv)
    };

    // System actions like terminate: go to the responder chain
    if action.is_some() && action != Some(sel!(terminate:)) {
        if let Some(target) = target {
            unsafe {
                item.setTarget(Some(target));
            }
        }
    }

    item
}
