//! Build script that generates Info.plist for the macOS application bundle.
//!
//! Bundle name, identifier and version come from the `[app]` table of
//! config.toml. The app is menu bar only (LSUIElement). The OAuth redirect
//! is a loopback HTTP listener, so no URL scheme is registered.

use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Deserialize)]
struct BuildConfig {
    app: AppSection,
}

#[derive(Deserialize)]
struct AppSection {
    name: String,
    version: String,
    bundle_identifier: String,
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=config.toml");

    let raw = fs::read_to_string("config.toml").expect("Failed to read config.toml");
    let config: BuildConfig = toml::from_str(&raw).expect("Invalid [app] table in config.toml");
    let app = config.app;

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let plist_path = Path::new(&out_dir).join("Info.plist");

    let plist_content = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>CFBundleIdentifier</key>
    <string>{identifier}</string>

    <key>CFBundleName</key>
    <string>{name}</string>

    <key>CFBundleDisplayName</key>
    <string>{name}</string>

    <key>CFBundleExecutable</key>
    <string>{executable}</string>

    <key>CFBundleVersion</key>
    <string>{version}</string>

    <key>CFBundleShortVersionString</key>
    <string>{version}</string>

    <key>CFBundlePackageType</key>
    <string>APPL</string>

    <!-- No dock icon - menu bar only -->
    <key>LSUIElement</key>
    <true/>

    <key>LSMinimumSystemVersion</key>
    <string>11.0</string>

    <key>NSHighResolutionCapable</key>
    <true/>

    <key>NSPrincipalClass</key>
    <string>NSApplication</string>
</dict>
</plist>
"#,
        identifier = xml_escape(&app.bundle_identifier),
        name = xml_escape(&app.name),
        executable = env::var("CARGO_PKG_NAME").unwrap_or_else(|_| "b2c-session".into()),
        version = xml_escape(&app.version),
    );

    fs::write(&plist_path, plist_content).expect("Failed to write Info.plist");

    println!("cargo:rustc-env=INFO_PLIST_PATH={}", plist_path.display());
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
