//! Terminal front end for platforms without a menu bar.
//!
//! Commands read from stdin become [`SessionAction`]s. A render task applies
//! the controller's updates to the view state and prints them.

use crate::session::view::{UiUpdate, ViewState};
use crate::session::SessionAction;
use anyhow::Result;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

const HELP: &str = "\
Commands:
  authorize   acquire a token (silently when possible)
  signout     sign the current account out
  call        call the Graph API with the current token
  device      show device information
  reload      re-read the current account
  log         print the last log message again
  help        show this help
  quit        exit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Action(SessionAction),
    ShowLog,
    Help,
    Quit,
}

/// Parse one input line. Blank lines parse to `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let command = match line.trim().to_ascii_lowercase().as_str() {
        "" => return Ok(None),
        "authorize" | "auth" | "a" => Command::Action(SessionAction::Authorize),
        "signout" | "sign-out" | "logout" => Command::Action(SessionAction::SignOut),
        "call" | "api" | "graph" => Command::Action(SessionAction::CallApi),
        "device" | "info" => Command::Action(SessionAction::DeviceInfo),
        "reload" | "load" => Command::Action(SessionAction::LoadAccount),
        "log" => Command::ShowLog,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("Unknown command '{}', type 'help'", other)),
    };
    Ok(Some(command))
}

/// Apply `update` and return the text to print, if any.
pub fn render(view: &mut ViewState, update: UiUpdate) -> Option<String> {
    let line = match &update {
        UiUpdate::Account(Some(name)) => Some(format!("Signed in as {}", name)),
        UiUpdate::Account(None) => Some("Signed out".to_string()),
        UiUpdate::SignOutEnabled(_) => None,
        UiUpdate::Log(text) => Some(text.clone()),
    };
    view.apply(update);
    line
}

/// Run the prompt until `quit` or end of input.
pub async fn run(
    actions: mpsc::Sender<SessionAction>,
    mut updates: mpsc::UnboundedReceiver<UiUpdate>,
) -> Result<()> {
    let view = Arc::new(Mutex::new(ViewState::default()));

    let render_view = Arc::clone(&view);
    let renderer = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            let line = match render_view.lock() {
                Ok(mut view) => render(&mut view, update),
                Err(_) => None,
            };
            if let Some(line) = line {
                println!("{}", line);
            }
        }
        debug!("Render task finished");
    });

    println!("{}", HELP);
    prompt();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_command(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(Command::Help)) => println!("{}", HELP),
            Ok(Some(Command::ShowLog)) => {
                let log = view.lock().map(|v| v.log.clone()).unwrap_or_default();
                println!("{}", log);
            }
            Ok(Some(Command::Action(SessionAction::SignOut)))
                if !view.lock().map(|v| v.sign_out_enabled).unwrap_or(false) =>
            {
                println!("Sign Out is not available while signed out");
            }
            Ok(Some(Command::Action(action))) => {
                if actions.send(action).await.is_err() {
                    break;
                }
            }
            Err(message) => println!("{}", message),
        }
        prompt();
    }

    info!("Console closed");
    drop(actions);
    renderer.abort();
    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("  "), Ok(None));
        assert_eq!(
            parse_command("Authorize"),
            Ok(Some(Command::Action(SessionAction::Authorize)))
        );
        assert_eq!(
            parse_command("signout\n"),
            Ok(Some(Command::Action(SessionAction::SignOut)))
        );
        assert_eq!(
            parse_command("reload"),
            Ok(Some(Command::Action(SessionAction::LoadAccount)))
        );
        assert_eq!(parse_command("log"), Ok(Some(Command::ShowLog)));
        assert_eq!(parse_command("q"), Ok(Some(Command::Quit)));
        assert!(parse_command("frobnicate").is_err());
    }

    #[test]
    fn test_render() {
        let mut view = ViewState::default();

        assert_eq!(
            render(&mut view, UiUpdate::Account(Some("jane".into()))).as_deref(),
            Some("Signed in as jane")
        );
        assert!(view.sign_out_enabled);

        assert_eq!(render(&mut view, UiUpdate::SignOutEnabled(false)), None);
        assert!(!view.sign_out_enabled);

        assert_eq!(
            render(&mut view, UiUpdate::Log("hello".into())).as_deref(),
            Some("hello")
        );
        assert_eq!(view.log, "hello");
    }
}
