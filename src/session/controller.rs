//! Session controller: load account, acquire token, sign out, call the API.

use crate::auth::account::{Account, PersistedAccount};
use crate::auth::authority::KnownAuthorities;
use crate::auth::graph::{GraphClient, GraphResponse};
use crate::auth::identity::{
    B2cIdentityClient, DeviceInformation, IdentityClient, InteractiveParameters,
    SignOutParameters, SilentParameters, TokenResult,
};
use crate::auth::token_cache::{format_duration, time_until_expiry};
use crate::config::Config;
use crate::error::{AppError, ConfigError, NetworkError};
use crate::keychain::secure::SecureString;
use crate::keychain::SecureStore;
use crate::session::{Presenter, SessionAction};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Observable session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    SignedOut,
    SignedIn(Account),
}

impl SessionState {
    pub fn account(&self) -> Option<&Account> {
        match self {
            SessionState::SignedIn(account) => Some(account),
            SessionState::SignedOut => None,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(self, SessionState::SignedIn(_))
    }
}

/// Fixed inputs of the controller.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub authorities: KnownAuthorities,
    pub scopes: Vec<String>,
    /// Secure store key of the persisted account hint.
    pub account_key: String,
}

impl SessionSettings {
    /// Build the sign-in and edit-profile authorities and the scope list.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            authorities: KnownAuthorities::from_config(&config.b2c)?,
            scopes: config.oauth.scopes.scopes.clone(),
            account_key: config.keychain.account_key.clone(),
        })
    }
}

/// Drives the two-state session machine against the identity client.
pub struct SessionController {
    settings: SessionSettings,
    identity: Arc<dyn IdentityClient>,
    store: Arc<dyn SecureStore>,
    presenter: Arc<dyn Presenter>,
    graph: GraphClient,
    state: SessionState,
    access_token: SecureString,
}

impl SessionController {
    pub fn new(
        settings: SessionSettings,
        identity: Arc<dyn IdentityClient>,
        store: Arc<dyn SecureStore>,
        presenter: Arc<dyn Presenter>,
        graph: GraphClient,
    ) -> Self {
        Self {
            settings,
            identity,
            store,
            presenter,
            graph,
            state: SessionState::SignedOut,
            access_token: SecureString::default(),
        }
    }

    /// Validate the configured authorities and wire up the B2C identity
    /// client over `store`.
    pub fn initialize(
        config: &Config,
        store: Arc<dyn SecureStore>,
        presenter: Arc<dyn Presenter>,
    ) -> Result<Self, AppError> {
        let settings = SessionSettings::from_config(config)?;
        let identity = B2cIdentityClient::new(config, Arc::clone(&store))?;
        info!(
            "Session initialized for {} (edit profile: {})",
            settings.authorities.sign_in(),
            settings.authorities.edit_profile()
        );
        Ok(Self::new(
            settings,
            Arc::new(identity),
            store,
            presenter,
            GraphClient::new(&config.api.graph_endpoint),
        ))
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn access_token(&self) -> &SecureString {
        &self.access_token
    }

    /// Process actions until every sender is gone.
    pub async fn run(mut self, mut actions: mpsc::Receiver<SessionAction>) -> Self {
        info!("Session controller started");
        while let Some(action) = actions.recv().await {
            self.handle(action).await;
        }
        info!("Session controller stopped");
        self
    }

    /// Run one action. Failures are reported through the presenter.
    pub async fn handle(&mut self, action: SessionAction) {
        info!("Handling {:?}", action);
        // Errors have already been reported by the operation itself
        let _ = match action {
            SessionAction::LoadAccount => self.load_current_account().await.map(|_| ()),
            SessionAction::Authorize => self.acquire_token().await,
            SessionAction::SignOut => self.sign_out().await,
            SessionAction::CallApi => self.call_authenticated_endpoint().await.map(|_| ()),
            SessionAction::DeviceInfo => self.device_information().await.map(|_| ()),
        };
    }

    /// Resolve the current account: the identity client's own notion first,
    /// then the persisted identifier.
    pub async fn load_current_account(&mut self) -> Result<Option<Account>, AppError> {
        let current = match self.identity.current_account().await {
            Ok(current) => current,
            Err(e) => {
                let e = AppError::from(e);
                self.report("Couldn't query current account with error", &e);
                return Err(e);
            }
        };

        if let Some(account) = current {
            self.log(&format!(
                "Found a signed in account {}. Updating data for that account...",
                account.display_name()
            ));
            self.update_current_account(Some(account.clone()));
            return Ok(Some(account));
        }

        let persisted = self.load_persisted_account();
        if let Some(persisted) = &persisted {
            match self.identity.account_for_identifier(&persisted.identifier).await {
                Ok(Some(account)) => {
                    info!("Resolved persisted account {}", account.identifier);
                    self.update_current_account(Some(account.clone()));
                    return Ok(Some(account));
                }
                Ok(None) => info!("Persisted account {} is not cached", persisted.identifier),
                Err(e) => warn!("Lookup of persisted account failed: {}", e),
            }
        }

        let identifier = persisted
            .as_ref()
            .map(|p| p.identifier.as_str())
            .unwrap_or("none");
        self.log(&format!(
            "Account signed out. Updating UX. Identifier in Keychain: {}",
            identifier
        ));
        self.access_token = SecureString::default();
        self.update_current_account(None);
        Ok(None)
    }

    /// Acquire a token: silently for a known account, interactively otherwise.
    pub async fn acquire_token(&mut self) -> Result<(), AppError> {
        match self.load_current_account().await? {
            Some(account) => self.acquire_token_silently(account).await,
            None => self.acquire_token_interactively(None).await,
        }
    }

    /// Silent acquisition for `account`, falling back to the interactive
    /// flow once when the identity client asks for interaction.
    pub async fn acquire_token_silently(&mut self, account: Account) -> Result<(), AppError> {
        let login_hint = account.username.clone();
        let params = SilentParameters {
            scopes: self.settings.scopes.clone(),
            account,
            authority: self.settings.authorities.sign_in().clone(),
        };

        match self.identity.acquire_token_silent(&params).await {
            Ok(result) => {
                self.persist_account(&result.account);
                self.store_token(&result, "Refreshed access token");
                self.presenter.set_sign_out_enabled(true);
                Ok(())
            }
            Err(e) if e.is_interaction_required() => {
                info!("Silent acquisition needs interaction: {}", e);
                self.acquire_token_interactively(login_hint).await
            }
            Err(e) => {
                let e = AppError::from(e);
                self.report("Could not acquire token silently", &e);
                Err(e)
            }
        }
    }

    /// Interactive acquisition through the browser. Never retried.
    ///
    /// `login_hint` pre-fills the username when falling back from a known
    /// account.
    pub async fn acquire_token_interactively(
        &mut self,
        login_hint: Option<String>,
    ) -> Result<(), AppError> {
        let params = InteractiveParameters {
            scopes: self.settings.scopes.clone(),
            authority: self.settings.authorities.sign_in().clone(),
            login_hint,
        };

        match self.identity.acquire_token_interactive(&params).await {
            Ok(result) => {
                self.store_token(&result, "Access token acquired");
                self.update_current_account(Some(result.account.clone()));
                self.persist_account(&result.account);
                Ok(())
            }
            Err(e) => {
                let e = AppError::from(e);
                self.report("Could not acquire token", &e);
                Err(e)
            }
        }
    }

    /// Sign the current account out. A no-op when signed out.
    pub async fn sign_out(&mut self) -> Result<(), AppError> {
        let Some(account) = self.state.account().cloned() else {
            return Ok(());
        };

        let params = SignOutParameters {
            sign_out_from_browser: false,
        };

        match self.identity.sign_out(&account, &params).await {
            Ok(()) => {
                self.log("Sign out completed successfully");
                self.access_token = SecureString::default();
                self.update_current_account(None);
                Ok(())
            }
            Err(e) => {
                let e = AppError::from(e);
                self.report("Couldn't sign out account with error", &e);
                Err(e)
            }
        }
    }

    /// GET the Graph endpoint with the in-memory token and log the raw body.
    pub async fn call_authenticated_endpoint(&self) -> Result<GraphResponse, AppError> {
        if self.access_token.is_empty() {
            let e = AppError::from(NetworkError::NoAccessToken);
            self.report("Couldn't call the API", &e);
            return Err(e);
        }

        info!("Calling {}", self.graph.endpoint());
        match self.graph.get_me(&self.access_token).await {
            Ok(response) => {
                let body = serde_json::to_string_pretty(&response.body)
                    .unwrap_or_else(|_| response.body.to_string());
                self.log(&format!("Result from Graph (HTTP {}): {}", response.status, body));
                Ok(response)
            }
            Err(e) => {
                let e = AppError::from(e);
                self.report("Couldn't call the API", &e);
                Err(e)
            }
        }
    }

    /// Ask the identity client whether this is a shared device.
    pub async fn device_information(&self) -> Result<DeviceInformation, AppError> {
        match self.identity.device_information().await {
            Ok(info) => {
                self.log(&format!(
                    "Received device info. Device is in the {} mode.",
                    info.mode.as_str()
                ));
                Ok(info)
            }
            Err(e) => {
                let e = AppError::from(e);
                self.report("Device info not returned. Error", &e);
                Err(e)
            }
        }
    }

    fn update_current_account(&mut self, account: Option<Account>) {
        self.presenter.show_account(account.as_ref());
        self.state = match account {
            Some(account) => SessionState::SignedIn(account),
            None => SessionState::SignedOut,
        };
    }

    fn store_token(&mut self, result: &TokenResult, what: &str) {
        self.access_token = result.access_token.clone();
        let remaining = time_until_expiry(result.expires_on)
            .map(format_duration)
            .unwrap_or_else(|| "expired".to_string());
        self.log(&format!(
            "{} for {} (token {}, expires in {})",
            what,
            result.account.display_name(),
            self.access_token.fingerprint(),
            remaining
        ));
        info!(
            "Token issued by {} for scopes [{}]",
            result.authority,
            result.scopes.join(" ")
        );
    }

    fn load_persisted_account(&self) -> Option<PersistedAccount> {
        match self.store.get_string(&self.settings.account_key) {
            Ok(Some(value)) => PersistedAccount::parse(&value),
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to read persisted account: {}", e);
                None
            }
        }
    }

    fn persist_account(&self, account: &Account) {
        let snapshot = PersistedAccount::from(account);
        let result = snapshot
            .to_json()
            .map_err(|e| e.to_string())
            .and_then(|json| {
                self.store
                    .set(json.as_bytes(), &self.settings.account_key)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            warn!("Failed to persist account {}: {}", account.identifier, e);
        }
    }

    fn log(&self, text: &str) {
        info!("{}", text);
        self.presenter.log(text);
    }

    fn report(&self, context: &str, err: &impl Display) {
        let text = format!("{}: {}", context, err);
        error!("{}", text);
        self.presenter.log(&text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::account::tests::test_account;
    use crate::auth::identity::DeviceMode;
    use crate::config::tests::test_config;
    use crate::error::AuthError;
    use crate::keychain::MemoryStore;
    use crate::session::testing::RecordingPresenter;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scriptable identity client.
    #[derive(Default)]
    struct FakeIdentity {
        current: Mutex<Option<Account>>,
        cached: Mutex<Vec<Account>>,
        current_error: Mutex<Option<AuthError>>,
        silent_results: Mutex<VecDeque<Result<TokenResult, AuthError>>>,
        interactive_results: Mutex<VecDeque<Result<TokenResult, AuthError>>>,
        sign_out_error: Mutex<Option<AuthError>>,
        login_hints: Mutex<Vec<Option<String>>>,
        silent_calls: AtomicUsize,
        interactive_calls: AtomicUsize,
        sign_out_calls: AtomicUsize,
    }

    impl FakeIdentity {
        fn with_cached(self, account: Account) -> Self {
            self.cached.lock().unwrap().push(account);
            self
        }

        fn with_current(self, account: Account) -> Self {
            *self.current.lock().unwrap() = Some(account);
            self
        }

        fn push_silent(&self, result: Result<TokenResult, AuthError>) {
            self.silent_results.lock().unwrap().push_back(result);
        }

        fn push_interactive(&self, result: Result<TokenResult, AuthError>) {
            self.interactive_results.lock().unwrap().push_back(result);
        }

        fn silent_calls(&self) -> usize {
            self.silent_calls.load(Ordering::SeqCst)
        }

        fn interactive_calls(&self) -> usize {
            self.interactive_calls.load(Ordering::SeqCst)
        }

        fn login_hints(&self) -> Vec<Option<String>> {
            self.login_hints.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl IdentityClient for FakeIdentity {
        async fn all_accounts(&self) -> Result<Vec<Account>, AuthError> {
            Ok(self.cached.lock().unwrap().clone())
        }

        async fn current_account(&self) -> Result<Option<Account>, AuthError> {
            if let Some(e) = self.current_error.lock().unwrap().take() {
                return Err(e);
            }
            Ok(self.current.lock().unwrap().clone())
        }

        async fn account_for_identifier(
            &self,
            identifier: &str,
        ) -> Result<Option<Account>, AuthError> {
            Ok(self
                .cached
                .lock()
                .unwrap()
                .iter()
                .find(|a| a.identifier == identifier)
                .cloned())
        }

        async fn acquire_token_interactive(
            &self,
            params: &InteractiveParameters,
        ) -> Result<TokenResult, AuthError> {
            self.interactive_calls.fetch_add(1, Ordering::SeqCst);
            self.login_hints.lock().unwrap().push(params.login_hint.clone());
            self.interactive_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(AuthError::UserCancelled))
        }

        async fn acquire_token_silent(
            &self,
            params: &SilentParameters,
        ) -> Result<TokenResult, AuthError> {
            self.silent_calls.fetch_add(1, Ordering::SeqCst);
            self.silent_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    Err(AuthError::InteractionRequired(params.account.identifier.clone()))
                })
        }

        async fn sign_out(
            &self,
            account: &Account,
            _params: &SignOutParameters,
        ) -> Result<(), AuthError> {
            self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(e) = self.sign_out_error.lock().unwrap().take() {
                return Err(e);
            }
            self.cached
                .lock()
                .unwrap()
                .retain(|a| a.identifier != account.identifier);
            *self.current.lock().unwrap() = None;
            Ok(())
        }

        async fn device_information(&self) -> Result<DeviceInformation, AuthError> {
            Ok(DeviceInformation {
                mode: DeviceMode::Shared,
                extra: BTreeMap::new(),
            })
        }
    }

    struct Harness {
        controller: SessionController,
        identity: Arc<FakeIdentity>,
        store: Arc<MemoryStore>,
        presenter: Arc<RecordingPresenter>,
    }

    fn harness(identity: FakeIdentity) -> Harness {
        let identity = Arc::new(identity);
        let store = Arc::new(MemoryStore::new());
        let presenter = Arc::new(RecordingPresenter::default());
        let settings = SessionSettings::from_config(&test_config()).unwrap();
        let controller = SessionController::new(
            settings,
            identity.clone(),
            store.clone(),
            presenter.clone(),
            GraphClient::new("http://127.0.0.1:9/"),
        );
        Harness {
            controller,
            identity,
            store,
            presenter,
        }
    }

    fn token_for(account: &Account, token: &str) -> TokenResult {
        let settings = SessionSettings::from_config(&test_config()).unwrap();
        TokenResult {
            access_token: SecureString::from(token),
            account: account.clone(),
            expires_on: Utc::now() + Duration::hours(1),
            scopes: settings.scopes.clone(),
            authority: settings.authorities.sign_in().clone(),
        }
    }

    fn persisted(h: &Harness) -> Option<PersistedAccount> {
        h.store
            .get_string("accountIdentifier")
            .unwrap()
            .and_then(|v| PersistedAccount::parse(&v))
    }

    #[test]
    fn test_settings_reject_bad_authority() {
        let mut config = test_config();
        config.b2c.authority_host = "bad host".into();
        assert!(matches!(
            SessionSettings::from_config(&config),
            Err(ConfigError::InvalidAuthority { .. })
        ));
    }

    #[tokio::test]
    async fn test_fresh_install_goes_interactive() {
        let mut h = harness(FakeIdentity::default());
        let jane = test_account("id-jane", "jane@example.com");
        h.identity.push_interactive(Ok(token_for(&jane, "at-1")));

        assert_eq!(h.controller.load_current_account().await.unwrap(), None);
        assert_eq!(h.controller.state(), &SessionState::SignedOut);
        assert!(h.controller.access_token().is_empty());
        assert_eq!(h.presenter.label().as_deref(), Some("Signed out"));
        assert!(!h.presenter.sign_out_enabled());

        h.controller.acquire_token().await.unwrap();

        assert_eq!(h.identity.silent_calls(), 0);
        assert_eq!(h.identity.interactive_calls(), 1);
        assert_eq!(h.identity.login_hints(), vec![None]);
        assert!(h.controller.state().is_signed_in());
        assert_eq!(h.controller.state(), &SessionState::SignedIn(jane.clone()));
        assert_eq!(h.controller.access_token().as_str(), "at-1");
        assert!(h.presenter.sign_out_enabled());
        assert_eq!(h.presenter.label().as_deref(), Some("jane@example.com"));

        let snapshot = persisted(&h).unwrap();
        assert_eq!(snapshot.identifier, "id-jane");
        assert_eq!(snapshot.username.as_deref(), Some("jane@example.com"));
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let mut h = harness(FakeIdentity::default());
        h.controller.load_current_account().await.unwrap();
        let first = h.controller.state().clone();
        h.controller.load_current_account().await.unwrap();
        assert_eq!(h.controller.state(), &first);

        let jane = test_account("id-jane", "jane@example.com");
        let mut h = harness(FakeIdentity::default().with_current(jane.clone()));
        h.controller.load_current_account().await.unwrap();
        h.controller.load_current_account().await.unwrap();
        assert_eq!(h.controller.state(), &SessionState::SignedIn(jane));
    }

    #[tokio::test]
    async fn test_load_with_resolved_hint_is_idempotent() {
        let jane = test_account("id-jane", "jane@example.com");
        let mut h = harness(FakeIdentity::default().with_cached(jane.clone()));
        let snapshot = PersistedAccount::from(&jane).to_json().unwrap();
        h.store.set(snapshot.as_bytes(), "accountIdentifier").unwrap();

        let first = h.controller.load_current_account().await.unwrap();
        let first_state = h.controller.state().clone();
        let second = h.controller.load_current_account().await.unwrap();

        assert_eq!(first, Some(jane.clone()));
        assert_eq!(second, first);
        assert_eq!(h.controller.state(), &first_state);
        assert_eq!(h.controller.state(), &SessionState::SignedIn(jane));
        assert_eq!(h.presenter.label().as_deref(), Some("jane@example.com"));
        assert!(h.controller.access_token().is_empty());
        assert_eq!(h.identity.silent_calls(), 0);
        assert_eq!(h.identity.interactive_calls(), 0);
        assert_eq!(persisted(&h).unwrap().identifier, "id-jane");
    }

    #[tokio::test]
    async fn test_persisted_identifier_goes_silent() {
        let jane = test_account("id-jane", "jane@example.com");
        let mut h = harness(FakeIdentity::default().with_cached(jane.clone()));
        h.store.set(b"id-jane", "accountIdentifier").unwrap();
        h.identity.push_silent(Ok(token_for(&jane, "at-silent")));

        assert_eq!(
            h.controller.load_current_account().await.unwrap(),
            Some(jane.clone())
        );
        assert_eq!(h.controller.state(), &SessionState::SignedIn(jane.clone()));

        h.controller.acquire_token().await.unwrap();

        assert_eq!(h.identity.silent_calls(), 1);
        assert_eq!(h.identity.interactive_calls(), 0);
        assert_eq!(h.controller.access_token().as_str(), "at-silent");
        assert!(h.presenter.sign_out_enabled());

        // The legacy bare identifier was upgraded to a full snapshot
        let snapshot = persisted(&h).unwrap();
        assert_eq!(snapshot.identifier, "id-jane");
        assert_eq!(snapshot.environment.as_deref(), Some("contoso.b2clogin.com"));
    }

    #[tokio::test]
    async fn test_current_account_takes_precedence_over_hint() {
        let jane = test_account("id-jane", "jane@example.com");
        let bob = test_account("id-bob", "bob@example.com");
        let mut h = harness(
            FakeIdentity::default()
                .with_current(jane.clone())
                .with_cached(bob),
        );
        h.store.set(b"id-bob", "accountIdentifier").unwrap();

        assert_eq!(h.controller.load_current_account().await.unwrap(), Some(jane));
    }

    #[tokio::test]
    async fn test_unresolvable_hint_signs_out_and_clears_token() {
        let jane = test_account("id-jane", "jane@example.com");
        let mut h = harness(FakeIdentity::default());
        h.identity.push_interactive(Ok(token_for(&jane, "at-1")));
        h.controller.acquire_token().await.unwrap();
        assert!(!h.controller.access_token().is_empty());

        // Identity client knows nothing about the persisted identifier
        assert_eq!(h.controller.load_current_account().await.unwrap(), None);
        assert_eq!(h.controller.state(), &SessionState::SignedOut);
        assert!(h.controller.access_token().is_empty());
        assert!(h
            .presenter
            .last_log()
            .unwrap()
            .contains("Identifier in Keychain: id-jane"));
    }

    #[tokio::test]
    async fn test_interaction_required_falls_back_once() {
        let jane = test_account("id-jane", "jane@example.com");
        let mut h = harness(FakeIdentity::default().with_current(jane.clone()));
        h.identity
            .push_silent(Err(AuthError::InteractionRequired("invalid_grant".into())));
        h.identity
            .push_interactive(Err(AuthError::InteractionRequired("invalid_grant".into())));

        let result = h.controller.acquire_token().await;

        assert!(matches!(
            result,
            Err(AppError::Auth(AuthError::InteractionRequired(_)))
        ));
        assert_eq!(h.identity.silent_calls(), 1);
        assert_eq!(h.identity.interactive_calls(), 1);
        assert!(h.controller.access_token().is_empty());
        assert_eq!(h.controller.state(), &SessionState::SignedIn(jane));
        assert!(h
            .presenter
            .last_log()
            .unwrap()
            .starts_with("Could not acquire token: "));
    }

    #[tokio::test]
    async fn test_interaction_required_then_interactive_success() {
        let jane = test_account("id-jane", "jane@example.com");
        let mut h = harness(FakeIdentity::default().with_current(jane.clone()));
        h.identity
            .push_silent(Err(AuthError::InteractionRequired("expired".into())));
        h.identity.push_interactive(Ok(token_for(&jane, "at-new")));

        h.controller.acquire_token().await.unwrap();

        assert_eq!(h.identity.interactive_calls(), 1);
        assert_eq!(
            h.identity.login_hints(),
            vec![Some("jane@example.com".to_string())]
        );
        assert_eq!(h.controller.access_token().as_str(), "at-new");
        assert!(h.presenter.sign_out_enabled());
    }

    #[tokio::test]
    async fn test_other_silent_failure_is_not_retried() {
        let jane = test_account("id-jane", "jane@example.com");
        let mut h = harness(FakeIdentity::default().with_current(jane.clone()));
        h.identity
            .push_silent(Err(AuthError::TokenRefreshFailed("HTTP 500".into())));

        assert!(h.controller.acquire_token().await.is_err());
        assert_eq!(h.identity.interactive_calls(), 0);
        assert_eq!(h.controller.state(), &SessionState::SignedIn(jane));
        assert!(h
            .presenter
            .last_log()
            .unwrap()
            .starts_with("Could not acquire token silently: "));
    }

    #[tokio::test]
    async fn test_interactive_cancel_keeps_signed_out() {
        let mut h = harness(FakeIdentity::default());
        h.identity.push_interactive(Err(AuthError::UserCancelled));

        assert!(h.controller.acquire_token().await.is_err());
        assert_eq!(h.controller.state(), &SessionState::SignedOut);
        assert!(h.controller.access_token().is_empty());
        assert!(persisted(&h).is_none());
    }

    #[tokio::test]
    async fn test_sign_out_while_signed_out_is_noop() {
        let mut h = harness(FakeIdentity::default());
        assert!(h.controller.sign_out().await.is_ok());
        assert_eq!(h.identity.sign_out_calls.load(Ordering::SeqCst), 0);
        assert!(h.presenter.logs().is_empty());
    }

    #[tokio::test]
    async fn test_sign_out_clears_session() {
        let jane = test_account("id-jane", "jane@example.com");
        let mut h = harness(FakeIdentity::default());
        h.identity.push_interactive(Ok(token_for(&jane, "at-1")));
        h.controller.acquire_token().await.unwrap();

        h.controller.sign_out().await.unwrap();

        assert_eq!(h.controller.state(), &SessionState::SignedOut);
        assert!(h.controller.access_token().is_empty());
        assert!(!h.presenter.sign_out_enabled());
        assert_eq!(h.presenter.label().as_deref(), Some("Signed out"));
        assert_eq!(
            h.presenter.last_log().as_deref(),
            Some("Sign out completed successfully")
        );
    }

    #[tokio::test]
    async fn test_sign_out_failure_keeps_state() {
        let jane = test_account("id-jane", "jane@example.com");
        let mut h = harness(FakeIdentity::default());
        h.identity.push_interactive(Ok(token_for(&jane, "at-1")));
        h.controller.acquire_token().await.unwrap();
        *h.identity.sign_out_error.lock().unwrap() =
            Some(AuthError::AccountNotFound("id-jane".into()));

        assert!(h.controller.sign_out().await.is_err());
        assert_eq!(h.controller.state(), &SessionState::SignedIn(jane));
        assert_eq!(h.controller.access_token().as_str(), "at-1");
    }

    #[tokio::test]
    async fn test_current_account_error_leaves_state() {
        let jane = test_account("id-jane", "jane@example.com");
        let mut h = harness(FakeIdentity::default().with_current(jane.clone()));
        h.controller.load_current_account().await.unwrap();

        *h.identity.current_error.lock().unwrap() =
            Some(AuthError::OAuthFailed("keychain locked".into()));
        assert!(h.controller.acquire_token().await.is_err());

        assert_eq!(h.controller.state(), &SessionState::SignedIn(jane));
        assert_eq!(h.identity.silent_calls(), 0);
        assert_eq!(h.identity.interactive_calls(), 0);
    }

    #[tokio::test]
    async fn test_call_endpoint_requires_token() {
        let h = harness(FakeIdentity::default());
        let result = h.controller.call_authenticated_endpoint().await;
        assert!(matches!(
            result,
            Err(AppError::Network(NetworkError::NoAccessToken))
        ));
        assert!(h
            .presenter
            .last_log()
            .unwrap()
            .contains("No access token"));
    }

    #[tokio::test]
    async fn test_device_information_is_logged() {
        let h = harness(FakeIdentity::default());
        h.controller.device_information().await.unwrap();
        assert_eq!(
            h.presenter.last_log().as_deref(),
            Some("Received device info. Device is in the shared mode.")
        );
    }

    #[tokio::test]
    async fn test_run_processes_actions_in_order() {
        let jane = test_account("id-jane", "jane@example.com");
        let h = harness(FakeIdentity::default());
        h.identity.push_interactive(Ok(token_for(&jane, "at-1")));

        let (tx, rx) = mpsc::channel(8);
        tx.send(SessionAction::LoadAccount).await.unwrap();
        tx.send(SessionAction::Authorize).await.unwrap();
        tx.send(SessionAction::SignOut).await.unwrap();
        tx.send(SessionAction::SignOut).await.unwrap();
        drop(tx);

        let controller = h.controller.run(rx).await;

        assert_eq!(controller.state(), &SessionState::SignedOut);
        assert!(controller.access_token().is_empty());
        assert_eq!(h.identity.interactive_calls(), 1);
        assert_eq!(h.identity.sign_out_calls.load(Ordering::SeqCst), 1);
    }
}
