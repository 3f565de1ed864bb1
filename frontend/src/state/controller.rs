//! Client-side session controller.
//!
//! Owns the sign-in state machine and every mutation of the session: login,
//! logout, single-flight token refresh, and the retry-once flow for protected
//! API calls that come back 401. UI code observes it through
//! [`SessionController::subscribe`]; see `state::auth` for the Leptos binding.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use log::{debug, info, warn};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    api::{
        auth::{ME_PATH, REVOKE_ALL_PATH},
        ApiClient, ApiError, ApiResponse, LoginRequest, LoginResponse, UserResponse,
    },
    config::{self, SessionSettings},
    state::session::{AuthSnapshot, PersistedSession, Session, SessionStatus},
    utils::{
        single_flight::SingleFlight,
        storage::{self, KeyValueStore},
        time::{Clock, SystemClock},
    },
};

pub type SubscriptionId = u64;
type Listener = Rc<dyn Fn(&AuthSnapshot)>;

/// Shared handle; clones drive the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Rc<Inner>,
}

struct Inner {
    api: ApiClient,
    store: Rc<dyn KeyValueStore>,
    clock: Rc<dyn Clock>,
    settings: SessionSettings,
    session: RefCell<Session>,
    status: Cell<SessionStatus>,
    // Bumped by every login and every clear. In-flight work compares it
    // before writing so a stale result never resurrects a cleared session.
    epoch: Cell<u64>,
    login_flight: SingleFlight<Result<UserResponse, ApiError>, LoginRequest>,
    refresh_flight: SingleFlight<bool>,
    listeners: RefCell<Vec<(SubscriptionId, Listener)>>,
    next_listener: Cell<SubscriptionId>,
}

/// Puts a transient status back when the flight that set it is dropped
/// before finishing.
struct SettleOnDrop {
    controller: SessionController,
    transient: SessionStatus,
}

impl Drop for SettleOnDrop {
    fn drop(&mut self) {
        if self.controller.status() == self.transient {
            debug!("{:?} abandoned", self.transient);
            self.controller.settle_status();
        }
    }
}

fn session_expired() -> ApiError {
    ApiError::unauthorized("Your session has expired. Please sign in again.")
}

impl SessionController {
    pub fn new(
        api: ApiClient,
        store: Rc<dyn KeyValueStore>,
        clock: Rc<dyn Clock>,
        settings: SessionSettings,
    ) -> Self {
        let controller = Self {
            inner: Rc::new(Inner {
                api,
                store,
                clock,
                settings,
                session: RefCell::new(Session::default()),
                status: Cell::new(SessionStatus::Anonymous),
                epoch: Cell::new(0),
                login_flight: SingleFlight::new(),
                refresh_flight: SingleFlight::new(),
                listeners: RefCell::new(Vec::new()),
                next_listener: Cell::new(1),
            }),
        };
        controller.restore();
        controller
    }

    /// Browser storage, wall clock, and settings from the runtime config.
    pub fn with_defaults(api: ApiClient) -> Self {
        Self::new(
            api,
            storage::default_store(),
            Rc::new(SystemClock),
            config::session_settings(),
        )
    }

    fn downgrade(&self) -> Weak<Inner> {
        Rc::downgrade(&self.inner)
    }

    fn upgrade(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    // --- observation -------------------------------------------------------

    pub fn status(&self) -> SessionStatus {
        self.inner.status.get()
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        AuthSnapshot::capture(self.status(), &self.inner.session.borrow())
    }

    pub fn user(&self) -> Option<UserResponse> {
        self.inner.session.borrow().user.clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.session.borrow().access_token.clone()
    }

    pub fn token_expiry(&self) -> Option<i64> {
        self.inner.session.borrow().token_expiry
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.session.borrow().is_authenticated()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.refresh_flight.is_pending()
    }

    pub fn is_token_expired(&self) -> bool {
        self.inner
            .session
            .borrow()
            .is_token_expired(self.inner.clock.now_millis())
    }

    pub fn subscribe(&self, listener: impl Fn(&AuthSnapshot) + 'static) -> SubscriptionId {
        let id = self.inner.next_listener.get();
        self.inner.next_listener.set(id + 1);
        self.inner
            .listeners
            .borrow_mut()
            .push((id, Rc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner
            .listeners
            .borrow_mut()
            .retain(|(listener_id, _)| *listener_id != id);
    }

    fn notify(&self) {
        let snapshot = self.snapshot();
        // Listeners may subscribe or read state, so no borrow is held while
        // they run.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&snapshot);
        }
    }

    fn set_status(&self, status: SessionStatus) {
        if self.inner.status.get() != status {
            debug!("session: {:?} -> {:?}", self.inner.status.get(), status);
            self.inner.status.set(status);
            self.notify();
        }
    }

    fn settle_status(&self) {
        let status = if self.is_authenticated() {
            SessionStatus::Authenticated
        } else {
            SessionStatus::Anonymous
        };
        self.set_status(status);
    }

    fn bump_epoch(&self) {
        self.inner.epoch.set(self.inner.epoch.get() + 1);
    }

    // --- persistence -------------------------------------------------------

    fn restore(&self) {
        let key = &self.inner.settings.storage_key;
        let raw = match self.inner.store.get_item(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(err) => {
                warn!("Could not read persisted session: {}", err);
                return;
            }
        };

        let restored = serde_json::from_str::<PersistedSession>(&raw)
            .ok()
            .and_then(PersistedSession::into_session);
        match restored {
            Some(session) => {
                debug!("Restored remembered session");
                *self.inner.session.borrow_mut() = session;
                self.inner.status.set(SessionStatus::Authenticated);
            }
            None => {
                warn!("Discarding unusable persisted session");
                if let Err(err) = self.inner.store.remove_item(key) {
                    warn!("Could not remove persisted session: {}", err);
                }
            }
        }
    }

    fn persist(&self) {
        let key = &self.inner.settings.storage_key;
        let session = self.inner.session.borrow();
        let result = if session.remember_me && session.is_authenticated() {
            match serde_json::to_string(&PersistedSession::from_session(&session)) {
                Ok(json) => self.inner.store.set_item(key, &json),
                Err(err) => {
                    warn!("Could not serialize session: {}", err);
                    return;
                }
            }
        } else {
            self.inner.store.remove_item(key)
        };
        if let Err(err) = result {
            warn!("Could not update persisted session: {}", err);
        }
    }

    /// Drops token, expiry and user in one step. `ended` publishes
    /// `LoggedOut` before settling on `Anonymous`.
    fn clear_session(&self, ended: bool) {
        self.bump_epoch();
        *self.inner.session.borrow_mut() = Session::default();
        self.persist();
        if ended {
            self.inner.status.set(SessionStatus::LoggedOut);
            self.notify();
        }
        self.inner.status.set(SessionStatus::Anonymous);
        self.notify();
    }

    fn apply_login(&self, response: LoginResponse, remember_me: bool) {
        let expiry = self
            .inner
            .clock
            .now_millis()
            .saturating_add(response.expires_in.saturating_mul(1000));
        self.bump_epoch();
        *self.inner.session.borrow_mut() = Session {
            access_token: Some(response.access_token),
            token_expiry: Some(expiry),
            user: Some(response.user),
            remember_me,
        };
        self.inner.status.set(SessionStatus::Authenticated);
        self.persist();
        self.notify();
    }

    // --- operations --------------------------------------------------------

    /// Signs in. A call repeating the pending sign-in's exact credentials and
    /// `remember_me` joins it instead of sending them again; any other call
    /// made meanwhile is rejected.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<UserResponse, ApiError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(ApiError::validation("Username and password are required"));
        }
        let request = LoginRequest {
            username: username.trim().to_string(),
            password: password.to_string(),
            remember_me,
        };
        if self.inner.login_flight.conflicts_with(&request) {
            return Err(ApiError::validation("Another sign-in is already in progress"));
        }
        let weak = self.downgrade();
        let key = request.clone();
        self.inner
            .login_flight
            .run_keyed(key, move || async move {
                match Self::upgrade(&weak) {
                    Some(controller) => {
                        let _settle = SettleOnDrop {
                            controller: controller.clone(),
                            transient: SessionStatus::Authenticating,
                        };
                        controller.perform_login(request).await
                    }
                    None => Err(ApiError::unknown("Session controller was dropped")),
                }
            })
            .await
    }

    async fn perform_login(&self, request: LoginRequest) -> Result<UserResponse, ApiError> {
        self.set_status(SessionStatus::Authenticating);
        match self.inner.api.login(&request).await {
            Ok(response) => {
                let user = response.user.clone();
                self.apply_login(response, request.remember_me);
                info!("Signed in as {}", user.label());
                Ok(user)
            }
            Err(err) => {
                warn!("Sign-in failed: {} ({})", err, err.code);
                self.clear_session(false);
                Err(err)
            }
        }
    }

    /// Always signs out locally. The server is told afterwards on a
    /// best-effort basis; its failures are only logged.
    pub async fn logout(&self) {
        let token = self.access_token();
        self.clear_session(true);
        info!("Signed out");
        if let Err(err) = self.inner.api.logout(token.as_deref()).await {
            warn!("Server-side logout failed: {} ({})", err, err.code);
        }
    }

    /// Revokes every session server-side. Local state is only cleared once
    /// the server confirms; on error it is left untouched.
    pub async fn logout_everywhere(&self) -> Result<(), ApiError> {
        self.send_authorized(Method::POST, REVOKE_ALL_PATH, None)
            .await?
            .error_for_status("Failed to sign out of all sessions")?;
        self.clear_session(true);
        info!("Signed out of all sessions");
        Ok(())
    }

    /// [`Self::logout_everywhere`] behind a confirmation. `Ok(false)` when the
    /// user declined, in which case nothing is sent.
    pub async fn logout_everywhere_with<C>(&self, confirm: C) -> Result<bool, ApiError>
    where
        C: FnOnce() -> bool,
    {
        if !confirm() {
            debug!("Sign out everywhere cancelled");
            return Ok(false);
        }
        self.logout_everywhere().await.map(|_| true)
    }

    /// Exchanges the current token for a new one. Concurrent callers share a
    /// single request and its result. `false` leaves the session cleared;
    /// `LoggedOut` is only published when there was a session to end.
    pub async fn refresh_token(&self) -> bool {
        let weak = self.downgrade();
        self.inner
            .refresh_flight
            .run(move || async move {
                match Self::upgrade(&weak) {
                    Some(controller) => {
                        let _settle = SettleOnDrop {
                            controller: controller.clone(),
                            transient: SessionStatus::Refreshing,
                        };
                        controller.perform_refresh().await
                    }
                    None => false,
                }
            })
            .await
    }

    async fn perform_refresh(&self) -> bool {
        let epoch = self.inner.epoch.get();
        let token = self.access_token();
        let had_session = token.is_some() || self.is_authenticated();
        if self.status() == SessionStatus::Authenticated {
            self.set_status(SessionStatus::Refreshing);
        }

        let outcome = self.inner.api.refresh_token(token.as_deref()).await;

        if self.inner.epoch.get() != epoch {
            debug!("Session changed during refresh; discarding result");
            return self.is_authenticated();
        }

        match outcome {
            Ok(refreshed) => {
                let expiry = self
                    .inner
                    .clock
                    .now_millis()
                    .saturating_add(refreshed.expires_in.saturating_mul(1000));
                {
                    let mut session = self.inner.session.borrow_mut();
                    session.access_token = Some(refreshed.access_token);
                    session.token_expiry = Some(expiry);
                    if let Some(user) = refreshed.user {
                        session.user = Some(user);
                    }
                }
                let status = if self.is_authenticated() {
                    SessionStatus::Authenticated
                } else {
                    SessionStatus::Anonymous
                };
                self.inner.status.set(status);
                self.persist();
                self.notify();
                debug!("Session refreshed");
                true
            }
            Err(err) => {
                warn!("Session refresh failed: {} ({})", err, err.code);
                self.clear_session(had_session);
                false
            }
        }
    }

    /// Resolves whether the user is signed in, refreshing an expired token
    /// first. Makes no request when there is no token at all.
    pub async fn check_auth(&self) -> bool {
        if self.access_token().is_none() {
            return false;
        }
        if self.is_token_expired() {
            return self.refresh_token().await && self.is_authenticated();
        }
        if self.inner.settings.verify_on_check {
            if let Err(err) = self.fetch_current_user().await {
                if err.is_unauthorized() {
                    debug!("Session rejected while reconfirming identity");
                } else {
                    warn!("Could not reconfirm session: {} ({})", err, err.code);
                }
            }
        }
        self.is_authenticated()
    }

    pub async fn fetch_current_user(&self) -> Result<UserResponse, ApiError> {
        let epoch = self.inner.epoch.get();
        let user: UserResponse = self.fetch_json(Method::GET, ME_PATH, None).await?;
        if self.inner.epoch.get() == epoch && self.access_token().is_some() {
            self.inner.session.borrow_mut().user = Some(user.clone());
            self.persist();
            self.notify();
        }
        Ok(user)
    }

    // --- protected calls ---------------------------------------------------

    /// Sends a bearer-authenticated request. A 401 triggers (or joins) one
    /// refresh and the request is re-sent once with the new token; a second
    /// 401 ends the session.
    pub async fn send_authorized(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<ApiResponse, ApiError> {
        let known_stale = self.access_token().is_some() && self.is_token_expired();
        if (known_stale || self.is_refreshing()) && !self.refresh_token().await {
            return Err(session_expired());
        }
        let token = self
            .access_token()
            .ok_or_else(|| ApiError::unauthorized("Not signed in"))?;
        let epoch = self.inner.epoch.get();
        let url = self.inner.api.endpoint(path).await;

        let first = self.dispatch(&method, &url, body, &token).await?;
        if !first.is_unauthorized() {
            return Ok(first);
        }

        debug!("{} {} returned 401; refreshing session", method, path);
        // Someone else may already have swapped the token while this request
        // was out; then there is nothing to refresh, only to retry.
        let refreshed = if self.access_token().as_deref() == Some(token.as_str()) {
            self.refresh_token().await
        } else {
            self.is_authenticated()
        };
        if !refreshed {
            return Err(session_expired());
        }
        let token = self.access_token().ok_or_else(session_expired)?;

        let retry = self.dispatch(&method, &url, body, &token).await?;
        if retry.is_unauthorized() {
            warn!("{} {} rejected after refresh; ending session", method, path);
            if self.inner.epoch.get() == epoch {
                self.clear_session(true);
            }
            return Err(session_expired());
        }
        Ok(retry)
    }

    /// [`Self::send_authorized`] plus status check and JSON decoding.
    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ApiError> {
        self.send_authorized(method, path, body)
            .await?
            .error_for_status("Request failed")?
            .json()
    }

    async fn dispatch(
        &self,
        method: &Method,
        url: &str,
        body: Option<&Value>,
        token: &str,
    ) -> Result<ApiResponse, ApiError> {
        let mut builder = self
            .inner
            .api
            .http_client()
            .request(method.clone(), url)
            .bearer_auth(token);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        self.inner.api.execute(builder).await
    }
}
