use crate::{
    api::{ApiClient, ApiError, UserResponse},
    state::{
        controller::{SessionController, SubscriptionId},
        session::{AuthSnapshot, SessionStatus},
    },
};
use leptos::*;

type AuthContext = (ReadSignal<AuthState>, WriteSignal<AuthState>);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    pub user: Option<UserResponse>,
    pub is_authenticated: bool,
    pub loading: bool,
    pub status: SessionStatus,
}

impl AuthState {
    fn apply(&mut self, snapshot: &AuthSnapshot) {
        self.user = snapshot.user.clone();
        self.is_authenticated = snapshot.is_authenticated;
        self.status = snapshot.status;
    }
}

impl From<&AuthSnapshot> for AuthState {
    fn from(snapshot: &AuthSnapshot) -> Self {
        let mut state = AuthState::default();
        state.apply(snapshot);
        state
    }
}

#[derive(Clone)]
pub struct LoginInput {
    pub username: String,
    pub password: String,
    pub remember_me: bool,
}

/// Mirrors every controller change into `set_state`.
pub fn bind_auth_state(
    controller: &SessionController,
    set_state: WriteSignal<AuthState>,
) -> SubscriptionId {
    let snapshot = controller.snapshot();
    set_state.update(|state| state.apply(&snapshot));
    controller.subscribe(move |snapshot| {
        // The owning scope may already be gone.
        let _ = set_state.try_update(|state| state.apply(snapshot));
    })
}

fn create_auth_context(controller: SessionController) -> AuthContext {
    let (auth_state, set_auth_state) = create_signal(AuthState {
        loading: true,
        ..AuthState::from(&controller.snapshot())
    });

    let id = bind_auth_state(&controller, set_auth_state);
    let unsubscribe = controller.clone();
    on_cleanup(move || unsubscribe.unsubscribe(id));

    spawn_local(async move {
        controller.check_auth().await;
        let _ = set_auth_state.try_update(|state| state.loading = false);
    });

    (auth_state, set_auth_state)
}

#[component]
pub fn AuthProvider(
    #[prop(optional)] controller: Option<SessionController>,
    children: Children,
) -> impl IntoView {
    let controller = controller.unwrap_or_else(use_session_controller);
    provide_context(controller.clone());
    let ctx = create_auth_context(controller);
    provide_context::<AuthContext>(ctx);
    view! { <>{children()}</> }
}

pub fn use_auth() -> AuthContext {
    use_context::<AuthContext>().unwrap_or_else(|| create_signal(AuthState::default()))
}

pub fn use_session_controller() -> SessionController {
    use_context::<SessionController>()
        .unwrap_or_else(|| SessionController::with_defaults(ApiClient::new()))
}

pub fn use_login_action() -> Action<LoginInput, Result<(), ApiError>> {
    let controller = use_session_controller();
    create_action(move |input: &LoginInput| {
        let input = input.clone();
        let controller = controller.clone();
        async move {
            controller
                .login(&input.username, &input.password, input.remember_me)
                .await
                .map(|_| ())
        }
    })
}

pub fn use_logout_action() -> Action<(), ()> {
    let controller = use_session_controller();
    create_action(move |_: &()| {
        let controller = controller.clone();
        async move { controller.logout().await }
    })
}

/// Input is the user's answer to the confirmation prompt; the result is
/// `Ok(false)` when they declined.
pub fn use_logout_everywhere_action() -> Action<bool, Result<bool, ApiError>> {
    let controller = use_session_controller();
    create_action(move |confirmed: &bool| {
        let confirmed = *confirmed;
        let controller = controller.clone();
        async move { controller.logout_everywhere_with(|| confirmed).await }
    })
}
