//! Sign-in state on top of an opaque identity provider.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::FutureExt as _;
use futures::future::LocalBoxFuture;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("Sign-in failed: {0}")]
    SignIn(String),
    #[error("Sign-out failed: {0}")]
    SignOut(String),
    #[error("No credential available: {0}")]
    Credential(String),
    #[error("Not signed in")]
    SignedOut,
}

/// The external authentication service, e.g. a popup/redirect OAuth flow.
pub trait IdentityProvider {
    /// `Ok(None)` means the user cancelled.
    fn sign_in_interactive(&self) -> LocalBoxFuture<'_, Result<Option<Identity>, IdentityError>>;

    fn sign_out(&self) -> LocalBoxFuture<'_, Result<(), IdentityError>>;

    fn current_identity(&self) -> Option<Identity>;

    /// A bearer token for remote calls made on behalf of `identity`.
    fn credential<'a>(
        &'a self,
        identity: &'a Identity,
    ) -> LocalBoxFuture<'a, Result<String, IdentityError>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    SignedOut,
    SignedIn(Identity),
}

/// Tracks whether someone is signed in.
///
/// The session only moves between states. Reacting to a transition (fetching the profile,
/// reconciling, falling back to local-only mode) is up to the owner.
pub struct IdentitySession {
    provider: Rc<dyn IdentityProvider>,
    state: RefCell<SessionState>,
}

impl std::fmt::Debug for IdentitySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentitySession")
            .field("state", &self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl IdentitySession {
    /// Starts in whatever state the provider already reports, e.g. a remembered login.
    pub fn new(provider: Rc<dyn IdentityProvider>) -> Self {
        let state = match provider.current_identity() {
            Some(identity) => SessionState::SignedIn(identity),
            None => SessionState::SignedOut,
        };
        Self {
            provider,
            state: RefCell::new(state),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        match &*self.state.borrow() {
            SessionState::SignedIn(identity) => Some(identity.clone()),
            SessionState::SignedOut => None,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        matches!(*self.state.borrow(), SessionState::SignedIn(_))
    }

    /// Returns the new identity, or `None` if the user cancelled. On failure the session stays
    /// signed out.
    pub async fn sign_in(&self) -> Result<Option<Identity>, IdentityError> {
        let identity = self
            .provider
            .sign_in_interactive()
            .await
            .inspect_err(|e| log::error!("Sign-in error: {e}"))?;

        match &identity {
            Some(identity) => {
                log::info!("Signed in as {}", identity.user_id);
                *self.state.borrow_mut() = SessionState::SignedIn(identity.clone());
            }
            None => log::info!("Sign-in cancelled"),
        }
        Ok(identity)
    }

    /// Always ends signed out locally, even if the provider reports an error.
    pub async fn sign_out(&self) -> Result<(), IdentityError> {
        let result = self.provider.sign_out().await;
        *self.state.borrow_mut() = SessionState::SignedOut;
        log::info!("Signed out");
        result
    }

    pub async fn credential(&self) -> Result<String, IdentityError> {
        let identity = self.identity().ok_or(IdentityError::SignedOut)?;
        self.provider.credential(&identity).await
    }
}

/// A provider with a fixed identity and token, e.g. taken from the environment.
#[derive(Debug)]
pub struct StaticTokenProvider {
    identity: Identity,
    token: String,
    signed_in: Cell<bool>,
}

impl StaticTokenProvider {
    pub fn new(identity: Identity, token: impl Into<String>) -> Self {
        Self {
            identity,
            token: token.into(),
            signed_in: Cell::new(false),
        }
    }

    /// Like `new`, but already signed in.
    pub fn signed_in(identity: Identity, token: impl Into<String>) -> Self {
        let provider = Self::new(identity, token);
        provider.signed_in.set(true);
        provider
    }
}

impl IdentityProvider for StaticTokenProvider {
    fn sign_in_interactive(&self) -> LocalBoxFuture<'_, Result<Option<Identity>, IdentityError>> {
        async move {
            if self.token.is_empty() {
                return Err(IdentityError::SignIn("no token configured".to_string()));
            }
            self.signed_in.set(true);
            Ok(Some(self.identity.clone()))
        }
        .boxed_local()
    }

    fn sign_out(&self) -> LocalBoxFuture<'_, Result<(), IdentityError>> {
        self.signed_in.set(false);
        futures::future::ready(Ok(())).boxed_local()
    }

    fn current_identity(&self) -> Option<Identity> {
        self.signed_in.get().then(|| self.identity.clone())
    }

    fn credential<'a>(
        &'a self,
        identity: &'a Identity,
    ) -> LocalBoxFuture<'a, Result<String, IdentityError>> {
        let result = if !self.signed_in.get() || identity != &self.identity {
            Err(IdentityError::Credential(format!(
                "no token for {}",
                identity.user_id
            )))
        } else {
            Ok(self.token.clone())
        };
        futures::future::ready(result).boxed_local()
    }
}

/// A provider whose interactive flow never completes successfully.
#[derive(Debug, Default)]
pub struct SignedOutProvider;

impl IdentityProvider for SignedOutProvider {
    fn sign_in_interactive(&self) -> LocalBoxFuture<'_, Result<Option<Identity>, IdentityError>> {
        futures::future::ready(Err(IdentityError::SignIn(
            "no identity provider configured".to_string(),
        )))
        .boxed_local()
    }

    fn sign_out(&self) -> LocalBoxFuture<'_, Result<(), IdentityError>> {
        futures::future::ready(Ok(())).boxed_local()
    }

    fn current_identity(&self) -> Option<Identity> {
        None
    }

    fn credential<'a>(
        &'a self,
        _identity: &'a Identity,
    ) -> LocalBoxFuture<'a, Result<String, IdentityError>> {
        futures::future::ready(Err(IdentityError::SignedOut)).boxed_local()
    }
}
