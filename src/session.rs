use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::api::{Backend, DateBounds, SessionUser};
use crate::errors::AppError;

#[derive(Default)]
struct SessionState {
    user: Option<SessionUser>,
    bounds: DateBounds,
    error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub user: Option<SessionUser>,
    pub bounds: DateBounds,
    /// Login failure text shown next to the form.
    pub error: Option<String>,
}

/// Tracks the signed-in user and the dataset's date bounds. Bounds are
/// loaded when a session appears and refreshed after a successful import.
pub struct SessionController {
    backend: Arc<dyn Backend>,
    state: Mutex<SessionState>,
}

impl SessionController {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Picks up an existing cookie session, if any.
    pub async fn restore(&self) -> bool {
        match self.backend.session_info().await {
            Ok(Some(user)) => {
                info!(user = %user.username, "session restored");
                self.state.lock().user = Some(user);
                self.refresh_bounds().await;
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(?err, "session lookup failed");
                false
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> bool {
        match self.backend.login(email, password).await {
            Ok(user) => {
                info!(user = %user.username, role = %user.role, "signed in");
                {
                    let mut state = self.state.lock();
                    state.user = Some(user);
                    state.error = None;
                }
                self.refresh_bounds().await;
                true
            }
            Err(err) => {
                let mut state = self.state.lock();
                state.user = None;
                state.error = Some(login_message(&err));
                false
            }
        }
    }

    /// Clears the local session regardless of how the server call went.
    pub async fn logout(&self) {
        if let Err(err) = self.backend.logout().await {
            warn!(?err, "logout request failed");
        }
        let mut state = self.state.lock();
        state.user = None;
        state.bounds = DateBounds::default();
        state.error = None;
    }

    pub async fn refresh_bounds(&self) {
        match self.backend.date_range().await {
            Ok(bounds) => self.state.lock().bounds = bounds,
            Err(err) => warn!(?err, "date range fetch failed"),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.lock().user.is_some()
    }

    pub fn user(&self) -> Option<SessionUser> {
        self.state.lock().user.clone()
    }

    pub fn bounds(&self) -> DateBounds {
        self.state.lock().bounds
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot {
            user: state.user.clone(),
            bounds: state.bounds,
            error: state.error.clone(),
        }
    }
}

fn login_message(err: &AppError) -> String {
    match err {
        AppError::Auth(message) => message.clone(),
        err if err.is_network() => "Login failed: no response from the server.".to_string(),
        err => err.to_string(),
    }
}
