use std::sync::Arc;

use parking_lot::RwLock;

use crate::api::{CommentStore, Error, Session};

/// Decides whether destructive actions are allowed for the current session.
///
/// The gate only ever looks at the last session snapshot it was given, so
/// callers refresh it right before anything destructive.
#[derive(Clone, Debug, Default)]
pub struct AccessGate {
    session: Arc<RwLock<Session>>,
}

impl AccessGate {
    pub fn new(session: Session) -> AccessGate {
        AccessGate {
            session: Arc::new(RwLock::new(session)),
        }
    }

    pub fn can_delete(&self) -> bool {
        self.session.read().is_admin()
    }

    pub fn session(&self) -> Session {
        self.session.read().clone()
    }

    pub fn set_session(&self, session: Session) {
        *self.session.write() = session;
    }

    /// Fetches the current session from the store and returns the new `can_delete()`
    pub async fn refresh<S: CommentStore + ?Sized>(&self, store: &S) -> Result<bool, Error> {
        let session = store.get_session().await.map_err(Error::remote)?;
        tracing::debug!(signed_in = session.signed_in, role = ?session.role, "refreshed session");
        self.set_session(session);
        Ok(self.can_delete())
    }
}
