//! Login lifecycle rules layered over the session store.

use super::csrf::CsrfGuard;
use crate::clock::SharedClock;
use crate::session::Session;
use chrono::Duration;
use tracing::info;

pub struct SessionPolicy {
    lifetime: Duration,
    clock: SharedClock,
}

impl SessionPolicy {
    pub fn new(lifetime: Duration, clock: SharedClock) -> Self {
        Self { lifetime, clock }
    }

    /// True for a logged-in session whose login is not older than the
    /// lifetime. An over-age session is wiped as a side effect.
    pub fn is_authenticated(&self, session: &mut Session) -> bool {
        let data = session.data();
        if !data.logged_in {
            return false;
        }

        let Some(login_time) = data.login_time else {
            return true;
        };

        let elapsed = self.clock.now() - login_time;
        if elapsed > self.lifetime {
            info!(elapsed_secs = elapsed.num_seconds(), "session expired");
            session.clear();
            return false;
        }
        true
    }

    /// Start an authenticated session. Returns the CSRF token for it.
    pub fn login(&self, session: &mut Session, csrf: &CsrfGuard) -> String {
        session.clear();
        {
            let data = session.data_mut();
            data.logged_in = true;
            data.login_time = Some(self.clock.now());
            data.permanent = true;
        }
        session.rotate_id();
        csrf.issue_token(session)
    }

    pub fn logout(&self, session: &mut Session) {
        session.clear();
    }
}
