//! First-run provisioning of the administrator account.

use crate::error::Error;
use crate::user::{IdentityStore, Role};
use crate::{users, Id};
use chrono::Utc;
use log::*;

/// Login of the administrator created on first run.
pub const DEFAULT_ADMIN_EMAIL: &str = "admin@localhost";
/// Initial password of the administrator created on first run. Change it after the first login.
pub const DEFAULT_ADMIN_PASSWORD: &str = "password";
pub const DEFAULT_ADMIN_DISPLAY_NAME: &str = "Administrator";

/// Creates the default administrator if and only if the identity store has no users at all.
///
/// Runs once at startup, before protected routes accept traffic. Once any user exists this
/// is a no-op, which makes it safe across restarts. Returns the created account, if any.
pub async fn ensure_admin_exists(store: &dyn IdentityStore) -> Result<Option<users::Model>, Error> {
    let user_count = store.count_users().await?;
    if user_count > 0 {
        debug!("Identity store has {user_count} user(s), skipping admin bootstrap");
        return Ok(None);
    }

    let now = Utc::now();
    let admin = store
        .create_user(users::Model {
            id: Id::new_v4(),
            email: DEFAULT_ADMIN_EMAIL.to_string(),
            display_name: Some(DEFAULT_ADMIN_DISPLAY_NAME.to_string()),
            password: DEFAULT_ADMIN_PASSWORD.to_string(),
            role: Role::Admin,
            created_at: now.into(),
            updated_at: now.into(),
        })
        .await?;

    warn!(
        "No users found, created default administrator {}. Change its password.",
        admin.email
    );

    Ok(Some(admin))
}
