use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::limits::MAX_ACTOR_LEN;

/// Shared-password auth. The login user becomes the actor stamped on room
/// assignments, so it is length-checked here before any query runs.
#[derive(Debug)]
pub struct RoomlockAuthSource {
    password: String,
}

impl RoomlockAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for RoomlockAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        check_user(login.user())?;
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

fn check_user(user: Option<&str>) -> PgWireResult<()> {
    match user {
        Some(u) if !u.is_empty() && u.len() <= MAX_ACTOR_LEN => Ok(()),
        _ => Err(PgWireError::UserError(Box::new(ErrorInfo::new(
            "FATAL".into(),
            "28000".into(),
            format!("user name must be 1..={MAX_ACTOR_LEN} bytes"),
        )))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_names_checked() {
        assert!(check_user(Some("frontdesk")).is_ok());
        assert!(check_user(Some(&"x".repeat(MAX_ACTOR_LEN))).is_ok());
        assert!(check_user(Some(&"x".repeat(MAX_ACTOR_LEN + 1))).is_err());
        assert!(check_user(Some("")).is_err());
        assert!(check_user(None).is_err());
    }
}
