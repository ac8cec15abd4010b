// Route gating for protected UI

use super::types::Session;
use crate::error::LoginError;

pub const HOME: &str = "/";
pub const LOGIN: &str = "/login";

/// Kind of page the UI is about to render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Login form; pointless once signed in
    Login,
    /// Registration form; pointless once signed in
    Register,
    /// Anything that needs a signed-in user
    Protected,
}

/// What the UI should do with the route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// The first check has not finished
    Loading,
    Render,
    Redirect(&'static str),
}

pub fn guard(session: &Session, route: Route) -> Gate {
    match (session, route) {
        (Session::Unknown, _) => Gate::Loading,
        (Session::Authorized(_), Route::Login | Route::Register) => Gate::Redirect(HOME),
        (Session::Unauthorized, Route::Login | Route::Register) => Gate::Render,
        (Session::Authorized(_), Route::Protected) => Gate::Render,
        (Session::Unauthorized, Route::Protected) => Gate::Redirect(LOGIN),
    }
}

/// Where to navigate after a login attempt from a redirect
pub fn after_login<T>(outcome: &Result<T, LoginError>) -> &'static str {
    if outcome.is_ok() {
        HOME
    } else {
        LOGIN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::types::UserProfile;

    #[test]
    fn test_unknown_always_loads() {
        for route in [Route::Login, Route::Register, Route::Protected] {
            assert_eq!(guard(&Session::Unknown, route), Gate::Loading);
        }
    }

    #[test]
    fn test_login_pages() {
        let signed_in = Session::Authorized(UserProfile::default());
        assert_eq!(guard(&signed_in, Route::Login), Gate::Redirect(HOME));
        assert_eq!(guard(&signed_in, Route::Register), Gate::Redirect(HOME));
        assert_eq!(guard(&Session::Unauthorized, Route::Login), Gate::Render);
    }

    #[test]
    fn test_protected_pages() {
        let signed_in = Session::Authorized(UserProfile::default());
        assert_eq!(guard(&signed_in, Route::Protected), Gate::Render);
        assert_eq!(
            guard(&Session::Unauthorized, Route::Protected),
            Gate::Redirect(LOGIN)
        );
    }

    #[test]
    fn test_after_login() {
        assert_eq!(after_login(&Ok::<(), LoginError>(())), HOME);
        assert_eq!(after_login::<()>(&Err(LoginError::MissingToken)), LOGIN);
    }
}
