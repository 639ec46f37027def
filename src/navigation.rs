use crate::session::SessionView;
use crate::structs::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    /// Neutral entry point; forwards to the dashboard of whoever is signed in.
    Landing,
    StudentLogin,
    AdminLogin,
    StudentDashboard,
    AdminDashboard,
    TrackBus,
}

impl Screen {
    pub fn required_role(self) -> Option<Role> {
        match self {
            Screen::StudentDashboard | Screen::TrackBus => Some(Role::Student),
            Screen::AdminDashboard => Some(Role::Admin),
            Screen::Landing | Screen::StudentLogin | Screen::AdminLogin => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Loading,
    Show(Screen),
    Redirect(Screen),
}

/// Decides what a chat actually sees when it asks for `screen`.
pub fn resolve(screen: Screen, session: &SessionView) -> Access {
    if session.loading && screen != Screen::StudentLogin && screen != Screen::AdminLogin {
        return Access::Loading;
    }

    if screen == Screen::Landing {
        return match session.identity.as_ref().map(|i| i.role) {
            None => Access::Redirect(Screen::StudentLogin),
            Some(Role::Admin) => Access::Redirect(Screen::AdminDashboard),
            Some(Role::Student) => Access::Redirect(Screen::StudentDashboard),
        };
    }

    match screen.required_role() {
        None => Access::Show(screen),
        Some(_) if !session.is_signed_in() => Access::Redirect(Screen::StudentLogin),
        Some(Role::Admin) if !session.is_admin() => Access::Redirect(Screen::Landing),
        Some(Role::Student) if !session.is_student() => Access::Redirect(Screen::Landing),
        Some(_) => Access::Show(screen),
    }
}

/// Follows redirects until a screen is shown.
pub fn land(screen: Screen, session: &SessionView) -> Access {
    let mut access = resolve(screen, session);
    // Landing never redirects to itself, so two hops suffice.
    for _ in 0..2 {
        match access {
            Access::Redirect(next) => access = resolve(next, session),
            _ => break,
        }
    }
    match access {
        Access::Redirect(next) => Access::Show(next),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::Identity;

    fn view(role: Option<Role>) -> SessionView {
        SessionView {
            identity: role.map(|role| Identity {
                id: "1".into(),
                name: "x".into(),
                email: "x@college.edu".into(),
                role,
            }),
            loading: false,
        }
    }

    #[test]
    fn signed_out_goes_to_student_login() {
        let v = view(None);
        assert_eq!(resolve(Screen::AdminDashboard, &v), Access::Redirect(Screen::StudentLogin));
        assert_eq!(resolve(Screen::TrackBus, &v), Access::Redirect(Screen::StudentLogin));
        assert_eq!(resolve(Screen::AdminLogin, &v), Access::Show(Screen::AdminLogin));
    }

    #[test]
    fn student_cannot_open_admin_dashboard() {
        let v = view(Some(Role::Student));
        assert_eq!(resolve(Screen::StudentDashboard, &v), Access::Show(Screen::StudentDashboard));
        assert_eq!(resolve(Screen::TrackBus, &v), Access::Show(Screen::TrackBus));
        assert_eq!(resolve(Screen::AdminDashboard, &v), Access::Redirect(Screen::Landing));
        assert_eq!(land(Screen::AdminDashboard, &v), Access::Show(Screen::StudentDashboard));
    }

    #[test]
    fn admin_cannot_open_student_screens() {
        let v = view(Some(Role::Admin));
        assert_eq!(resolve(Screen::AdminDashboard, &v), Access::Show(Screen::AdminDashboard));
        assert_eq!(resolve(Screen::StudentDashboard, &v), Access::Redirect(Screen::Landing));
        assert_eq!(land(Screen::TrackBus, &v), Access::Show(Screen::AdminDashboard));
    }

    #[test]
    fn loading_holds_protected_screens() {
        let mut v = view(Some(Role::Admin));
        v.loading = true;
        assert_eq!(resolve(Screen::AdminDashboard, &v), Access::Loading);
        assert_eq!(resolve(Screen::StudentLogin, &v), Access::Show(Screen::StudentLogin));
    }
}
