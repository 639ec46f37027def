use std::{sync::Arc, time::Duration};

use chrono::Utc;

use crate::api::{BusLocationProvider, SimulatedBusLocations};
use crate::app::App;
use crate::auth;
use crate::config::Config;
use crate::feedback::Filter;
use crate::io::{FileStore, KeyValueStore, MemoryStore};
use crate::navigation::{Access, Screen};
use crate::session::Sessions;
use crate::structs::*;

fn app_with(storage: Arc<dyn KeyValueStore>) -> App {
    let config = Config {
        fetch_delay: Duration::from_millis(10),
        ..Config::default()
    };
    let provider: Arc<dyn BusLocationProvider> = Arc::new(SimulatedBusLocations::new(config.fetch_delay));
    App::with_parts(config, storage, provider).unwrap()
}

fn app() -> App {
    app_with(Arc::new(MemoryStore::default()))
}

#[test]
fn student_login_lands_on_student_screens_only() {
    let app = app();
    let chat = 7;
    assert_eq!(app.land(chat, Screen::Landing), Access::Show(Screen::StudentLogin));
    assert_eq!(app.land(chat, Screen::TrackBus), Access::Show(Screen::StudentLogin));

    let email = auth::validate_college_email("ana@college.edu", &app.config.college_domain).unwrap();
    let identity = auth::verify_otp(&email, "1234").unwrap();
    app.sessions.with(chat, |s| s.sign_in(identity)).unwrap();

    assert_eq!(app.land(chat, Screen::Landing), Access::Show(Screen::StudentDashboard));
    assert_eq!(app.land(chat, Screen::TrackBus), Access::Show(Screen::TrackBus));
    assert_eq!(app.land(chat, Screen::AdminDashboard), Access::Show(Screen::StudentDashboard));
    assert_eq!(app.identity(chat).unwrap().name, "ana");
}

#[test]
fn admin_login_lands_on_admin_dashboard() {
    let app = app();
    let chat = 9;
    assert!(auth::admin_login("admin", "nope", &app.config).is_err());

    let identity = auth::admin_login("admin", "password", &app.config).unwrap();
    app.sessions.with(chat, |s| s.sign_in(identity)).unwrap();

    assert_eq!(app.land(chat, Screen::Landing), Access::Show(Screen::AdminDashboard));
    assert_eq!(app.land(chat, Screen::StudentDashboard), Access::Show(Screen::AdminDashboard));
    assert_eq!(app.land(chat, Screen::AdminLogin), Access::Show(Screen::AdminLogin));
}

#[test]
fn session_survives_restart_until_logout() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");
    let identity = auth::verify_otp("ana@college.edu", "0000").unwrap();

    {
        let app = app_with(Arc::new(FileStore::new(&path)));
        app.sessions.with(1, |s| s.sign_in(identity.clone())).unwrap();
    }

    let app = app_with(Arc::new(FileStore::new(&path)));
    assert_eq!(app.identity(1), Some(identity));
    assert!(app.identity(2).is_none());

    app.sessions.with(1, |s| s.sign_out()).unwrap();
    let app = app_with(Arc::new(FileStore::new(&path)));
    assert!(app.identity(1).is_none());
    assert_eq!(app.land(1, Screen::StudentDashboard), Access::Show(Screen::StudentLogin));
}

#[test]
fn corrupt_session_file_comes_up_signed_out() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");
    let storage: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&path));
    storage.set(&Sessions::key_for(3), "not json").unwrap();

    let app = app_with(storage);
    assert!(!app.sessions.current(3).is_signed_in());
    assert!(!app.sessions.current(3).loading);
}

#[test]
fn submitted_feedback_reaches_admin_views() {
    let app = app();
    let student = auth::verify_otp("ana@college.edu", "4321").unwrap();

    let id = {
        let mut board = app.board();
        let draft = FeedbackDraft {
            kind: FeedbackKind::Complaint,
            route_id: "R05".into(),
            title: "Driver skipped CIT Nagar".into(),
            description: "Waited at 6:10 am, bus did not stop.".into(),
        };
        board.submit(&student, draft, Utc::now()).unwrap().id.clone()
    };

    let mut board = app.board();
    assert_eq!(board.by_author(&student.id)[0].id, id);
    assert_eq!(board.stats().pending, 4);

    let found = board.filter(&Filter::parse("route:R05 status:pending skipped").unwrap());
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, id);

    board.set_status(&id, FeedbackStatus::Resolved, Utc::now()).unwrap();
    assert!(board.filter(&Filter::parse("route:R05 status:pending").unwrap()).is_empty());
    assert_eq!(board.stats().resolved, 2);
}

#[tokio::test(start_paused = true)]
async fn tracking_is_per_chat_and_stops_cleanly() {
    let app = app();
    let mut rx = app.track(1, "R01").unwrap();
    assert!(app.track(1, "R02").is_none());
    assert!(app.is_tracking(1));
    assert!(!app.is_tracking(2));

    rx.changed().await.unwrap();
    loop {
        let snap = rx.borrow_and_update().clone();
        if let Some(fix) = snap.fix {
            assert_eq!(fix.route_id, "R02");
            break;
        }
        rx.changed().await.unwrap();
    }
    assert!(app.refresh(1));

    app.stop_tracking(1);
    assert!(!app.is_tracking(1));
    assert!(!app.refresh(1));
    while rx.changed().await.is_ok() {}
}
