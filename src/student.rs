use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use teloxide::{
    payloads::{AnswerCallbackQuerySetters, SendMessageSetters},
    prelude::*,
    types::{ButtonRequest, KeyboardButton, KeyboardMarkup, KeyboardRemove, MessageId, ParseMode::Html},
    utils::html::escape,
};
use tokio::sync::watch;

use crate::app::App;
use crate::auth;
use crate::data::RouteCatalog;
use crate::error::Error;
use crate::feedback::{MAX_DESCRIPTION_LEN, MAX_TITLE_LEN};
use crate::geo::{self, GeolocationError, LocationReply, DECLINE_LOCATION};
use crate::navigation::{Access, Screen};
use crate::structs::*;
use crate::tracker::Snapshot;
use crate::{api, clear_buttons, make_inline_keyboard, route_keyboard, show, HandlerResult, MyDialogue, State};

fn buttons(list: &[(&str, &str)]) -> Vec<(String, String)> {
    list.iter().map(|(l, d)| (l.to_string(), d.to_string())).collect()
}

//////////////////////////////////////////////////////////
// Login
//////////////////////////////////////////////////////////
pub async fn show_login(bot: &Bot, dialogue: &MyDialogue) -> HandlerResult {
    bot.send_message(
        dialogue.chat_id(),
        "🎓 <b>Student Login</b>\nLogin with your college email to access bus services.\n\n\
         Please send your college email.\nAdministrators can use /admin.",
    )
    .parse_mode(Html)
    .reply_markup(KeyboardRemove::new())
    .await?;
    dialogue.update(State::StudentEmail).await?;
    Ok(())
}

pub async fn receive_email(bot: Bot, dialogue: MyDialogue, msg: Message, app: Arc<App>) -> HandlerResult {
    let email = match auth::validate_college_email(msg.text().unwrap_or_default(), &app.config.college_domain) {
        Ok(email) => email,
        Err(e) => {
            bot.send_message(msg.chat.id, format!("❌ {}", e.user_message())).await?;
            return Ok(());
        }
    };

    bot.send_message(msg.chat.id, "Sending OTP...").await?;
    tokio::time::sleep(app.config.fetch_delay).await;
    send_otp_prompt(&bot, msg.chat.id, &email).await?;

    dialogue.update(State::StudentOtp { email }).await?;
    Ok(())
}

async fn send_otp_prompt(bot: &Bot, chat_id: ChatId, email: &str) -> HandlerResult {
    let kb = make_inline_keyboard(buttons(&[("Change email", "change"), ("Resend OTP", "resend")]), 2);
    bot.send_message(
        chat_id,
        format!(
            "We've sent a verification code to <b>{}</b>.\nPlease enter the 4-digit OTP.",
            escape(email)
        ),
    )
    .parse_mode(Html)
    .reply_markup(kb)
    .await?;
    Ok(())
}

pub async fn receive_otp(bot: Bot, dialogue: MyDialogue, email: String, msg: Message, app: Arc<App>) -> HandlerResult {
    let identity = match auth::verify_otp(&email, msg.text().unwrap_or_default()) {
        Ok(identity) => identity,
        Err(e) => {
            bot.send_message(msg.chat.id, format!("❌ {}", e.user_message())).await?;
            return Ok(());
        }
    };

    tokio::time::sleep(app.config.fetch_delay).await;
    app.sessions.with(msg.chat.id.0, |s| s.sign_in(identity))?;
    show(&bot, &dialogue, &app, Screen::StudentDashboard).await
}

pub async fn otp_action(bot: Bot, dialogue: MyDialogue, email: String, q: CallbackQuery, app: Arc<App>) -> HandlerResult {
    bot.answer_callback_query(q.id.clone()).await?;
    match q.data.as_deref() {
        Some("change") => {
            clear_buttons(&bot, &q).await;
            show_login(&bot, &dialogue).await?;
        }
        Some("resend") => {
            clear_buttons(&bot, &q).await;
            tokio::time::sleep(app.config.fetch_delay).await;
            send_otp_prompt(&bot, dialogue.chat_id(), &email).await?;
        }
        _ => {}
    }
    Ok(())
}

//////////////////////////////////////////////////////////
// Dashboard
//////////////////////////////////////////////////////////
pub async fn show_dashboard(bot: &Bot, dialogue: &MyDialogue, app: &App) -> HandlerResult {
    let name = app
        .identity(dialogue.chat_id().0)
        .map(|i| i.name)
        .unwrap_or_default();

    bot.send_message(
        dialogue.chat_id(),
        format!(
            "🚌 <b>Student Dashboard</b>\nWelcome, {}! Submit feedback and track your college bus.\n\n\
             /feedback - Submit feedback or a complaint\n\
             /recent - Recent activity\n\
             /routes - Bus routes and stops\n\
             /track - Track a bus\n\
             /logout - Log out",
            escape(&name)
        ),
    )
    .parse_mode(Html)
    .reply_markup(KeyboardRemove::new())
    .await?;
    dialogue.update(State::Start).await?;
    Ok(())
}

pub async fn show_routes(bot: &Bot, chat_id: ChatId, app: &App) -> HandlerResult {
    bot.send_message(chat_id, render_routes(&app.routes))
        .parse_mode(Html)
        .await?;
    Ok(())
}

pub async fn show_recent(bot: &Bot, chat_id: ChatId, app: &App) -> HandlerResult {
    let Some(identity) = app.identity(chat_id.0) else {
        return Ok(());
    };
    let text = {
        let board = app.board();
        let items = board.by_author(&identity.id);
        render_recent(&items, &app.routes)
    };
    bot.send_message(chat_id, text).parse_mode(Html).await?;
    Ok(())
}

fn render_routes(routes: &RouteCatalog) -> String {
    let mut text = String::from("🗺 <b>Bus Routes</b>\n");
    for route in routes.all() {
        text.push_str(&format!(
            "\n<b>{}</b> (starts {})\n",
            escape(&route.label()),
            escape(&route.start_time)
        ));
        for (i, stop) in route.stops.iter().enumerate() {
            text.push_str(&format!("  {}. {}, {}\n", i + 1, escape(&stop.name), escape(&stop.time)));
        }
    }
    text.push_str("\nTrack a route with /track");
    text
}

fn render_recent(items: &[&FeedbackItem], routes: &RouteCatalog) -> String {
    if items.is_empty() {
        return "You haven't submitted any feedback yet. Use /feedback to submit.".to_string();
    }

    let mut text = String::from("📝 <b>Recent Activity</b>\n");
    for item in items {
        text = format!(
            "{}\n--------------------\n<b>{}</b> ({})\n{}\nSubmitted on {} | Route: {}\nStatus: <b>{}</b>",
            text,
            escape(&item.title),
            item.kind,
            escape(&item.description),
            item.created_at.format("%d %b %Y"),
            escape(&routes.label(&item.route_id)),
            item.status
        );
    }
    text
}

//////////////////////////////////////////////////////////
// Feedback form
//////////////////////////////////////////////////////////
pub async fn start_feedback(bot: &Bot, dialogue: &MyDialogue, _app: &App) -> HandlerResult {
    let kb = make_inline_keyboard(buttons(&[("💬 Feedback", "feedback"), ("⚠️ Complaint", "complaint")]), 2);
    bot.send_message(
        dialogue.chat_id(),
        "Share your experience or report an issue with the college bus service.\n\nIs this feedback or a complaint?",
    )
    .reply_markup(kb)
    .await?;
    dialogue.update(State::FeedbackType).await?;
    Ok(())
}

pub async fn receive_kind(bot: Bot, dialogue: MyDialogue, q: CallbackQuery, app: Arc<App>) -> HandlerResult {
    let Some(kind) = q.data.as_deref().and_then(FeedbackKind::parse) else {
        bot.answer_callback_query(q.id).text("Please choose feedback or complaint.").await?;
        return Ok(());
    };
    bot.answer_callback_query(q.id.clone()).await?;
    clear_buttons(&bot, &q).await;

    bot.send_message(dialogue.chat_id(), format!("{} - select the bus route:", kind))
        .reply_markup(route_keyboard(&app))
        .await?;
    dialogue.update(State::FeedbackRoute { kind }).await?;
    Ok(())
}

pub async fn receive_route(
    bot: Bot,
    dialogue: MyDialogue,
    kind: FeedbackKind,
    q: CallbackQuery,
    app: Arc<App>,
) -> HandlerResult {
    let route_id = q.data.clone().unwrap_or_default();
    if !app.routes.contains(&route_id) {
        bot.answer_callback_query(q.id)
            .text(Error::UnknownRoute(route_id).to_string())
            .await?;
        return Ok(());
    }
    bot.answer_callback_query(q.id.clone()).await?;
    clear_buttons(&bot, &q).await;

    bot.send_message(
        dialogue.chat_id(),
        format!(
            "Route: <b>{}</b>\nSend a brief title (max {} characters).",
            escape(&app.routes.label(&route_id)),
            MAX_TITLE_LEN
        ),
    )
    .parse_mode(Html)
    .await?;
    dialogue.update(State::FeedbackTitle { kind, route_id }).await?;
    Ok(())
}

pub async fn receive_title(
    bot: Bot,
    dialogue: MyDialogue,
    (kind, route_id): (FeedbackKind, String),
    msg: Message,
) -> HandlerResult {
    let title = msg.text().unwrap_or_default().trim().to_string();
    if title.is_empty() {
        bot.send_message(msg.chat.id, "❌ Please fill in all fields").await?;
        return Ok(());
    }
    if title.chars().count() > MAX_TITLE_LEN {
        bot.send_message(
            msg.chat.id,
            format!("❌ Title must be at most {} characters", MAX_TITLE_LEN),
        )
        .await?;
        return Ok(());
    }

    bot.send_message(
        msg.chat.id,
        format!(
            "Please provide details about your feedback or complaint (max {} characters).",
            MAX_DESCRIPTION_LEN
        ),
    )
    .await?;
    dialogue
        .update(State::FeedbackDescription { kind, route_id, title })
        .await?;
    Ok(())
}

pub async fn receive_description(
    bot: Bot,
    dialogue: MyDialogue,
    (kind, route_id, title): (FeedbackKind, String, String),
    msg: Message,
    app: Arc<App>,
) -> HandlerResult {
    let Some(identity) = app.identity(msg.chat.id.0) else {
        return show(&bot, &dialogue, &app, Screen::StudentLogin).await;
    };

    let draft = FeedbackDraft {
        kind,
        route_id,
        title,
        description: msg.text().unwrap_or_default().to_string(),
    };
    let submitted = {
        let mut board = app.board();
        let id = board.submit(&identity, draft, Utc::now()).map(|item| item.id.clone());
        id
    };

    match submitted {
        Ok(_) => {
            bot.send_message(msg.chat.id, "✅ Your feedback has been submitted successfully!")
                .await?;
            dialogue.update(State::Start).await?;
            show_recent(&bot, msg.chat.id, &app).await?;
        }
        Err(Error::Validation(text)) => {
            bot.send_message(msg.chat.id, format!("❌ {}", text)).await?;
        }
        Err(e) => {
            bot.send_message(msg.chat.id, format!("❌ {}", e.user_message()))
                .await?;
            dialogue.update(State::Start).await?;
        }
    }
    Ok(())
}

//////////////////////////////////////////////////////////
// Bus tracking
//////////////////////////////////////////////////////////
pub async fn show_tracker(bot: &Bot, dialogue: &MyDialogue, app: &App) -> HandlerResult {
    bot.send_message(
        dialogue.chat_id(),
        "🚏 <b>Bus Tracker</b>\nTrack your bus location in real-time.\n\nSelect your bus route:",
    )
    .parse_mode(Html)
    .reply_markup(route_keyboard(app))
    .await?;
    dialogue.update(State::TrackRoute).await?;
    Ok(())
}

pub async fn receive_track_route(bot: Bot, dialogue: MyDialogue, q: CallbackQuery, app: Arc<App>) -> HandlerResult {
    let chat = dialogue.chat_id().0;
    let route_id = q.data.clone().unwrap_or_default();
    if !app.routes.contains(&route_id) || app.land(chat, Screen::TrackBus) != Access::Show(Screen::TrackBus) {
        bot.answer_callback_query(q.id).text("Select a route").await?;
        return Ok(());
    }
    bot.answer_callback_query(q.id.clone()).await?;
    clear_buttons(&bot, &q).await;

    if let Some(rx) = app.track(chat, &route_id) {
        spawn_display(bot.clone(), dialogue.chat_id(), Arc::clone(&app), rx);
    }
    dialogue.update(State::Tracking { route_id }).await?;
    Ok(())
}

pub async fn tracking_action(
    bot: Bot,
    dialogue: MyDialogue,
    route_id: String,
    q: CallbackQuery,
    app: Arc<App>,
) -> HandlerResult {
    let chat = dialogue.chat_id().0;
    match q.data.as_deref() {
        Some("refresh") => {
            let text = if app.refresh(chat) {
                "Refreshing bus location..."
            } else {
                "Tracking has stopped. Use /track to start again."
            };
            bot.answer_callback_query(q.id).text(text).await?;
        }
        Some("locate") => {
            bot.answer_callback_query(q.id).await?;
            request_location(&bot, &dialogue, &app, route_id).await?;
        }
        Some("stop") => {
            bot.answer_callback_query(q.id.clone()).await?;
            clear_buttons(&bot, &q).await;
            show(&bot, &dialogue, &app, Screen::StudentDashboard).await?;
        }
        _ => {
            bot.answer_callback_query(q.id).await?;
        }
    }
    Ok(())
}

/// Tracking buttons keep working while a location share is pending.
pub async fn awaiting_location_action(
    bot: Bot,
    dialogue: MyDialogue,
    (route_id, _requested_at): (String, DateTime<Utc>),
    q: CallbackQuery,
    app: Arc<App>,
) -> HandlerResult {
    tracking_action(bot, dialogue, route_id, q, app).await
}

pub async fn request_location(bot: &Bot, dialogue: &MyDialogue, app: &App, route_id: String) -> HandlerResult {
    let kb = KeyboardMarkup::new(vec![
        vec![KeyboardButton::new("📍 Share my location").request(ButtonRequest::Location)],
        vec![KeyboardButton::new(DECLINE_LOCATION)],
    ])
    .resize_keyboard(true)
    .one_time_keyboard(true);

    bot.send_message(dialogue.chat_id(), "Share your location so I can tell how far the bus is.")
        .reply_markup(kb)
        .await?;
    let requested_at = Utc::now();
    dialogue
        .update(State::AwaitLocation {
            route_id,
            requested_at,
        })
        .await?;

    spawn_location_timeout(bot.clone(), dialogue.clone(), requested_at, app.config.location_timeout);
    Ok(())
}

/// The state to fall back to once the share requested at `requested_at`
/// expires. `None` when the chat has already moved on.
fn expire_location_request(state: Option<State>, requested_at: DateTime<Utc>) -> Option<State> {
    match state {
        Some(State::AwaitLocation {
            route_id,
            requested_at: pending,
        }) if pending == requested_at => Some(State::Tracking { route_id }),
        _ => None,
    }
}

fn spawn_location_timeout(bot: Bot, dialogue: MyDialogue, requested_at: DateTime<Utc>, timeout: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;

        let state = match dialogue.get().await {
            Ok(state) => state,
            Err(e) => {
                log::warn!("Could not read state of chat {}: {}", dialogue.chat_id().0, e);
                return;
            }
        };
        let Some(next) = expire_location_request(state, requested_at) else {
            return;
        };

        log::debug!("Location request in chat {} timed out", dialogue.chat_id().0);
        if let Err(e) = dialogue.update(next).await {
            log::warn!("Could not reset state of chat {}: {}", dialogue.chat_id().0, e);
            return;
        }
        if let Err(e) = bot
            .send_message(dialogue.chat_id(), format!("⚠️ {}", GeolocationError::Timeout))
            .reply_markup(KeyboardRemove::new())
            .await
        {
            log::warn!("Failed to report location timeout: {}", e);
        }
    });
}

pub async fn receive_location(
    bot: Bot,
    dialogue: MyDialogue,
    (route_id, requested_at): (String, DateTime<Utc>),
    msg: Message,
    app: Arc<App>,
) -> HandlerResult {
    let reply = match (msg.location(), msg.text()) {
        (Some(loc), _) => LocationReply::Shared {
            lat: loc.latitude,
            lon: loc.longitude,
        },
        (None, Some(text)) => LocationReply::Text(text.to_string()),
        _ => LocationReply::Other,
    };
    let waited = (Utc::now() - requested_at).to_std().unwrap_or_default();

    let text = match geo::locate(&reply, waited, app.config.location_timeout) {
        Ok(pos) => {
            app.set_position(msg.chat.id.0, pos);
            app.refresh(msg.chat.id.0);
            "📍 Got your location.".to_string()
        }
        Err(GeolocationError::PermissionDenied) => format!(
            "⚠️ {}\nPlease enable location sharing to use this feature.",
            GeolocationError::PermissionDenied
        ),
        Err(e) => format!("⚠️ {}", e),
    };

    bot.send_message(msg.chat.id, text)
        .reply_markup(KeyboardRemove::new())
        .await?;
    dialogue.update(State::Tracking { route_id }).await?;
    Ok(())
}

fn tracking_keyboard() -> teloxide::types::InlineKeyboardMarkup {
    make_inline_keyboard(
        buttons(&[
            ("🔄 Refresh bus location", "refresh"),
            ("📍 Update my location", "locate"),
            ("⏹ Stop tracking", "stop"),
        ]),
        1,
    )
}

/// Reposts the tracking message whenever the snapshot changes. Ends when the
/// chat's poller is dropped.
fn spawn_display(bot: Bot, chat_id: ChatId, app: Arc<App>, mut rx: watch::Receiver<Snapshot>) {
    tokio::spawn(async move {
        let mut shown: Option<MessageId> = None;

        while rx.changed().await.is_ok() {
            let snap = rx.borrow_and_update().clone();

            let address = match (&snap.fix, &app.config.locationiq_token) {
                (Some(fix), Some(token)) => match api::fetch_address(&app.http, token, fix.position()).await {
                    Ok(address) => Some(address),
                    Err(e) => {
                        log::debug!("Reverse geocoding failed: {}", e);
                        None
                    }
                },
                _ => None,
            };
            let text = render_snapshot(&snap, &app.routes, app.position(chat_id.0), address.as_deref());

            if let Some(id) = shown.take() {
                if let Err(e) = bot.delete_message(chat_id, id).await {
                    log::debug!("Could not delete old tracking message: {}", e);
                }
            }
            match bot
                .send_message(chat_id, text)
                .parse_mode(Html)
                .reply_markup(tracking_keyboard())
                .await
            {
                Ok(m) => shown = Some(m.id),
                Err(e) => log::warn!("Failed to show bus location in chat {}: {}", chat_id.0, e),
            }
        }
        log::debug!("Display for chat {} closed", chat_id.0);
    });
}

pub fn render_snapshot(snap: &Snapshot, routes: &RouteCatalog, me: Option<Position>, address: Option<&str>) -> String {
    let Some(route_id) = snap.route_id.as_deref() else {
        return "Select a route and start tracking.".to_string();
    };

    let mut text = format!("🚌 Tracking <b>{}</b>\n", escape(&routes.label(route_id)));
    match &snap.fix {
        Some(fix) => {
            text.push_str(&format!(
                "\n📍 Bus Location:\nLatitude: {:.6}\nLongitude: {:.6}\n",
                fix.latitude, fix.longitude
            ));
            if let Some(address) = address {
                text.push_str(&format!("Near: {}\n", escape(address)));
            }
            if let Some(me) = me {
                text.push_str(&format!("Distance from you: {:.1} km\n", geo::distance_km(me, fix.position())));
            }
            text.push_str(&format!("Last updated: {}\n", fix.timestamp.format("%H:%M:%S UTC")));
        }
        None => text.push_str("\n⏳ Locating bus...\n"),
    }
    if let Some(error) = &snap.error {
        text.push_str(&format!("\n⚠️ Location Error: {}\n", escape(error)));
    }

    if let Some(route) = routes.get(route_id) {
        text.push_str("\n<b>Route Stops</b>\n");
        for (i, stop) in route.stops.iter().enumerate() {
            text.push_str(&format!("{}. {} - {}\n", i + 1, escape(&stop.name), escape(&stop.time)));
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fix() -> LocationFix {
        LocationFix {
            route_id: "R01".into(),
            latitude: 13.2176,
            longitude: 80.3061,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 7, 5, 9).unwrap(),
        }
    }

    #[test]
    fn snapshot_with_fix_and_distance() {
        let snap = Snapshot {
            generation: 1,
            seq: 1,
            route_id: Some("R01".into()),
            fix: Some(fix()),
            error: None,
        };
        let me = Position { lat: 13.0827, lon: 80.2707 };
        let text = render_snapshot(&snap, &RouteCatalog::default(), Some(me), Some("Ennore High Rd"));

        assert!(text.contains("Tracking <b>R01 - Ennore</b>"));
        assert!(text.contains("Latitude: 13.217600"));
        assert!(text.contains("Near: Ennore High Rd"));
        assert!(text.contains("Distance from you: 15.5 km"));
        assert!(text.contains("Last updated: 07:05:09 UTC"));
        assert!(text.contains("1. Ennore - 5:50 am\n2. College - 6:50 am"));
    }

    #[test]
    fn snapshot_keeps_fix_alongside_error() {
        let snap = Snapshot {
            generation: 3,
            seq: 7,
            route_id: Some("R01".into()),
            fix: Some(fix()),
            error: Some("Failed to get bus location. Please try again.".into()),
        };
        let text = render_snapshot(&snap, &RouteCatalog::default(), None, None);
        assert!(text.contains("Longitude: 80.306100"));
        assert!(text.contains("Location Error: Failed to get bus location"));
        assert!(!text.contains("Distance"));
    }

    #[test]
    fn snapshot_before_first_fix() {
        let snap = Snapshot {
            generation: 1,
            route_id: Some("R02".into()),
            ..Snapshot::default()
        };
        assert!(render_snapshot(&snap, &RouteCatalog::default(), None, None).contains("Locating bus"));
        assert_eq!(
            render_snapshot(&Snapshot::default(), &RouteCatalog::default(), None, None),
            "Select a route and start tracking."
        );
    }

    #[test]
    fn recent_shows_route_labels_and_status() {
        let routes = RouteCatalog::default();
        let item = FeedbackItem {
            id: "f1".into(),
            author_id: "ana@college.edu".into(),
            route_id: "gone".into(),
            kind: FeedbackKind::Complaint,
            title: "Late <again>".into(),
            description: "d".into(),
            status: FeedbackStatus::Reviewing,
            created_at: Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 3, 5, 8, 0, 0).unwrap(),
        };
        let text = render_recent(&[&item], &routes);
        assert!(text.contains("Late &lt;again&gt;"));
        assert!(text.contains("Route: Unknown Route"));
        assert!(text.contains("Submitted on 05 Mar 2024"));
        assert!(text.contains("Status: <b>Reviewing</b>"));

        assert!(render_recent(&[], &routes).starts_with("You haven't submitted"));
    }

    #[test]
    fn pending_location_request_expires_back_to_tracking() {
        let asked = Utc.with_ymd_and_hms(2024, 1, 1, 7, 0, 0).unwrap();
        let waiting = State::AwaitLocation {
            route_id: "R01".into(),
            requested_at: asked,
        };

        let next = expire_location_request(Some(waiting.clone()), asked);
        assert!(matches!(next, Some(State::Tracking { route_id }) if route_id == "R01"));

        let newer = asked + chrono::Duration::seconds(30);
        assert!(expire_location_request(Some(waiting), newer).is_none());
        assert!(expire_location_request(Some(State::Tracking { route_id: "R01".into() }), asked).is_none());
        assert!(expire_location_request(None, asked).is_none());
    }

    #[test]
    fn routes_list_stops_in_order() {
        let text = render_routes(&RouteCatalog::default());
        assert!(text.contains("<b>R03B - Water Tank</b> (starts 6:40 am)\n  1. Water Tank, 6:40 am\n  2. College, 7:35 am"));
    }
}
