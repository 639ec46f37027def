pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod error;
pub mod feedback;
pub mod geo;
pub mod io;
pub mod navigation;
pub mod session;
pub mod structs;
pub mod tracker;

mod admin;
mod app;
mod student;
#[cfg(test)]
mod tests;

use std::{error::Error, sync::Arc};

use app::App;
use chrono::{DateTime, Utc};
use config::Config;
use navigation::{Access, Screen};
use structs::FeedbackKind;

use teloxide::{
    dispatching::{dialogue, dialogue::InMemStorage},
    dptree::{case, deps, endpoint},
    filter_command,
    payloads::{AnswerCallbackQuerySetters, SendMessageSetters},
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardRemove},
    utils::command::BotCommands,
};

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type MyDialogue = Dialogue<State, InMemStorage<State>>;

#[derive(BotCommands, Clone)]
#[command(
    rename_rule = "lowercase",
    description = "These commands are supported:"
)]
enum Command {
    #[command(description = "Display help menu showing the commands list")]
    Help,
    #[command(description = "Open your dashboard (or the login screen).")]
    Start,
    #[command(description = "Log in as a student with your college email.")]
    Student,
    #[command(description = "Log in as an administrator.")]
    Admin,
    #[command(description = "Go to your dashboard.")]
    Dashboard,
    #[command(description = "Submit feedback or a complaint.")]
    Feedback,
    #[command(description = "Show the status of your feedback and complaints.")]
    Recent,
    #[command(description = "List bus routes and their stops.")]
    Routes,
    #[command(description = "Track a bus in real time.")]
    Track,
    #[command(description = "Share your location while tracking.")]
    Location,
    #[command(description = "Admin: list complaints. Filters: route:<id> status:<status> <text>")]
    Complaints(String),
    #[command(description = "Admin: set a status, e.g. /status 2 resolved")]
    Status(String),
    #[command(description = "Log out.")]
    Logout,
    #[command(description = "Cancel the current action or tracking.")]
    Cancel,
}

#[derive(Clone, Default)]
pub enum State {
    #[default]
    Start,
    StudentEmail,
    StudentOtp {
        email: String,
    },
    AdminUsername,
    AdminPassword {
        username: String,
    },
    FeedbackType,
    FeedbackRoute {
        kind: FeedbackKind,
    },
    FeedbackTitle {
        kind: FeedbackKind,
        route_id: String,
    },
    FeedbackDescription {
        kind: FeedbackKind,
        route_id: String,
        title: String,
    },
    TrackRoute,
    Tracking {
        route_id: String,
    },
    AwaitLocation {
        route_id: String,
        requested_at: DateTime<Utc>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();
    pretty_env_logger::init();
    log::info!("Starting college bus BOT ...");

    let config = Config::from_env()?;
    let app = Arc::new(App::new(config)?);

    let bot = Bot::from_env();

    let command_handler = filter_command::<Command, _>().endpoint(on_command);

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .branch(case![State::StudentEmail].endpoint(student::receive_email))
        .branch(case![State::StudentOtp { email }].endpoint(student::receive_otp))
        .branch(case![State::AdminUsername].endpoint(admin::receive_username))
        .branch(case![State::AdminPassword { username }].endpoint(admin::receive_password))
        .branch(case![State::FeedbackTitle { kind, route_id }].endpoint(student::receive_title))
        .branch(
            case![State::FeedbackDescription {
                kind,
                route_id,
                title
            }]
            .endpoint(student::receive_description),
        )
        .branch(
            case![State::AwaitLocation {
                route_id,
                requested_at
            }]
            .endpoint(student::receive_location),
        )
        .branch(endpoint(invalid_state));

    let callback_query_handler = Update::filter_callback_query()
        .branch(case![State::StudentOtp { email }].endpoint(student::otp_action))
        .branch(case![State::FeedbackType].endpoint(student::receive_kind))
        .branch(case![State::FeedbackRoute { kind }].endpoint(student::receive_route))
        .branch(case![State::TrackRoute].endpoint(student::receive_track_route))
        .branch(case![State::Tracking { route_id }].endpoint(student::tracking_action))
        .branch(
            case![State::AwaitLocation {
                route_id,
                requested_at
            }]
            .endpoint(student::awaiting_location_action),
        )
        .branch(endpoint(stale_button));

    let dial = dialogue::enter::<Update, InMemStorage<State>, State, _>()
        .branch(message_handler)
        .branch(callback_query_handler);

    Dispatcher::builder(bot, dial)
        .dependencies(deps![InMemStorage::<State>::new(), app])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
    Ok(())
}

async fn on_command(bot: Bot, dialogue: MyDialogue, msg: Message, cmd: Command, app: Arc<App>) -> HandlerResult {
    let chat = msg.chat.id.0;
    match cmd {
        Command::Help => {
            bot.send_message(msg.chat.id, Command::descriptions().to_string())
                .await?;
        }
        Command::Start | Command::Dashboard => open(&bot, &dialogue, &app, Screen::Landing).await?,
        Command::Student => open(&bot, &dialogue, &app, Screen::StudentLogin).await?,
        Command::Admin => open(&bot, &dialogue, &app, Screen::AdminLogin).await?,
        Command::Track => open(&bot, &dialogue, &app, Screen::TrackBus).await?,
        Command::Feedback => {
            if gate(&bot, &dialogue, &app, Screen::StudentDashboard).await? {
                student::start_feedback(&bot, &dialogue, &app).await?;
            }
        }
        Command::Recent => {
            if gate(&bot, &dialogue, &app, Screen::StudentDashboard).await? {
                student::show_recent(&bot, msg.chat.id, &app).await?;
            }
        }
        Command::Routes => {
            if gate(&bot, &dialogue, &app, Screen::StudentDashboard).await? {
                student::show_routes(&bot, msg.chat.id, &app).await?;
            }
        }
        Command::Location => {
            if gate(&bot, &dialogue, &app, Screen::TrackBus).await? {
                match dialogue.get().await? {
                    Some(State::Tracking { route_id }) if app.is_tracking(chat) => {
                        student::request_location(&bot, &dialogue, &app, route_id).await?
                    }
                    _ => {
                        bot.send_message(msg.chat.id, "Start tracking a route with /track first.")
                            .await?;
                    }
                }
            }
        }
        Command::Complaints(args) => {
            if gate(&bot, &dialogue, &app, Screen::AdminDashboard).await? {
                admin::list_complaints(&bot, msg.chat.id, &app, &args).await?;
            }
        }
        Command::Status(args) => {
            if gate(&bot, &dialogue, &app, Screen::AdminDashboard).await? {
                admin::change_status(&bot, msg.chat.id, &app, &args).await?;
            }
        }
        Command::Logout => {
            app.stop_tracking(chat);
            app.sessions.with(chat, |s| s.sign_out())?;
            bot.send_message(msg.chat.id, "👋 You have been logged out.")
                .reply_markup(KeyboardRemove::new())
                .await?;
            show(&bot, &dialogue, &app, Screen::StudentLogin).await?;
        }
        Command::Cancel => {
            app.stop_tracking(chat);
            bot.send_message(msg.chat.id, "🚫 Cancelled!")
                .reply_markup(KeyboardRemove::new())
                .await?;
            dialogue.exit().await?;
        }
    }
    Ok(())
}

async fn invalid_state(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(
        msg.chat.id,
        "Unable to handle the message. Type /help to see the usage.",
    )
    .await?;
    Ok(())
}

async fn stale_button(bot: Bot, q: CallbackQuery) -> HandlerResult {
    bot.answer_callback_query(q.id)
        .text("This button is no longer active.")
        .await?;
    Ok(())
}

//////////////////////////////////////////////////////////
// Navigation
//////////////////////////////////////////////////////////
/// Opens `requested`, following whatever redirect the session demands.
async fn open(bot: &Bot, dialogue: &MyDialogue, app: &App, requested: Screen) -> HandlerResult {
    match app.land(dialogue.chat_id().0, requested) {
        Access::Loading => {
            bot.send_message(dialogue.chat_id(), "Loading...").await?;
        }
        Access::Show(screen) | Access::Redirect(screen) => {
            if screen != requested && requested != Screen::Landing {
                log::debug!("Chat {} redirected from {:?} to {:?}", dialogue.chat_id().0, requested, screen);
            }
            show(bot, dialogue, app, screen).await?
        }
    }
    Ok(())
}

/// True when `screen` is reachable; otherwise shows where the chat lands instead.
async fn gate(bot: &Bot, dialogue: &MyDialogue, app: &App, screen: Screen) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    if app.land(dialogue.chat_id().0, screen) == Access::Show(screen) {
        return Ok(true);
    }
    bot.send_message(dialogue.chat_id(), "⛔ That is not available for your account.")
        .await?;
    open(bot, dialogue, app, screen).await?;
    Ok(false)
}

async fn show(bot: &Bot, dialogue: &MyDialogue, app: &App, screen: Screen) -> HandlerResult {
    let chat = dialogue.chat_id().0;
    let screen = match screen {
        Screen::Landing => match app.land(chat, Screen::Landing) {
            Access::Show(s) | Access::Redirect(s) => s,
            Access::Loading => Screen::StudentLogin,
        },
        other => other,
    };
    if screen != Screen::TrackBus {
        app.stop_tracking(chat);
    }

    match screen {
        Screen::Landing | Screen::StudentLogin => student::show_login(bot, dialogue).await?,
        Screen::AdminLogin => admin::show_login(bot, dialogue).await?,
        Screen::StudentDashboard => student::show_dashboard(bot, dialogue, app).await?,
        Screen::AdminDashboard => admin::show_dashboard(bot, dialogue, app).await?,
        Screen::TrackBus => student::show_tracker(bot, dialogue, app).await?,
    }
    Ok(())
}

//////////////////////////////////////////////////////////
// Keyboards
//////////////////////////////////////////////////////////
/// Lays `(label, data)` buttons out `chunks` per row.
fn make_inline_keyboard(list: Vec<(String, String)>, chunks: usize) -> InlineKeyboardMarkup {
    let mut keyboard: Vec<Vec<InlineKeyboardButton>> = vec![];

    for values in list.chunks(chunks) {
        let row = values
            .iter()
            .map(|(label, data)| InlineKeyboardButton::callback(label.to_owned(), data.to_owned()))
            .collect();

        keyboard.push(row);
    }

    InlineKeyboardMarkup::new(keyboard)
}

/// Removes the inline keyboard from the message a button was pressed on.
async fn clear_buttons(bot: &Bot, q: &CallbackQuery) {
    if let Some(m) = &q.message {
        if let Err(e) = bot.edit_message_reply_markup(m.chat.id, m.id).await {
            log::debug!("Could not clear buttons in chat {}: {}", m.chat.id.0, e);
        }
    }
}

/// One button per route, labelled "R01 - Ennore".
fn route_keyboard(app: &App) -> InlineKeyboardMarkup {
    let buttons = app
        .routes
        .all()
        .iter()
        .map(|r| (r.label(), r.id.clone()))
        .collect();
    make_inline_keyboard(buttons, 2)
}
