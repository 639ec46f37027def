use std::sync::Arc;

use chrono::Utc;
use teloxide::{
    payloads::SendMessageSetters,
    prelude::*,
    types::{KeyboardRemove, ParseMode::Html},
    utils::html::escape,
};

use crate::app::App;
use crate::auth;
use crate::data::RouteCatalog;
use crate::error::{Error, Result};
use crate::feedback::{Filter, RouteStats, Stats};
use crate::navigation::Screen;
use crate::structs::*;
use crate::{show, HandlerResult, MyDialogue, State};

/// Most complaints listed in one message.
const LIST_LIMIT: usize = 20;

//////////////////////////////////////////////////////////
// Login
//////////////////////////////////////////////////////////
pub async fn show_login(bot: &Bot, dialogue: &MyDialogue) -> HandlerResult {
    bot.send_message(
        dialogue.chat_id(),
        "🔐 <b>Admin Login</b>\nLogin to access the administration dashboard.\n\nUsername:",
    )
    .parse_mode(Html)
    .reply_markup(KeyboardRemove::new())
    .await?;
    dialogue.update(State::AdminUsername).await?;
    Ok(())
}

pub async fn receive_username(bot: Bot, dialogue: MyDialogue, msg: Message) -> HandlerResult {
    match msg.text().map(str::trim) {
        Some(username) if !username.is_empty() => {
            bot.send_message(msg.chat.id, "Password:").await?;
            dialogue
                .update(State::AdminPassword {
                    username: username.to_string(),
                })
                .await?;
        }
        _ => {
            bot.send_message(msg.chat.id, "❌ Please enter both username and password")
                .await?;
        }
    }
    Ok(())
}

pub async fn receive_password(
    bot: Bot,
    dialogue: MyDialogue,
    username: String,
    msg: Message,
    app: Arc<App>,
) -> HandlerResult {
    let password = msg.text().unwrap_or_default().to_string();
    if let Err(e) = bot.delete_message(msg.chat.id, msg.id).await {
        log::debug!("Could not delete password message: {}", e);
    }

    tokio::time::sleep(app.config.fetch_delay).await;
    match auth::admin_login(&username, &password, &app.config) {
        Ok(identity) => {
            log::info!("Admin signed in from chat {}", msg.chat.id.0);
            app.sessions.with(msg.chat.id.0, |s| s.sign_in(identity))?;
            show(&bot, &dialogue, &app, Screen::AdminDashboard).await?;
        }
        Err(e) => {
            bot.send_message(msg.chat.id, format!("❌ {}", e.user_message()))
                .await?;
            show_login(&bot, &dialogue).await?;
        }
    }
    Ok(())
}

//////////////////////////////////////////////////////////
// Dashboard
//////////////////////////////////////////////////////////
pub async fn show_dashboard(bot: &Bot, dialogue: &MyDialogue, app: &App) -> HandlerResult {
    let (stats, by_route) = {
        let board = app.board();
        (board.stats(), board.stats_by_route())
    };
    bot.send_message(dialogue.chat_id(), render_dashboard(&stats, &by_route))
        .parse_mode(Html)
        .reply_markup(KeyboardRemove::new())
        .await?;
    dialogue.update(State::Start).await?;
    Ok(())
}

pub async fn list_complaints(bot: &Bot, chat_id: ChatId, app: &App, args: &str) -> HandlerResult {
    let text = match Filter::parse(args) {
        Ok(filter) => {
            let board = app.board();
            let items = board.filter(&filter);
            render_list(&items, &app.routes)
        }
        Err(e) => format!("❌ {}", escape(&e.user_message())),
    };
    bot.send_message(chat_id, text).parse_mode(Html).await?;
    Ok(())
}

pub async fn change_status(bot: &Bot, chat_id: ChatId, app: &App, args: &str) -> HandlerResult {
    let result = parse_status_args(args).and_then(|(id, status)| {
        let mut board = app.board();
        let text = board
            .set_status(&id, status, Utc::now())
            .map(|item| format!("✅ <b>{}</b> is now {}", escape(&item.title), item.status));
        text
    });

    let text = match result {
        Ok(text) => text,
        Err(e) => format!("❌ {}", escape(&e.user_message())),
    };
    bot.send_message(chat_id, text).parse_mode(Html).await?;
    Ok(())
}

/// `<id> <status>`, e.g. `2 resolved`.
fn parse_status_args(args: &str) -> Result<(String, FeedbackStatus)> {
    let usage = || Error::Validation("Usage: /status <id> <pending|reviewing|resolved>".to_string());

    let mut words = args.split_whitespace();
    let (Some(id), Some(status), None) = (words.next(), words.next(), words.next()) else {
        return Err(usage());
    };
    let status = FeedbackStatus::parse(status).ok_or_else(usage)?;
    Ok((id.to_string(), status))
}

fn render_dashboard(stats: &Stats, by_route: &[RouteStats]) -> String {
    let mut text = format!(
        "🛠 <b>Admin Dashboard</b>\nManage feedback and complaints\n\n\
         Total: <b>{}</b>\nPending: <b>{}</b>\nReviewing: <b>{}</b>\nResolved: <b>{}</b>\n",
        stats.total, stats.pending, stats.reviewing, stats.resolved
    );

    text.push_str("\n<b>Complaints by Route</b>\n");
    for row in by_route {
        text.push_str(&format!(
            "{} {}: {} pending out of {} total ({})\n",
            if row.needs_attention() { "🔴" } else { "🟢" },
            escape(&row.label),
            row.pending,
            row.total,
            if row.needs_attention() { "Needs attention" } else { "All resolved" }
        ));
    }

    text.push_str(
        "\n/complaints [route:&lt;id&gt;] [status:&lt;status&gt;] [text] - List and filter\n\
         /status &lt;id&gt; &lt;status&gt; - Update a status\n\
         /logout - Log out",
    );
    text
}

fn render_list(items: &[&FeedbackItem], routes: &RouteCatalog) -> String {
    if items.is_empty() {
        return "No feedback or complaints match these filters.".to_string();
    }

    let mut text = format!("📋 <b>{} result(s)</b>\n", items.len());
    for item in items.iter().take(LIST_LIMIT) {
        text.push_str(&format!(
            "\n<code>{}</code> | {} | <b>{}</b>\n{} | {} | {}\n{}\n",
            escape(&item.id),
            item.kind,
            escape(&item.title),
            escape(&routes.label(&item.route_id)),
            item.status,
            item.created_at.format("%d %b %Y"),
            escape(&item.description)
        ));
    }
    if items.len() > LIST_LIMIT {
        text.push_str(&format!("\n… and {} more. Narrow the filters to see them.", items.len() - LIST_LIMIT));
    }
    text
}
