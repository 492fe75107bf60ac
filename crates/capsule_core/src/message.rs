//! Outgoing message content for unlock, reminder and "received" notices.

use crate::model::CapsuleProjection;
use crate::reminder::ReminderStage;
use serde::Serialize;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, UtcOffset};

pub const DEFAULT_PREVIEW_CHARS: usize = 120;
const UNTITLED: &str = "Untitled";
const UNKNOWN_SENDER: &str = "Someone";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// `<frontend-base>/capsule/share/<token-or-id>`
pub fn access_link(frontend_base: &str, capsule: &CapsuleProjection) -> String {
    format!(
        "{}/capsule/share/{}",
        frontend_base.trim().trim_end_matches('/'),
        capsule.access_token()
    )
}

pub fn preview(message: &str, max_chars: usize) -> String {
    message.trim().chars().take(max_chars).collect()
}

pub fn relative_until(target: OffsetDateTime, now: OffsetDateTime) -> String {
    let diff = target - now;
    if diff <= Duration::ZERO {
        return "now".to_string();
    }

    let days = diff.whole_days();
    let hours = diff.whole_hours() % 24;
    let minutes = diff.whole_minutes() % 60;
    let seconds = diff.whole_seconds() % 60;

    match (days, hours, minutes) {
        (d, _, _) if d > 1 => format!("in {d} days"),
        (1, _, _) => "in 1 day".to_string(),
        (_, h, _) if h > 1 => format!("in {h} hours"),
        (_, 1, _) => "in 1 hour".to_string(),
        (_, _, m) if m > 1 => format!("in {m} minutes"),
        (_, _, 1) => "in 1 minute".to_string(),
        _ => format!("in {seconds} seconds"),
    }
}

pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC)
}

pub fn format_local(at: OffsetDateTime, offset: UtcOffset) -> String {
    let format = format_description!(
        "[year]-[month]-[day] [hour]:[minute] [offset_hour sign:mandatory]:[offset_minute]"
    );
    at.to_offset(offset)
        .format(&format)
        .unwrap_or_else(|_| at.to_string())
}

fn title_of(capsule: &CapsuleProjection) -> &str {
    capsule
        .title
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(UNTITLED)
}

fn sender_of(capsule: &CapsuleProjection) -> &str {
    capsule
        .sender
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_SENDER)
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn open_button(link: &str) -> String {
    format!(
        "<a href=\"{}\" target=\"_blank\" style=\"display:inline-block;padding:10px 16px;\
         background:#22c55e;color:#000;text-decoration:none;border-radius:8px;font-weight:700\">\
         Open Capsule</a>",
        escape_html(link)
    )
}

fn card(body: &str) -> String {
    format!(
        "<div style=\"font-family:Arial,sans-serif;background:#111827;color:#e5e7eb;\
         padding:20px;border-radius:12px\">{body}</div>"
    )
}

pub fn unlock_message(
    to: &str,
    capsule: &CapsuleProjection,
    link: &str,
    preview_chars: usize,
) -> OutgoingMessage {
    let title = title_of(capsule);
    let sender = sender_of(capsule);
    let preview = preview(&capsule.message, preview_chars);

    let mut text = format!("It's open now!\n\nTitle: {title}\n");
    if !preview.is_empty() {
        text.push_str(&format!("Preview: {preview}\n"));
    }
    text.push_str(&format!("Open it: {link}"));

    let mut body = format!(
        "<h2 style=\"margin:0 0 8px;color:#22c55e\">Your Time Capsule is unlocked!</h2>\
         <p style=\"margin:6px 0\"><strong>From:</strong> {}</p>\
         <p style=\"margin:6px 0\"><strong>Title:</strong> {}</p>",
        escape_html(sender),
        escape_html(title)
    );
    if !preview.is_empty() {
        body.push_str(&format!(
            "<p style=\"margin:12px 0;color:#9ca3af\">Preview: {}</p>",
            escape_html(&preview)
        ));
    }
    body.push_str(&open_button(link));

    OutgoingMessage {
        to: to.to_string(),
        subject: format!("🔓 Your Time Capsule from {sender} is unlocked"),
        text,
        html: card(&body),
    }
}

pub fn reminder_message(
    to: &str,
    capsule: &CapsuleProjection,
    link: &str,
    stage: ReminderStage,
    unlock_at: OffsetDateTime,
    now: OffsetDateTime,
    offset: UtcOffset,
) -> OutgoingMessage {
    let title = title_of(capsule);
    let sender = sender_of(capsule);
    let unlock_in = relative_until(unlock_at, now);
    let unlock_local = format_local(unlock_at, offset);

    let text = format!(
        "From: {sender}\nTitle: {title}\nUnlocks {unlock_in} ({unlock_local})\nLink: {link}"
    );
    let body = format!(
        "<h2 style=\"color:#22c55e;margin:0 0 8px;\">Your Time Capsule unlocks {}</h2>\
         <p style=\"margin:6px 0\"><strong>From:</strong> {}</p>\
         <p style=\"margin:6px 0\"><strong>Title:</strong> {}</p>\
         <p style=\"margin:6px 0\"><strong>Unlock time:</strong> {}</p>\
         {}\
         <p style=\"margin-top:12px;color:#9ca3af\">Stage: {}</p>",
        escape_html(&unlock_in),
        escape_html(sender),
        escape_html(title),
        escape_html(&unlock_local),
        open_button(link),
        stage
    );

    OutgoingMessage {
        to: to.to_string(),
        subject: format!("⏳ Your Time Capsule unlocks {unlock_in}"),
        text,
        html: card(&body),
    }
}

pub fn received_message(
    to: &str,
    capsule: &CapsuleProjection,
    link: &str,
    now: OffsetDateTime,
    offset: UtcOffset,
) -> OutgoingMessage {
    let title = title_of(capsule);
    let sender = sender_of(capsule);
    let unlock = capsule
        .unlock_time()
        .map(|at| (relative_until(at, now), format_local(at, offset)));

    let when_text = match &unlock {
        Some((unlock_in, unlock_local)) => format!("It unlocks {unlock_in} ({unlock_local}).\n"),
        None => "It will unlock soon.\n".to_string(),
    };
    let text = format!(
        "Hello!\n\n{sender} sent you a time capsule.\nTitle: {title}\n{when_text}Link: {link}"
    );

    let when_html = match &unlock {
        Some((unlock_in, unlock_local)) => format!(
            "<p style=\"margin:6px 0\"><strong>Unlocks:</strong> {} \
             <span style=\"color:#9ca3af\">({})</span></p>",
            escape_html(unlock_in),
            escape_html(unlock_local)
        ),
        None => "<p style=\"margin:6px 0\"><strong>Unlocks:</strong> soon</p>".to_string(),
    };
    let body = format!(
        "<h2 style=\"margin:0 0 8px;color:#22c55e\">You've received a Time Capsule!</h2>\
         <p style=\"margin:6px 0\"><strong>From:</strong> {}</p>\
         <p style=\"margin:6px 0\"><strong>Title:</strong> {}</p>\
         {when_html}\
         <p style=\"margin:12px 0\">Use the button below when it's unlocked:</p>\
         {}",
        escape_html(sender),
        escape_html(title),
        open_button(link)
    );

    OutgoingMessage {
        to: to.to_string(),
        subject: format!("📦 You've received a Time Capsule from {sender}"),
        text,
        html: card(&body),
    }
}
