//! Email rendering for horse notifications.

use chrono::NaiveDate;
use serde::Serialize;

use crate::payload::NotificationPayload;

/// Inputs that are not part of the payload itself.
#[derive(Debug, Clone, Default)]
pub struct MessageContext<'a> {
    pub horse_name: &'a str,
    pub recipient_name: Option<&'a str>,
    /// Base URL of the web application, for the footer link.
    pub base_url: Option<&'a str>,
}

/// A rendered plain-text email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedMessage {
    pub subject: String,
    pub text_body: String,
}

/// Render the subject and body for a notification.
pub fn render(ctx: &MessageContext<'_>, payload: &NotificationPayload) -> RenderedMessage {
    let horse = ctx.horse_name;
    let (subject, lines) = match payload {
        NotificationPayload::NewRace(r) => {
            let headline = match r.position {
                Some(p) => format!("{horse} finished {} on {}", ordinal(p), fmt_date(r.race_date)),
                None => format!("{horse} ran on {}", fmt_date(r.race_date)),
            };
            let mut lines = vec![headline.clone()];
            push_opt(&mut lines, "City", r.city.as_deref());
            push_opt(&mut lines, "Distance", r.distance.map(fmt_distance).as_deref());
            push_opt(&mut lines, "Prize money", r.prize_money.map(fmt_money).as_deref());
            (format!("Race result: {headline}"), lines)
        }
        NotificationPayload::HorseRegistered(r) => {
            let headline = format!("{horse} is registered for the race on {}", fmt_date(r.race_date));
            let mut lines = vec![headline];
            push_opt(&mut lines, "City", r.city.as_deref());
            push_opt(&mut lines, "Distance", r.distance.map(fmt_distance).as_deref());
            (format!("New registration: {horse}"), lines)
        }
        NotificationPayload::HorseDeclared(d) => {
            let headline = format!("{horse} has been declared for the race on {}", fmt_date(d.race_date));
            let mut lines = vec![headline];
            push_opt(
                &mut lines,
                "Declared on",
                d.declaration_date.map(fmt_date).as_deref(),
            );
            push_opt(&mut lines, "City", d.city.as_deref());
            push_opt(&mut lines, "Distance", d.distance.map(fmt_distance).as_deref());
            push_opt(&mut lines, "Jockey", d.jockey_name.as_deref());
            (format!("New declaration: {horse}"), lines)
        }
        NotificationPayload::NewTraining(t) => {
            let headline = format!("{horse} trained on {}", fmt_date(t.training_date));
            let mut lines = vec![headline];
            push_opt(&mut lines, "Racecourse", t.racecourse.as_deref());
            if !t.distances.is_empty() {
                lines.push(format!("Distances: {}", t.distances.join(", ")));
            }
            (format!("New training: {horse}"), lines)
        }
    };

    let mut body = String::new();
    if let Some(name) = ctx.recipient_name {
        body.push_str(&format!("Hello {name},\n\n"));
    }
    body.push_str(&lines.join("\n"));
    body.push('\n');
    if let Some(url) = ctx.base_url {
        body.push_str(&format!(
            "\nSee the details at {}\n",
            url.trim_end_matches('/')
        ));
    }
    body.push_str("\nYou can turn these emails off in your notification settings.\n");

    RenderedMessage {
        subject,
        text_body: body,
    }
}

fn push_opt(lines: &mut Vec<String>, label: &str, value: Option<&str>) {
    if let Some(v) = value {
        lines.push(format!("{label}: {v}"));
    }
}

fn fmt_date(date: NaiveDate) -> String {
    date.format("%d.%m.%Y").to_string()
}

fn fmt_distance(meters: u32) -> String {
    format!("{meters} m")
}

fn fmt_money(amount: f64) -> String {
    let whole = amount.round() as u64;
    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    format!("{grouped} TL")
}

fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}
