//! Rendered notification copy. One `NotificationContent` bundle serves both
//! delivery paths: subject/text/html for email, a compact Markdown block for
//! chat channels.

use once_cell::sync::Lazy;
use tera::{Context, Tera};

use crate::db::entities::{incident, monitor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Down,
    Recovered,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationContent {
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
    pub chat_text: String,
}

const EMAIL_HTML: &str = r#"<p>Hi {{ greeting_name }},</p>
{% if recovered -%}
<p><strong>{{ monitor_name }}</strong> (<a href="{{ monitor_url }}">{{ monitor_url }}</a>) is back up.</p>
<p>Downtime: {{ downtime }}<br>
Recovered at: {{ timestamp }}</p>
{%- else -%}
<p><strong>{{ monitor_name }}</strong> (<a href="{{ monitor_url }}">{{ monitor_url }}</a>) appears to be down.</p>
<p>{{ reason }}<br>
Detected at: {{ timestamp }}</p>
{%- endif %}
{% if action_url -%}
<p><a href="{{ action_url }}">View monitor</a></p>
{%- endif %}
"#;

const EMAIL_TEXT: &str = r#"Hi {{ greeting_name }},

{% if recovered -%}
{{ monitor_name }} ({{ monitor_url }}) is back up.
Downtime: {{ downtime }}
Recovered at: {{ timestamp }}
{%- else -%}
{{ monitor_name }} ({{ monitor_url }}) appears to be down.
{{ reason }}
Detected at: {{ timestamp }}
{%- endif %}
{% if action_url %}View monitor: {{ action_url }}{% endif %}
"#;

const CHAT_TEXT: &str = r#"{% if recovered -%}
✅ *{{ monitor_name }}* is back up
Downtime: {{ downtime }}
Recovered at: {{ chat_timestamp }}
{%- else -%}
🔴 *{{ monitor_name }}* is down
{{ reason }}
Detected at: {{ chat_timestamp }}
{%- endif %}
{{ monitor_url }}
"#;

static TEMPLATES: Lazy<Tera> = Lazy::new(|| {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![
        ("incident_email.html", EMAIL_HTML),
        ("incident_email.txt", EMAIL_TEXT),
        ("incident_chat.txt", CHAT_TEXT),
    ])
    .expect("static notification templates must parse");
    tera
});

/// Renders the full content bundle for one incident transition.
/// `action_base_url` is the dashboard origin; without one the messages
/// simply carry no link.
pub fn render(
    kind: NotificationKind,
    monitor: &monitor::Model,
    incident: &incident::Model,
    greeting_name: &str,
    action_base_url: Option<&str>,
) -> Result<NotificationContent, tera::Error> {
    let recovered = kind == NotificationKind::Recovered;
    let stamp = match kind {
        NotificationKind::Down => incident.started_at,
        NotificationKind::Recovered => incident.resolved_at.unwrap_or(incident.started_at),
    };
    let action_url = action_base_url
        .map(|base| format!("{}/monitors/{}", base.trim_end_matches('/'), monitor.id));

    let mut context = Context::new();
    context.insert("greeting_name", greeting_name);
    context.insert("monitor_name", &monitor.name);
    context.insert("monitor_url", &monitor.url);
    context.insert("recovered", &recovered);
    context.insert("reason", &failure_reason(incident));
    context.insert(
        "downtime",
        &format_duration(incident.duration_seconds.map(i64::from)),
    );
    context.insert("timestamp", &stamp.format("%d.%m.%Y %H:%M:%S").to_string());
    context.insert(
        "chat_timestamp",
        &stamp.format("%d.%m.%Y %H:%M").to_string(),
    );
    context.insert("action_url", &action_url);

    Ok(NotificationContent {
        subject: match kind {
            NotificationKind::Down => format!("🔴 {} is down", monitor.name),
            NotificationKind::Recovered => format!("✅ {} is back up", monitor.name),
        },
        text_body: TEMPLATES.render("incident_email.txt", &context)?,
        html_body: TEMPLATES.render("incident_email.html", &context)?,
        chat_text: TEMPLATES.render("incident_chat.txt", &context)?,
    })
}

fn failure_reason(incident: &incident::Model) -> String {
    match (incident.status_code, &incident.error_message) {
        (Some(code), _) => format!("HTTP status {code}"),
        (None, Some(message)) => message.clone(),
        (None, None) => "No response received".to_string(),
    }
}

/// Human-readable downtime: "2h 5m", "3m 12s", "45s"; "-" when unknown.
pub fn format_duration(duration_seconds: Option<i64>) -> String {
    let Some(total) = duration_seconds else {
        return "-".to_string();
    };
    let total = total.max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
