//! HTML email bodies for the notification worker.
//!
//! Every template wraps its body inside a shared shell with a per-template
//! accent color. Rendering is infallible string assembly; the subject line
//! and body come from the same template so callers cannot mix them up.

/// One rendered email per upstream event kind.
#[derive(Debug)]
pub enum EmailTemplate<'a> {
    RegistrationConfirmed {
        user_name: &'a str,
        event_title: &'a str,
        event_location: &'a str,
        event_date: String,
        ticket_code: &'a str,
    },
    RegistrationCancelled {
        user_name: &'a str,
        event_title: &'a str,
    },
    EventPublished {
        event_title: &'a str,
        event_description: &'a str,
        event_location: &'a str,
        event_date: String,
        capacity: i64,
    },
    EventCancelled {
        event_title: &'a str,
        original_date: String,
        affected_registrations: i64,
    },
    EventReminder {
        user_name: &'a str,
        event_title: &'a str,
        event_location: &'a str,
        event_date: String,
        ticket_code: &'a str,
    },
}

const ACCENT_GREEN: &str = "#16A34A";
const ACCENT_RED: &str = "#D02020";
const ACCENT_BLUE: &str = "#1040C0";
const ACCENT_YELLOW: &str = "#F0C020";

impl EmailTemplate<'_> {
    pub fn subject(&self) -> String {
        match self {
            Self::RegistrationConfirmed { event_title, .. } => {
                format!("Registration Confirmed: {event_title}")
            }
            Self::RegistrationCancelled { event_title, .. } => {
                format!("Registration Cancelled: {event_title}")
            }
            Self::EventPublished { event_title, .. } => {
                format!("Your Event is Live: {event_title}")
            }
            Self::EventCancelled { event_title, .. } => format!("Event Cancelled: {event_title}"),
            Self::EventReminder { event_title, .. } => {
                format!("Reminder: {event_title} is coming up!")
            }
        }
    }

    pub fn render(&self) -> String {
        let (accent, body) = match self {
            Self::RegistrationConfirmed {
                user_name,
                event_title,
                event_location,
                event_date,
                ticket_code,
            } => {
                let user_name = escape_html(user_name);
                let event_title = escape_html(event_title);
                (
                    ACCENT_GREEN,
                    format!(
                        "<h2 style=\"margin-top:0;\">You're in, {user_name}!</h2>\
                         <p>Your registration for <strong>{event_title}</strong> is confirmed.</p>\
                         {}\
                         <p>Your ticket QR code is attached to your account. Show it at the entrance.</p>",
                        detail_rows(&[
                            ("When", event_date),
                            ("Where", event_location),
                            ("Ticket code", ticket_code),
                        ])
                    ),
                )
            }
            Self::RegistrationCancelled {
                user_name,
                event_title,
            } => {
                let user_name = escape_html(user_name);
                let event_title = escape_html(event_title);
                (
                    ACCENT_RED,
                    format!(
                        "<h2 style=\"margin-top:0;\">Registration cancelled</h2>\
                         <p>Hi {user_name}, your registration for <strong>{event_title}</strong> \
                         has been cancelled.</p>\
                         <p>If this wasn't you, you can register again any time while seats last.</p>"
                    ),
                )
            }
            Self::EventPublished {
                event_title,
                event_description,
                event_location,
                event_date,
                capacity,
            } => {
                let event_title = escape_html(event_title);
                let event_description = escape_html(event_description);
                (
                    ACCENT_BLUE,
                    format!(
                        "<h2 style=\"margin-top:0;\">Your event is live</h2>\
                         <p><strong>{event_title}</strong> is now visible to attendees.</p>\
                         <p>{event_description}</p>\
                         {}",
                        detail_rows(&[
                            ("When", event_date),
                            ("Where", event_location),
                            ("Capacity", &capacity.to_string()),
                        ])
                    ),
                )
            }
            Self::EventCancelled {
                event_title,
                original_date,
                affected_registrations,
            } => {
                let event_title = escape_html(event_title);
                let original_date = escape_html(original_date);
                (
                    ACCENT_YELLOW,
                    format!(
                        "<h2 style=\"margin-top:0;\">Event cancelled</h2>\
                         <p><strong>{event_title}</strong>, originally scheduled for \
                         {original_date}, has been cancelled.</p>\
                         <p>{affected_registrations} registered attendee(s) will be notified.</p>"
                    ),
                )
            }
            Self::EventReminder {
                user_name,
                event_title,
                event_location,
                event_date,
                ticket_code,
            } => {
                let user_name = escape_html(user_name);
                let event_title = escape_html(event_title);
                (
                    ACCENT_YELLOW,
                    format!(
                        "<h2 style=\"margin-top:0;\">See you soon, {user_name}!</h2>\
                         <p><strong>{event_title}</strong> is coming up.</p>\
                         {}",
                        detail_rows(&[
                            ("When", event_date),
                            ("Where", event_location),
                            ("Ticket code", ticket_code),
                        ])
                    ),
                )
            }
        };
        layout(&self.subject(), accent, &body)
    }
}

/// Escape text for interpolation into the HTML shell. Subjects stay raw
/// (they travel in the Subject header, not in markup).
fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn detail_rows(rows: &[(&str, &str)]) -> String {
    let mut table = String::from(
        "<table role=\"presentation\" cellpadding=\"0\" cellspacing=\"0\" \
         style=\"margin:16px 0;border-collapse:collapse;\">",
    );
    for (label, value) in rows {
        let value = escape_html(value);
        table.push_str(&format!(
            "<tr>\
             <td style=\"padding:6px 16px 6px 0;color:#6b7280;font-size:14px;\">{label}</td>\
             <td style=\"padding:6px 0;font-size:14px;font-weight:600;\">{value}</td>\
             </tr>"
        ));
    }
    table.push_str("</table>");
    table
}

fn layout(subject: &str, accent: &str, body: &str) -> String {
    let subject = escape_html(subject);
    format!(
        "<!DOCTYPE html>\
<html lang=\"en\">\
<head><meta charset=\"utf-8\"><title>{subject}</title></head>\
<body style=\"margin:0;padding:0;background-color:#f0f0f0;\
font-family:'Segoe UI',Roboto,Helvetica,Arial,sans-serif;color:#111827;\">\
<table role=\"presentation\" width=\"100%\" cellpadding=\"0\" cellspacing=\"0\">\
<tr><td align=\"center\" style=\"padding:32px 16px;\">\
<table role=\"presentation\" width=\"600\" cellpadding=\"0\" cellspacing=\"0\" \
style=\"max-width:600px;width:100%;\">\
<tr><td style=\"background-color:#121212;padding:24px 32px;\">\
<span style=\"font-size:16px;font-weight:900;color:#ffffff;letter-spacing:1px;\
text-transform:uppercase;\">EM-Connect</span></td></tr>\
<tr><td style=\"height:4px;background-color:{accent};\"></td></tr>\
<tr><td style=\"background-color:#ffffff;padding:32px;\">{body}</td></tr>\
<tr><td style=\"background-color:#121212;padding:20px 32px;font-size:11px;\
color:rgba(255,255,255,0.35);\">\
This is an automated message from EM-Connect. Please do not reply.\
</td></tr>\
</table></td></tr></table></body></html>"
    )
}
