//! Transactional email bodies. Every template renders an HTML and a plain
//! text part; only generated values (codes, links) are interpolated.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailContent {
    pub subject: String,
    pub html: String,
    pub text: String,
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><body style=\"font-family:sans-serif\">\
         <h2>{title}</h2>{body}</body></html>"
    )
}

pub fn reset_code(code: &str, ttl_minutes: i64) -> EmailContent {
    EmailContent {
        subject: "Reset your password".to_string(),
        html: layout(
            "Reset your password",
            &format!(
                "<p>Use the code below to reset your password. It expires in {ttl_minutes} minutes.</p>\
                 <p style=\"font-size:24px;letter-spacing:4px\"><strong>{code}</strong></p>\
                 <p>If you did not ask for a reset you can ignore this email.</p>"
            ),
        ),
        text: format!(
            "Use the code below to reset your password. It expires in {ttl_minutes} minutes.\n\n\
             {code}\n\n\
             If you did not ask for a reset you can ignore this email.\n"
        ),
    }
}

pub fn waiting_list_joined(position_link: &str) -> EmailContent {
    EmailContent {
        subject: "You just joined the waiting list!".to_string(),
        html: layout(
            "You're on the list",
            &format!(
                "<p>We'll email you an invitation code as soon as a spot opens up.</p>\
                 <p><a href=\"{position_link}\">Check your position</a></p>"
            ),
        ),
        text: format!(
            "You're on the list. We'll email you an invitation code as soon as a spot opens up.\n\n\
             Check your position: {position_link}\n"
        ),
    }
}

pub fn waiting_list_invite(code: &str, position_link: &str) -> EmailContent {
    EmailContent {
        subject: "A spot just opened up for you".to_string(),
        html: layout(
            "Your invitation code",
            &format!(
                "<p>Register with this email address and the code below. It can be used once.</p>\
                 <p style=\"font-family:monospace\"><strong>{code}</strong></p>\
                 <p><a href=\"{position_link}\">View your waiting list entry</a></p>"
            ),
        ),
        text: format!(
            "Register with this email address and the code below. It can be used once.\n\n\
             {code}\n\n\
             View your waiting list entry: {position_link}\n"
        ),
    }
}
