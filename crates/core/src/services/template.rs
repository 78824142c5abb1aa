//! Placeholder substitution for message bodies.

use std::collections::BTreeMap;

use crate::models::Contact;

/// Render a template body for one contact.
///
/// Campaign variables are substituted first, then the contact built-ins
/// (`name`, `phone`, `email`), then the contact's metadata keys. Every
/// `{{key}}` occurrence is replaced literally; unknown tokens are left as-is
/// and values are not escaped.
#[must_use]
pub fn render(body: &str, variables: &BTreeMap<String, String>, contact: &Contact) -> String {
    let mut rendered = body.to_string();

    for (key, value) in variables {
        rendered = substitute(&rendered, key, value);
    }

    rendered = substitute(&rendered, "name", &contact.name);
    rendered = substitute(&rendered, "phone", &contact.phone);
    rendered = substitute(&rendered, "email", contact.email.as_deref().unwrap_or_default());

    for (key, value) in &contact.metadata {
        rendered = substitute(&rendered, key, value);
    }

    rendered
}

fn substitute(text: &str, key: &str, value: &str) -> String {
    text.replace(&format!("{{{{{key}}}}}"), value)
}
