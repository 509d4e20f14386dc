// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helpers that keep credentials and identifiers out of log output.

use serde_json::Value;

/// Keys whose values are partially masked with [`hide_serial`].
const SERIAL_KEYS: &[&str] = &[
    "deviceSerialNumber",
    "serialNumber",
    "destinationUserId",
    "customerId",
    "access_token",
    "refresh_token",
];

/// Masks an email address, keeping the first and last character of the
/// local part and of the domain.
///
/// Values without an `@` are masked with [`hide_serial`].
///
/// # Examples
///
/// ```
/// use sengled_lib::redact::hide_email;
///
/// assert_eq!(hide_email("alice@example.com"), "a***e@e*********m");
/// ```
#[must_use]
pub fn hide_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => format!("{}@{}", mask_middle(local), mask_middle(domain)),
        None => hide_serial(email),
    }
}

/// Replaces a password with its length.
#[must_use]
pub fn hide_password(value: &str) -> String {
    format!("REDACTED {} CHARS", value.chars().count())
}

/// Masks an identifier, keeping its first character and last three.
///
/// Identifiers of six characters or fewer are masked entirely.
#[must_use]
pub fn hide_serial(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 6 {
        return "*".repeat(chars.len());
    }
    let head = chars[0];
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 4))
}

/// Returns a copy of `value` with sensitive fields masked.
///
/// Walks objects and arrays recursively.
#[must_use]
pub fn obfuscate(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), obfuscate_field(key, value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(obfuscate).collect()),
        other => other.clone(),
    }
}

fn obfuscate_field(key: &str, value: &Value) -> Value {
    match (key, value) {
        ("password" | "pwd", Value::String(s)) => Value::String(hide_password(s)),
        ("email" | "user", Value::String(s)) => Value::String(hide_email(s)),
        (k, _) if k.to_ascii_lowercase().contains("cookie") => {
            Value::String("OBFUSCATED COOKIE".to_string())
        }
        (k, Value::String(s)) if SERIAL_KEYS.contains(&k) || k.contains("secret") => {
            Value::String(hide_serial(s))
        }
        (_, other) => obfuscate(other),
    }
}

fn mask_middle(part: &str) -> String {
    let chars: Vec<char> = part.chars().collect();
    match chars.len() {
        0 => String::new(),
        1 | 2 => "*".repeat(chars.len()),
        n => format!("{}{}{}", chars[0], "*".repeat(n - 2), chars[n - 1]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn email_keeps_edges() {
        assert_eq!(hide_email("bob@mail.io"), "b*b@m*****o");
    }

    #[test]
    fn email_without_at_is_serial_masked() {
        assert_eq!(hide_email("abcdefgh"), "a****fgh");
    }

    #[test]
    fn short_serial_fully_masked() {
        assert_eq!(hide_serial("abc"), "***");
        assert_eq!(hide_serial(""), "");
    }

    #[test]
    fn password_reports_length_only() {
        assert_eq!(hide_password("hunter2"), "REDACTED 7 CHARS");
    }

    #[test]
    fn obfuscate_masks_nested_fields() {
        let masked = obfuscate(&json!({
            "user": "alice@example.com",
            "pwd": "secret",
            "customerId": "1234567890",
            "nested": [{"client_secret": "abcdefghij"}],
            "Cookie": "JSESSIONID=abc",
            "uuid": "plain"
        }));

        assert_eq!(masked["user"], "a***e@e*********m");
        assert_eq!(masked["pwd"], "REDACTED 6 CHARS");
        assert_eq!(masked["customerId"], "1******890");
        assert_eq!(masked["nested"][0]["client_secret"], "a******hij");
        assert_eq!(masked["Cookie"], "OBFUSCATED COOKIE");
        assert_eq!(masked["uuid"], "plain");
    }
}
