use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest accepted name, in characters.
pub const MAX_NAME_CHARS: usize = 200;

/// Longest accepted email address, in characters.
pub const MAX_EMAIL_CHARS: usize = 320;

/// Longest accepted message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 5000;

/// A submission of the site's contact form.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContactForm {
    /// The submitter's name.
    pub name: String,

    /// The submitter's email address; used as the reply-to address.
    pub email: String,

    /// The free-text message.
    pub message: String,
}

impl ContactForm {
    /// Create a new form submission.
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            message: message.into(),
        }
    }

    /// Return a copy with surrounding whitespace removed from every field.
    pub fn trimmed(&self) -> Self {
        Self::new(self.name.trim(), self.email.trim(), self.message.trim())
    }

    /// Check that the submission can be turned into an email.
    pub fn validate(&self) -> Result<()> {
        check_length("name", &self.name, MAX_NAME_CHARS)?;
        check_length("email", &self.email, MAX_EMAIL_CHARS)?;
        check_length("message", &self.message, MAX_MESSAGE_CHARS)?;
        // The name ends up in the subject line.
        if self.name.chars().any(char::is_control) {
            return Err(Error::validation(
                "name must not contain control characters",
                Some("name".to_string()),
            ));
        }
        if !looks_like_email(&self.email) {
            return Err(Error::validation(
                "email is not a valid address",
                Some("email".to_string()),
            ));
        }
        Ok(())
    }
}

fn check_length(field: &str, value: &str, max: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(
            format!("{field} is required"),
            Some(field.to_string()),
        ));
    }
    if value.chars().count() > max {
        return Err(Error::validation(
            format!("{field} must be at most {max} characters"),
            Some(field.to_string()),
        ));
    }
    Ok(())
}

fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(|c| c.is_whitespace() || c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_form_passes() {
        let form = ContactForm::new("Ada", "ada@example.com", "Hello there");
        assert!(form.validate().is_ok());
    }

    #[test]
    fn missing_fields_are_rejected() {
        let err = ContactForm::new("", "ada@example.com", "hi")
            .validate()
            .unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("name is required"));

        let err = ContactForm::new("Ada", "ada@example.com", "   ")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("message is required"));
    }

    #[test]
    fn malformed_email_is_rejected() {
        for email in ["ada", "@example.com", "ada@", "ada @example.com", "ada@.com"] {
            let err = ContactForm::new("Ada", email, "hi").validate().unwrap_err();
            assert!(err.to_string().contains("email"), "{email}");
        }
    }

    #[test]
    fn newline_in_name_is_rejected() {
        let err = ContactForm::new("Ada\nBcc: x@example.com", "ada@example.com", "hi")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("control characters"));
    }

    #[test]
    fn overlong_message_is_rejected() {
        let message = "x".repeat(MAX_MESSAGE_CHARS + 1);
        let err = ContactForm::new("Ada", "ada@example.com", message)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("at most"));
    }

    #[test]
    fn trimmed_strips_whitespace() {
        let form = ContactForm::new("  Ada ", " ada@example.com\n", " hi ").trimmed();
        assert_eq!(form, ContactForm::new("Ada", "ada@example.com", "hi"));
    }
}
