use serde::{Deserialize, Serialize};

/// An outbound email for the transactional-email API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailParams {
    /// Sender, e.g. `MSTech <onboarding@resend.dev>`.
    pub from: String,

    /// Recipients.
    pub to: Vec<String>,

    /// Subject line.
    pub subject: String,

    /// Plain-text body.
    pub text: String,

    /// Address replies should go to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

/// What the email API returns for an accepted email.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailReceipt {
    /// Provider-assigned id of the email.
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_to_is_omitted_when_absent() {
        let email = EmailParams {
            from: "a@example.com".to_string(),
            to: vec!["b@example.com".to_string()],
            subject: "s".to_string(),
            text: "t".to_string(),
            reply_to: None,
        };
        let value = serde_json::to_value(&email).unwrap();
        assert!(value.get("reply_to").is_none());
        assert_eq!(value["to"], json!(["b@example.com"]));
    }
}
