//! Contact details returned by skip-trace providers.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactKind {
    Phone,
    Email,
    MailingAddress,
}

/// One contact point with the provider's confidence in it (0.0 - 1.0)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub value: String,
    pub kind: ContactKind,
    pub confidence: f64,
}

impl Contact {
    pub fn phone(value: impl Into<String>, confidence: f64) -> Self {
        Self {
            value: value.into(),
            kind: ContactKind::Phone,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn email(value: impl Into<String>, confidence: f64) -> Self {
        Self {
            value: value.into(),
            kind: ContactKind::Email,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}
