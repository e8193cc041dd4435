use thiserror::Error;

#[derive(Debug, Error)]
pub enum WhatsAppError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Graph API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("client not configured: {0}")]
    NotConfigured(&'static str),
}

impl WhatsAppError {
    /// Network failures and 5xx/429 responses are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            WhatsAppError::Http(_) => true,
            WhatsAppError::Api { status, .. } => *status == 429 || *status >= 500,
            WhatsAppError::NotConfigured(_) => false,
        }
    }
}
