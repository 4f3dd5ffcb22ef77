use serde_json::Value;

/// Failure taxonomy shared by every gateway call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("unexpected response: {0}")]
    Parse(String),
    #[error("request cancelled")]
    Cancelled,
    #[error("{0}")]
    Rejected(String),
}

impl GatewayError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GatewayError::Cancelled)
    }

    /// Message suitable for a pane error slot or a notification.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Rejected(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Parse(err.to_string())
    }
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Shape of a moderation endpoint reply, decided once at the parse boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Success(Value),
    BusinessError(String),
    RawText(String),
}

impl Reply {
    /// Classifies a response body. JSON objects carrying `result == "success"` succeed,
    /// other JSON objects become business errors formatted as `"<result>: <message>"`.
    pub fn classify(body: &str) -> Reply {
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) => {
                let result = map
                    .get("result")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if result == "success" {
                    return Reply::Success(Value::Object(map));
                }
                let message = map
                    .get("message")
                    .or_else(|| map.get("msg"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Reply::BusinessError(format!("{result}: {message}"))
            }
            _ => Reply::RawText(body.trim().to_string()),
        }
    }

    /// Server message of a successful reply, if it carried one.
    pub fn message(&self) -> Option<&str> {
        match self {
            Reply::Success(value) => value.get("message").and_then(Value::as_str),
            Reply::BusinessError(message) | Reply::RawText(message) => Some(message.as_str()),
        }
    }

    /// Collapses the reply into a gateway result. Raw text is a rejection carrying the
    /// text verbatim, matching how the site reports plain-text failures.
    pub fn into_result(self) -> GatewayResult<Value> {
        match self {
            Reply::Success(value) => Ok(value),
            Reply::BusinessError(message) | Reply::RawText(message) => {
                Err(GatewayError::Rejected(message))
            }
        }
    }
}
