use serde::{Deserialize, Serialize};

/// Body of an error frame: `{"error":{"message","type","code"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: ErrorBody,
}

impl ErrorFrame {
    pub fn new(message: impl Into<String>, r#type: impl Into<String>, code: Option<i64>) -> Self {
        Self {
            error: ErrorBody {
                message: message.into(),
                r#type: r#type.into(),
                code,
            },
        }
    }
}
