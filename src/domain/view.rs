use serde::{Deserialize, Serialize};

/// Correlation identifier pairing a [`ViewRequest`] with its [`ViewResponse`].
pub type RequestId = u32;

/// Message sent to the worker on its `getView` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewRequest {
    pub id: RequestId,
    pub view_name: String,
    /// Render context handed to the view's decoder. `null` when the caller
    /// supplied none.
    #[serde(default)]
    pub context: serde_json::Value,
}

impl ViewRequest {
    pub fn new(id: RequestId, view_name: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            id,
            view_name: view_name.into(),
            context,
        }
    }
}

/// Message received from the worker on its `receiveHtml` channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewResponse {
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ViewResponse {
    pub fn html(id: RequestId, html: impl Into<String>) -> Self {
        Self {
            id,
            html: Some(html.into()),
            error: None,
        }
    }

    pub fn error(id: RequestId, error: impl Into<String>) -> Self {
        Self {
            id,
            html: None,
            error: Some(error.into()),
        }
    }

    /// Splits the response into its outcome. An error field takes precedence
    /// over html; `None` means the worker populated neither.
    pub fn into_outcome(self) -> Option<Result<String, String>> {
        match (self.error, self.html) {
            (Some(error), _) => Some(Err(error)),
            (None, Some(html)) => Some(Ok(html)),
            (None, None) => None,
        }
    }
}
