use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// JSON envelope shared by the webhook and order endpoints:
/// `{"success": bool, "message": string}`.
#[derive(Debug, Serialize)]
struct ApiBody {
    success: bool,
    message: String,
}

/// Response wrapper pairing the envelope with an HTTP status code.
#[derive(Debug)]
pub struct ApiReply {
    status: StatusCode,
    body: ApiBody,
}

impl ApiReply {
    /// Successful envelope with HTTP 200.
    pub fn ok<S: Into<String>>(message: S) -> Self {
        Self {
            status: StatusCode::OK,
            body: ApiBody {
                success: true,
                message: message.into(),
            },
        }
    }

    /// Failure envelope with the provided status code.
    pub fn failure<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            body: ApiBody {
                success: false,
                message: message.into(),
            },
        }
    }
}

impl IntoResponse for ApiReply {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response
    }
}
