use crate::sync::SyncError;
use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::{Request, Response};
use rocket_okapi::okapi::openapi3::Responses;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::response::OpenApiResponderInner;
use rocket_okapi::util::add_schema_response;
use serde::Serialize;
use std::io::Cursor;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    UnprocessableEntity(String),
    Upstream(SyncError),
}

#[derive(Serialize, JsonSchema)]
struct ErrorResponse {
    status: u16,
    error: String,
    message: String,
}

impl ApiError {
    pub fn malformed_body() -> Self {
        ApiError::BadRequest("Malformed request body".to_string())
    }

    pub fn status(&self) -> Status {
        match self {
            ApiError::BadRequest(_) => Status::BadRequest,
            ApiError::UnprocessableEntity(_) => Status::UnprocessableEntity,
            ApiError::Upstream(e) if e.is_client_error() => Status::BadRequest,
            ApiError::Upstream(_) => Status::InternalServerError,
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        let (error_type, message) = match self {
            ApiError::BadRequest(msg) => {
                log::debug!("bad request: {}", msg);
                ("BadRequest", msg)
            }
            ApiError::UnprocessableEntity(msg) => {
                log::debug!("unprocessable entity: {}", msg);
                ("UnprocessableEntity", msg)
            }
            ApiError::Upstream(e) if e.is_client_error() => {
                log::info!("sync rejected: {}", e);
                ("MailboxError", e.to_string())
            }
            ApiError::Upstream(e) => {
                log::error!("sync failed: {}", e);
                ("SyncError", e.to_string())
            }
        };

        let error_response = ErrorResponse {
            status: status.code,
            error: error_type.to_string(),
            message,
        };

        let json = serde_json::to_string(&error_response).unwrap_or_else(|_| {
            r#"{"status":500,"error":"SerializationError","message":"Failed to serialize error"}"#
                .to_string()
        });

        Response::build()
            .status(status)
            .header(rocket::http::ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}

impl OpenApiResponderInner for ApiError {
    fn responses(generator: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        let mut responses = Responses::default();
        let schema = generator.json_schema::<ErrorResponse>();
        add_schema_response(&mut responses, 400, "application/json", schema.clone())?;
        add_schema_response(&mut responses, 500, "application/json", schema)?;
        Ok(responses)
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        ApiError::Upstream(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;

    #[test]
    fn mailbox_failures_map_to_bad_request() {
        let auth = ApiError::from(SyncError::Auth {
            user: "ann".into(),
            reason: "invalid credentials".into(),
        });
        assert_eq!(auth.status(), Status::BadRequest);

        let connect = ApiError::from(SyncError::Connection {
            address: "nowhere:993".into(),
            reason: "refused".into(),
        });
        assert_eq!(connect.status(), Status::BadRequest);
    }

    #[test]
    fn pipeline_failures_map_to_server_error() {
        let transfer = ApiError::from(SyncError::Transfer("reset".into()));
        assert_eq!(transfer.status(), Status::InternalServerError);

        let storage = ApiError::from(SyncError::Storage(StorageError::request(
            "ann/data.xlsx",
            "timeout",
        )));
        assert_eq!(storage.status(), Status::InternalServerError);
        assert_eq!(ApiError::malformed_body().status(), Status::BadRequest);
    }
}
