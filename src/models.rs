use crate::mailbox::Credentials;
use rocket::http::{ContentType, Status};
use rocket::response::{self, Responder};
use rocket::{Request, Response};
use rocket_okapi::okapi::openapi3::Responses;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::response::OpenApiResponderInner;
use rocket_okapi::util::add_schema_response;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

// ===== Requests =====

/// Mailbox to synchronize. All three fields are required and non-empty.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// IMAP server as `host` or `host:port`; port 993 when omitted.
    pub address: String,
    /// Login name; also the owner key of the ledger.
    pub user: String,
    /// Password or app password.
    pub secret: String,
}

impl SyncRequest {
    pub fn is_complete(&self) -> bool {
        [&self.address, &self.user, &self.secret]
            .iter()
            .all(|field| !field.trim().is_empty())
    }

    pub fn into_credentials(self) -> Credentials {
        Credentials {
            address: self.address.trim().to_string(),
            user: self.user.trim().to_string(),
            secret: self.secret,
        }
    }
}

// ===== Responses =====

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub status: u16,
    pub message: String,
    /// Time-bounded read link to the ledger workbook.
    pub ledger_url: String,
}

impl SyncResponse {
    pub fn created(ledger_url: String) -> Self {
        Self {
            status: Status::Created.code,
            message: "Success".to_string(),
            ledger_url,
        }
    }
}

impl<'r> Responder<'r, 'static> for SyncResponse {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let status = Status::from_code(self.status).unwrap_or(Status::Created);
        let json = serde_json::to_string(&self).map_err(|e| {
            log::error!("unable to serialize sync response: {}", e);
            Status::InternalServerError
        })?;

        Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(json.len(), Cursor::new(json))
            .ok()
    }
}

impl OpenApiResponderInner for SyncResponse {
    fn responses(generator: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        let mut responses = Responses::default();
        let schema = generator.json_schema::<SyncResponse>();
        add_schema_response(&mut responses, 201, "application/json", schema)?;
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_camel_case_fields() {
        let request: SyncRequest = serde_json::from_str(
            r#"{"address":"imap.example.com:993","user":"ann@example.com","secret":"pw"}"#,
        )
        .unwrap();
        assert!(request.is_complete());

        let credentials = request.into_credentials();
        assert_eq!(credentials.address, "imap.example.com:993");
        assert_eq!(credentials.user, "ann@example.com");
    }

    #[test]
    fn blank_fields_make_request_incomplete() {
        let request = SyncRequest {
            address: "imap.example.com".into(),
            user: "  ".into(),
            secret: "pw".into(),
        };
        assert!(!request.is_complete());
    }

    #[test]
    fn response_serializes_ledger_url_in_camel_case() {
        let body = serde_json::to_value(SyncResponse::created("https://link".into())).unwrap();
        assert_eq!(body["status"], 201);
        assert_eq!(body["message"], "Success");
        assert_eq!(body["ledgerUrl"], "https://link");
    }
}
