use crate::error::ApiError;
use crate::models::{SyncRequest, SyncResponse};
use crate::sync::SyncService;
use rocket::serde::json::Json;
use rocket::{Request, State};
use rocket_okapi::openapi;

/// Synchronize a mailbox into its owner's ledger.
///
/// Creates the ledger from the most recent messages on first use, otherwise
/// prepends every message newer than the ledger's newest row. Responds with a
/// time-bounded link to the ledger workbook.
#[openapi(tag = "Sync")]
#[post("/sync", data = "<request>")]
pub async fn sync_mailbox(
    service: &State<SyncService>,
    request: Json<SyncRequest>,
) -> Result<SyncResponse, ApiError> {
    let request = request.into_inner();
    if !request.is_complete() {
        return Err(ApiError::malformed_body());
    }

    let outcome = service.sync(&request.into_credentials()).await?;
    Ok(SyncResponse::created(outcome.link))
}

#[catch(400)]
pub fn bad_request(request: &Request<'_>) -> ApiError {
    log::debug!("rejected body for {}", request.uri());
    ApiError::malformed_body()
}

#[catch(422)]
pub fn unprocessable_entity(request: &Request<'_>) -> ApiError {
    log::debug!("unparseable body for {}", request.uri());
    ApiError::UnprocessableEntity("Malformed request body".to_string())
}
