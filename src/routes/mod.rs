//! HTTP route handlers.
//!
//! Handlers are annotated with `#[openapi]` so `rocket_okapi` can derive the
//! OpenAPI document served next to them. JSON error catchers live in [`sync`].

pub mod health;
pub mod sync;

use rocket::Catcher;

/// Catchers that keep error responses in the API's JSON shape.
pub fn catchers() -> Vec<Catcher> {
    catchers![sync::bad_request, sync::unprocessable_entity]
}
