use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::{Header, StatusClass};
use rocket::{Data, Request, Response};
use std::time::Instant;
use uuid::Uuid;

/// Per-request bookkeeping stored in the request-local cache.
struct RequestTiming {
    id: Uuid,
    started: Instant,
}

impl RequestTiming {
    fn start() -> Self {
        Self {
            id: Uuid::new_v4(),
            started: Instant::now(),
        }
    }
}

/// Logs one line per HTTP request and tags the response with an `X-Request-Id`.
///
/// Server errors log at warn so failed syncs stand out from routine traffic.
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(RequestTiming::start);
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let timing = request.local_cache(RequestTiming::start);
        let elapsed_ms = timing.started.elapsed().as_secs_f64() * 1000.0;
        let status = response.status();

        response.set_header(Header::new("X-Request-Id", timing.id.to_string()));

        let level = match status.class() {
            StatusClass::ServerError => log::Level::Warn,
            _ => log::Level::Info,
        };
        log::log!(
            level,
            "{} {} -> {} ({:.2}ms) [{}]",
            request.method(),
            request.uri(),
            status.code,
            elapsed_ms,
            timing.id
        );
    }
}
