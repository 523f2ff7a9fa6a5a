//! Actor identity middleware
//!
//! Callers identify themselves with the `X-Actor-Id` header. The id is
//! recorded on every record and audit entry a request produces; it is not
//! authenticated here.

use crate::error::AppError;
use axum::{
    extract::Request,
    http::{HeaderName, Method},
    middleware::Next,
    response::Response,
};

pub static ACTOR_HEADER: HeaderName = HeaderName::from_static("x-actor-id");

/// Identity of the operator, approver or vendor making a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub String);

impl Actor {
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Extract the actor into request extensions.
///
/// Mutating requests without an actor are rejected; reads pass through.
pub async fn actor_middleware(mut request: Request, next: Next) -> Result<Response, AppError> {
    let actor = request
        .headers()
        .get(&ACTOR_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| Actor(id.to_string()));

    match actor {
        Some(actor) => {
            request.extensions_mut().insert(actor);
        }
        None if is_mutating(request.method()) => {
            return Err(AppError::BadRequest(format!(
                "Missing {} header",
                ACTOR_HEADER.as_str()
            )));
        }
        None => {}
    }

    Ok(next.run(request).await)
}

fn is_mutating(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutating_methods() {
        assert!(is_mutating(&Method::POST));
        assert!(is_mutating(&Method::PUT));
        assert!(is_mutating(&Method::PATCH));
        assert!(is_mutating(&Method::DELETE));
        assert!(!is_mutating(&Method::GET));
        assert!(!is_mutating(&Method::OPTIONS));
    }
}
