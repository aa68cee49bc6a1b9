use axum::async_trait;
use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;

use crate::error::{HttpErrorResponse, VocabTutorError};

/// `Json` that rejects with the service's `{"error": ...}` body instead of plain text.
pub struct JsonPayload<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonPayload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = VocabTutorError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonPayload(value)),
            Err(rejection) => Err(VocabTutorError {
                status: rejection.status(),
                message: HttpErrorResponse::from(rejection.body_text()),
            }),
        }
    }
}
