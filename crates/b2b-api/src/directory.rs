use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use tracing::info;

use b2b_types::api::{SearchQuery, SearchResponse, UpsertBusinessRequest, UpsertUserRequest};
use b2b_types::models::{Business, Caller, Participant, User};

use crate::error::MessagingError;
use crate::state::AppState;

/// Largest page the directory search will return.
const MAX_SEARCH_LIMIT: u32 = 25;

/// GET /participants/{id}. Unknown ids resolve to the `unknown` variant
/// rather than 404, so clients can render a placeholder.
pub async fn get_participant(
    State(state): State<AppState>,
    Extension(_caller): Extension<Caller>,
    Path(participant_id): Path<String>,
) -> Result<impl IntoResponse, MessagingError> {
    let participant = state.messenger.resolver().resolve(&participant_id).await?;
    Ok(Json(participant))
}

/// GET /directory/search?q=&limit=
pub async fn search(
    State(state): State<AppState>,
    Extension(_caller): Extension<Caller>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, MessagingError> {
    let limit = query.limit.min(MAX_SEARCH_LIMIT);
    let (businesses, users) = state.messenger.resolver().search(&query.q, limit).await?;
    Ok(Json(SearchResponse { businesses, users }))
}

/// PUT /directory/businesses/{id}. A caller may only write its own profile.
pub async fn put_business(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(business_id): Path<String>,
    Json(req): Json<UpsertBusinessRequest>,
) -> Result<impl IntoResponse, MessagingError> {
    require_self(&caller, &business_id)?;
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(MessagingError::validation("business name must not be empty"));
    }

    let business = Business {
        id: business_id,
        name,
        org_number: req.org_number.trim().to_string(),
        logo_url: req.logo_url.filter(|u| !u.trim().is_empty()),
    };
    if !state.messenger.resolver().register_business(business.clone()).await? {
        return Err(MessagingError::Conflict(format!(
            "{} is already registered as a user",
            business.id
        )));
    }

    info!(business_id = %business.id, "Business profile saved");
    Ok(Json(Participant::Business(business)))
}

/// PUT /directory/users/{id}. A caller may only write its own profile.
pub async fn put_user(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(user_id): Path<String>,
    Json(req): Json<UpsertUserRequest>,
) -> Result<impl IntoResponse, MessagingError> {
    require_self(&caller, &user_id)?;
    let first_name = req.first_name.trim().to_string();
    if first_name.is_empty() {
        return Err(MessagingError::validation("first name must not be empty"));
    }

    let user = User {
        id: user_id,
        first_name,
        last_name: req.last_name.trim().to_string(),
        email: req.email.trim().to_string(),
        photo_url: req.photo_url.filter(|u| !u.trim().is_empty()),
    };
    if !state.messenger.resolver().register_user(user.clone()).await? {
        return Err(MessagingError::Conflict(format!(
            "{} is already registered as a business",
            user.id
        )));
    }

    info!(user_id = %user.id, "User profile saved");
    Ok(Json(Participant::User(user)))
}

fn require_self(caller: &Caller, id: &str) -> Result<(), MessagingError> {
    if caller.participant_id != id {
        return Err(MessagingError::Forbidden("profiles can only be written by their owner"));
    }
    Ok(())
}
