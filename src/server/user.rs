//! `/user/*` handlers.
use axum::{
    extract::{
        rejection::{FormRejection, QueryRejection},
        Query, State,
    },
    http::header,
    response::IntoResponse,
    Form, Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::{
    constants::HISTORY_UPDATED_BODY,
    localize_errors::LocalizeError,
    localizer::{Localizer, ManualHistoryForm},
};

#[derive(Debug, Default, Deserialize)]
pub struct NameQuery {
    pub name: Option<String>,
}

/// `GET /user/list`: users that have at least one history entry.
pub async fn list(State(localizer): State<Localizer>) -> impl IntoResponse {
    Json(json!({ "users": localizer.users() }))
}

/// `GET /user/history?name=<user>`
pub async fn history(
    State(localizer): State<Localizer>,
    query: Result<Query<NameQuery>, QueryRejection>,
) -> Result<impl IntoResponse, LocalizeError> {
    let query = query
        .map(|Query(query)| query)
        .inspect_err(|rejection| warn!("unreadable query string : {rejection}"))
        .unwrap_or_default();
    let history = localizer.history(query.name.as_deref())?;
    Ok(Json(json!({ "history": history })))
}

/// `POST /user/history` with a form body `name`, `t` (JSON array of 3), `R` (JSON array of 9).
pub async fn add_history(
    State(localizer): State<Localizer>,
    form: Result<Form<ManualHistoryForm>, FormRejection>,
) -> Result<impl IntoResponse, LocalizeError> {
    let form = form.map(|Form(form)| form).unwrap_or_default();
    localizer.add_manual_history(&form)?;
    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        HISTORY_UPDATED_BODY,
    ))
}
