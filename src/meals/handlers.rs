use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use bytes::Bytes;
use tracing::instrument;
use uuid::Uuid;

use crate::error::AppError;
use crate::messages;
use crate::state::AppState;
use crate::users::ExternalUser;

use super::dto::{
    ConfirmResponse, DeleteResponse, DiscardResponse, EditSubmission, MealView, Pagination,
    SubmissionResponse, TextSubmission,
};
use super::service::{self, ConfirmOutcome, SubmissionInput, SubmissionOutcome};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/meals", get(list_meals))
        .route("/meals/text", post(submit_text))
        .route(
            "/meals/photo",
            post(submit_photo).layer(DefaultBodyLimit::max(8 * 1024 * 1024)),
        )
        .route("/meals/confirm", post(confirm))
        .route("/meals/discard", post(discard))
        .route("/meals/:id/edit", post(edit_meal))
        .route("/meals/:id", delete(delete_meal))
}

#[instrument(skip(state))]
async fn submit_text(
    State(state): State<AppState>,
    ExternalUser(external_id): ExternalUser,
    Json(body): Json<TextSubmission>,
) -> Result<Json<SubmissionResponse>, AppError> {
    let outcome = service::submit(
        &state,
        external_id,
        body.chat_id,
        body.message_id,
        SubmissionInput::Text { text: body.text },
        heartbeat(messages::PROCESSING_NEW),
    )
    .await?;
    Ok(Json(submission_response(outcome)))
}

/// Multipart fields: `chat_id`, `message_id`, `file_id`, optional
/// `caption`, and the `photo` bytes.
#[instrument(skip(state, mp))]
async fn submit_photo(
    State(state): State<AppState>,
    ExternalUser(external_id): ExternalUser,
    mp: Multipart,
) -> Result<Json<SubmissionResponse>, AppError> {
    let fields = collect_photo_fields(mp).await?;

    let outcome = service::submit(
        &state,
        external_id,
        fields.chat_id,
        fields.message_id,
        SubmissionInput::Photo {
            payload: fields.payload,
            file_id: fields.file_id,
            caption: fields.caption,
        },
        heartbeat(messages::PROCESSING_NEW),
    )
    .await?;
    Ok(Json(submission_response(outcome)))
}

#[derive(Debug)]
struct PhotoFields {
    chat_id: i64,
    message_id: i64,
    file_id: String,
    caption: Option<String>,
    payload: Bytes,
}

/// A mid-stream multipart error (truncated upload, aborted body) is
/// reported as such, never as a misleading missing-field message.
async fn collect_photo_fields(mut mp: Multipart) -> Result<PhotoFields, AppError> {
    let mut chat_id: Option<i64> = None;
    let mut message_id: Option<i64> = None;
    let mut file_id: Option<String> = None;
    let mut caption: Option<String> = None;
    let mut payload: Option<Bytes> = None;

    loop {
        let field = mp
            .next_field()
            .await
            .map_err(|e| AppError::Validation(format!("malformed multipart body: {e}")))?;
        let Some(field) = field else { break };
        match field.name() {
            Some("chat_id") => chat_id = parse_field(field, "chat_id").await?,
            Some("message_id") => message_id = parse_field(field, "message_id").await?,
            Some("file_id") => {
                file_id = Some(field.text().await.map_err(bad_field("file_id"))?)
            }
            Some("caption") => {
                caption = Some(field.text().await.map_err(bad_field("caption"))?)
            }
            Some("photo") => {
                payload = Some(field.bytes().await.map_err(bad_field("photo"))?)
            }
            _ => {}
        }
    }

    Ok(PhotoFields {
        chat_id: chat_id.ok_or_else(missing("chat_id"))?,
        message_id: message_id.ok_or_else(missing("message_id"))?,
        file_id: file_id.ok_or_else(missing("file_id"))?,
        caption,
        payload: payload.ok_or_else(missing("photo"))?,
    })
}

#[instrument(skip(state))]
async fn confirm(
    State(state): State<AppState>,
    ExternalUser(external_id): ExternalUser,
) -> Result<Json<ConfirmResponse>, AppError> {
    let response = match service::confirm_draft(&state, external_id).await? {
        ConfirmOutcome::Saved { entry, today } => ConfirmResponse {
            status: "saved",
            message: None,
            entry: Some(MealView::from(entry)),
            today: Some(today),
        },
        ConfirmOutcome::AlreadySaved => ConfirmResponse {
            status: "already_saved",
            message: Some(messages::ALREADY_SAVED.to_string()),
            entry: None,
            today: None,
        },
        ConfirmOutcome::NoDraft => ConfirmResponse {
            status: "no_draft",
            message: Some(messages::DRAFT_EXPIRED.to_string()),
            entry: None,
            today: None,
        },
    };
    Ok(Json(response))
}

#[instrument(skip(state))]
async fn discard(
    State(state): State<AppState>,
    ExternalUser(external_id): ExternalUser,
) -> Json<DiscardResponse> {
    let discarded = service::discard_draft(&state, external_id).await;
    Json(DiscardResponse { discarded })
}

#[instrument(skip(state))]
async fn edit_meal(
    State(state): State<AppState>,
    ExternalUser(external_id): ExternalUser,
    Path(id): Path<Uuid>,
    Json(body): Json<EditSubmission>,
) -> Result<Json<SubmissionResponse>, AppError> {
    let outcome = service::submit_edit(
        &state,
        external_id,
        id,
        body.text,
        heartbeat(messages::PROCESSING_EDIT),
    )
    .await?;
    Ok(Json(submission_response(outcome)))
}

#[instrument(skip(state))]
async fn delete_meal(
    State(state): State<AppState>,
    ExternalUser(external_id): ExternalUser,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, AppError> {
    let today = service::delete_entry(&state, external_id, id).await?;
    Ok(Json(DeleteResponse {
        message: messages::DELETED_LABEL,
        today,
    }))
}

#[instrument(skip(state))]
async fn list_meals(
    State(state): State<AppState>,
    ExternalUser(external_id): ExternalUser,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<MealView>>, AppError> {
    let entries = service::history(&state, external_id, p.limit).await?;
    Ok(Json(entries.into_iter().map(MealView::from).collect()))
}

// --- helpers ---

fn submission_response(outcome: SubmissionOutcome) -> SubmissionResponse {
    match outcome {
        SubmissionOutcome::Drafted {
            analysis,
            expires_in,
        } => SubmissionResponse {
            status: "drafted",
            message: None,
            analysis: Some(analysis),
            expires_in_seconds: Some(expires_in.as_secs()),
        },
        SubmissionOutcome::Rejected { message } => SubmissionResponse {
            status: "rejected",
            message: Some(message),
            analysis: None,
            expires_in_seconds: None,
        },
        SubmissionOutcome::AlreadySaved => SubmissionResponse {
            status: "already_saved",
            message: Some(messages::ALREADY_SAVED.to_string()),
            analysis: None,
            expires_in_seconds: None,
        },
    }
}

/// Progress signal while an analysis is in flight. A chat front-end
/// would relay this as a typing indicator; here it lands in the logs.
fn heartbeat(label: &'static str) -> impl Fn() + Send + 'static {
    move || tracing::debug!(label, "analysis in flight")
}

async fn parse_field(
    field: axum::extract::multipart::Field<'_>,
    name: &'static str,
) -> Result<Option<i64>, AppError> {
    let raw = field.text().await.map_err(bad_field(name))?;
    let value = raw
        .parse::<i64>()
        .map_err(|_| AppError::Validation(format!("{name} must be an integer")))?;
    Ok(Some(value))
}

fn bad_field(
    name: &'static str,
) -> impl FnOnce(axum::extract::multipart::MultipartError) -> AppError {
    move |_| AppError::Validation(format!("invalid multipart field: {name}"))
}

fn missing(name: &'static str) -> impl FnOnce() -> AppError {
    move || AppError::Validation(format!("{name} is required"))
}
