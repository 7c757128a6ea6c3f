use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Extension, Path, Query, State};
use axum::{
    http::{HeaderMap, StatusCode},
    middleware,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ludium_domain::{
    applications::{Application, ApplicationCreate, ReviewDecision},
    events::{CHANNEL_NOTIFICATIONS, CHANNEL_NOTIFICATION_COUNT},
    identity::ActorIdentity,
    milestones::{Milestone, MilestoneCreate},
    notifications::{
        NotificationFilter, NotificationList, NotificationPage, NotificationTab, SortOrder,
    },
    programs::{Program, ProgramCreate, ProgramRoleType, ProgramVisibility, RoleInvite},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_stream::wrappers::UnboundedReceiverStream;
use validator::Validate;

use crate::middleware::AuthContext;
use crate::observability;
use crate::{error::ApiError, middleware as app_middleware, state::AppState, validation};

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/programs", post(create_program))
        .route("/v1/programs/:program_id/roles", post(invite_role))
        .route(
            "/v1/programs/:program_id/applications",
            post(apply_to_program),
        )
        .route(
            "/v1/applications/:application_id/accept",
            post(accept_application),
        )
        .route(
            "/v1/applications/:application_id/reject",
            post(reject_application),
        )
        .route(
            "/v1/applications/:application_id/milestones",
            post(create_milestone),
        )
        .route("/v1/milestones/:milestone_id/submit", post(submit_milestone))
        .route("/v1/milestones/:milestone_id/accept", post(accept_milestone))
        .route("/v1/milestones/:milestone_id/reject", post(reject_milestone))
        .route(
            "/v1/milestones/:milestone_id/reclaim",
            post(reclaim_milestone),
        )
        .route("/v1/notifications", get(list_notifications))
        .route("/v1/notifications/count", get(notification_count))
        .route(
            "/v1/notifications/:notification_id/read",
            post(mark_notification_read),
        )
        .route(
            "/v1/notifications/read-all",
            post(mark_all_notifications_read),
        )
        .route("/v1/notifications/stream", get(stream_notifications))
        .route(
            "/v1/notifications/count/stream",
            get(stream_notification_count),
        )
        .route_layer(middleware::from_fn(app_middleware::require_auth_middleware));

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/programs/:program_id", get(get_program))
        .merge(protected)
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(app_middleware::metrics_layer));

    if !state.config.is_test() {
        app = app.layer(app_middleware::rate_limit_layer());
    }

    app.with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
    database: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match &state.db_adapter {
        Some(adapter) => match adapter.health_check().await {
            Ok(()) => format!("{}:ok", adapter.name()),
            Err(err) => {
                tracing::warn!(error = %err, "database health check failed");
                format!("{}:unavailable", adapter.name())
            }
        },
        None => "memory".to_string(),
    };
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
        database,
    })
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => body.into_response(),
        None => ApiError::Internal.into_response(),
    }
}

#[derive(Debug, Deserialize, Validate)]
struct CreateProgramRequest {
    #[validate(length(min = 1, max = 200))]
    name: String,
    description: Option<String>,
    visibility: ProgramVisibility,
    validator_id: Option<String>,
}

async fn create_program(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CreateProgramRequest>,
) -> Result<Response, ApiError> {
    validation::validate(&payload)?;
    let actor = auth.actor()?;
    let program = state
        .program_service()
        .create(
            actor,
            ProgramCreate {
                name: payload.name,
                description: payload.description,
                visibility: payload.visibility,
                validator_id: payload.validator_id,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(program)).into_response())
}

async fn get_program(
    State(state): State<AppState>,
    Path(program_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Program>, ApiError> {
    let viewer = if auth.is_authenticated {
        auth.user_id.as_deref()
    } else {
        None
    };
    let program = state.program_service().view(viewer, &program_id).await?;
    Ok(Json(program))
}

#[derive(Debug, Deserialize, Validate)]
struct RoleInviteRequest {
    #[validate(length(min = 1, max = 128))]
    user_id: String,
    role: ProgramRoleType,
    tier: Option<String>,
}

async fn invite_role(
    State(state): State<AppState>,
    Path(program_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<RoleInviteRequest>,
) -> Result<Response, ApiError> {
    validation::validate(&payload)?;
    let actor = auth.actor()?;
    let assignment = state
        .program_service()
        .invite(
            actor,
            &program_id,
            RoleInvite {
                user_id: payload.user_id,
                role: payload.role,
                tier: payload.tier,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)).into_response())
}

#[derive(Debug, Deserialize, Validate)]
struct ApplyRequest {
    #[validate(length(max = 2000))]
    summary: Option<String>,
}

async fn apply_to_program(
    State(state): State<AppState>,
    Path(program_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<ApplyRequest>,
) -> Result<Response, ApiError> {
    validation::validate(&payload)?;
    let actor = auth.actor()?;
    let application = state
        .application_service()
        .apply(
            actor,
            &program_id,
            ApplicationCreate {
                summary: payload.summary,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(application)).into_response())
}

async fn accept_application(
    State(state): State<AppState>,
    Path(application_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Application>, ApiError> {
    decide_application(state, application_id, auth, ReviewDecision::Accept).await
}

async fn reject_application(
    State(state): State<AppState>,
    Path(application_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Application>, ApiError> {
    decide_application(state, application_id, auth, ReviewDecision::Reject).await
}

async fn decide_application(
    state: AppState,
    application_id: String,
    auth: AuthContext,
    decision: ReviewDecision,
) -> Result<Json<Application>, ApiError> {
    let actor = auth.actor()?;
    let application = state
        .application_service()
        .decide(actor, &application_id, decision)
        .await?;
    Ok(Json(application))
}

#[derive(Debug, Deserialize, Validate)]
struct CreateMilestoneRequest {
    #[validate(length(min = 1, max = 200))]
    title: String,
    amount: Option<String>,
    deadline_ms: Option<i64>,
}

async fn create_milestone(
    State(state): State<AppState>,
    Path(application_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Json(payload): Json<CreateMilestoneRequest>,
) -> Result<Response, ApiError> {
    validation::validate(&payload)?;
    let actor = auth.actor()?;
    let milestone = state
        .milestone_service()
        .create(
            actor,
            &application_id,
            MilestoneCreate {
                title: payload.title,
                amount: payload.amount,
                deadline_ms: payload.deadline_ms,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(milestone)).into_response())
}

async fn submit_milestone(
    State(state): State<AppState>,
    Path(milestone_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Milestone>, ApiError> {
    let actor = auth.actor()?;
    let milestone = state
        .milestone_service()
        .submit(actor, &milestone_id)
        .await?;
    Ok(Json(milestone))
}

async fn accept_milestone(
    State(state): State<AppState>,
    Path(milestone_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Milestone>, ApiError> {
    review_milestone(state, milestone_id, auth, ReviewDecision::Accept).await
}

async fn reject_milestone(
    State(state): State<AppState>,
    Path(milestone_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Milestone>, ApiError> {
    review_milestone(state, milestone_id, auth, ReviewDecision::Reject).await
}

async fn review_milestone(
    state: AppState,
    milestone_id: String,
    auth: AuthContext,
    decision: ReviewDecision,
) -> Result<Json<Milestone>, ApiError> {
    let actor = auth.actor()?;
    let milestone = state
        .milestone_service()
        .review(actor, &milestone_id, decision)
        .await?;
    Ok(Json(milestone))
}

async fn reclaim_milestone(
    State(state): State<AppState>,
    Path(milestone_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Milestone>, ApiError> {
    let actor = auth.actor()?;
    let milestone = state
        .milestone_service()
        .reclaim_expired(actor, &milestone_id)
        .await?;
    Ok(Json(milestone))
}

#[derive(Debug, Deserialize)]
struct NotificationListParams {
    limit: Option<usize>,
    offset: Option<usize>,
    sort: Option<String>,
    tab: Option<String>,
    unread: Option<bool>,
}

/// Query parameters map onto the closed filter set; anything outside it is
/// rejected rather than silently ignored.
fn notification_page(params: &NotificationListParams) -> Result<NotificationPage, ApiError> {
    let mut page = NotificationPage::default();
    if let Some(limit) = params.limit {
        page.limit = limit;
    }
    if let Some(offset) = params.offset {
        page.offset = offset;
    }
    if let Some(sort) = params.sort.as_deref() {
        page.sort = match sort {
            "asc" => SortOrder::Asc,
            "desc" => SortOrder::Desc,
            other => {
                return Err(ApiError::Validation(format!("unknown sort '{other}'")));
            }
        };
    }
    if let Some(tab) = params.tab.as_deref() {
        let tab = NotificationTab::parse(tab)
            .ok_or_else(|| ApiError::Validation(format!("unknown tab '{tab}'")))?;
        page.filters.push(NotificationFilter::Tab(tab));
    }
    if let Some(unread) = params.unread {
        page.filters.push(NotificationFilter::Unread(unread));
    }
    Ok(page)
}

async fn list_notifications(
    State(state): State<AppState>,
    Query(params): Query<NotificationListParams>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<NotificationList>, ApiError> {
    let actor = auth.actor()?;
    let page = notification_page(&params)?;
    let list = state
        .notification_service()
        .list(&actor.user_id, page)
        .await?;
    Ok(Json(list))
}

#[derive(Serialize)]
struct UnreadCountResponse {
    unread: u64,
}

async fn notification_count(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let actor = auth.actor()?;
    let unread = state
        .notification_service()
        .unread_count(&actor.user_id)
        .await?;
    Ok(Json(UnreadCountResponse { unread }))
}

async fn mark_notification_read(
    State(state): State<AppState>,
    Path(notification_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Response, ApiError> {
    let actor = auth.actor()?;
    let notification = state
        .notification_service()
        .mark_read(&actor.user_id, &notification_id)
        .await?;
    Ok(Json(notification).into_response())
}

#[derive(Serialize)]
struct ReadAllResponse {
    updated: u64,
}

async fn mark_all_notifications_read(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<ReadAllResponse>, ApiError> {
    let actor = auth.actor()?;
    let updated = state
        .notification_service()
        .mark_all_read(&actor.user_id)
        .await?;
    Ok(Json(ReadAllResponse { updated }))
}

/// The stream may outlive the request that carried the middleware-time auth
/// check, so stream handlers verify the bearer token themselves.
fn stream_actor(state: &AppState, headers: &HeaderMap) -> Result<ActorIdentity, ApiError> {
    let token = app_middleware::bearer_token(headers).ok_or(ApiError::Unauthorized)?;
    app_middleware::verify_token(state, token).ok_or(ApiError::Unauthorized)
}

fn notification_list_event(list: &NotificationList) -> Option<Event> {
    let data = serde_json::to_string(list).ok()?;
    Some(Event::default().event("notifications").data(data))
}

async fn stream_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let actor = stream_actor(&state, &headers)?;
    let service = state.notification_service();
    let mut receiver = state
        .hub
        .subscribe(CHANNEL_NOTIFICATIONS, &actor.user_id)
        .await;
    let (tx, rx) = mpsc::unbounded_channel::<Result<Event, Infallible>>();

    let initial = service
        .list(&actor.user_id, NotificationPage::default())
        .await?;
    if let Some(event) = notification_list_event(&initial) {
        let _ = tx.send(Ok(event));
    }

    let recipient_id = actor.user_id;
    tokio::spawn(async move {
        let mut heartbeat = interval(Duration::from_secs(15));
        loop {
            tokio::select! {
                event = receiver.recv() => {
                    match event {
                        Ok(_) => {
                            observability::register_stream_event(CHANNEL_NOTIFICATIONS, "refresh");
                        }
                        // Lagging loses events, never data: re-query either way.
                        Err(RecvError::Lagged(_)) => {
                            observability::register_stream_event(CHANNEL_NOTIFICATIONS, "lagged");
                        }
                        Err(RecvError::Closed) => break,
                    }
                    match service.list(&recipient_id, NotificationPage::default()).await {
                        Ok(list) => {
                            let Some(event) = notification_list_event(&list) else {
                                continue;
                            };
                            if tx.send(Ok(event)).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "notification refresh failed");
                            let _ = tx.send(Ok(
                                Event::default().event("error").data("refresh_failed"),
                            ));
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    if tx.send(Ok(Event::default().event("ping").data("keep-alive"))).is_err() {
                        break;
                    }
                }
            }
        }
    });

    Ok(Sse::new(UnboundedReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response())
}

async fn stream_notification_count(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let actor = stream_actor(&state, &headers)?;
    let service = state.notification_service();
    let mut receiver = state
        .hub
        .subscribe(CHANNEL_NOTIFICATION_COUNT, &actor.user_id)
        .await;
    let (tx, rx) = mpsc::unbounded_channel::<Result<Event, Infallible>>();

    let unread = service.unread_count(&actor.user_id).await?;
    let _ = tx.send(Ok(unread_count_event(unread)));

    let recipient_id = actor.user_id;
    tokio::spawn(async move {
        let mut heartbeat = interval(Duration::from_secs(15));
        loop {
            tokio::select! {
                event = receiver.recv() => {
                    match event {
                        Ok(_) => {
                            observability::register_stream_event(
                                CHANNEL_NOTIFICATION_COUNT,
                                "refresh",
                            );
                        }
                        Err(RecvError::Lagged(_)) => {
                            observability::register_stream_event(
                                CHANNEL_NOTIFICATION_COUNT,
                                "lagged",
                            );
                        }
                        Err(RecvError::Closed) => break,
                    }
                    match service.unread_count(&recipient_id).await {
                        Ok(unread) => {
                            if tx.send(Ok(unread_count_event(unread))).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "unread count refresh failed");
                            let _ = tx.send(Ok(
                                Event::default().event("error").data("refresh_failed"),
                            ));
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    if tx.send(Ok(Event::default().event("ping").data("keep-alive"))).is_err() {
                        break;
                    }
                }
            }
        }
    });

    Ok(Sse::new(UnboundedReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response())
}

fn unread_count_event(unread: u64) -> Event {
    Event::default()
        .event("notifications_count")
        .data(json!({ "unread": unread }).to_string())
}
