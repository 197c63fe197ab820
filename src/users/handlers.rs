use axum::{
    extract::{DefaultBodyLimit, FromRef, Multipart, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use super::{
    dto::{
        ChangeEmailRequest, ChangePasswordRequest, Detail, LoginRequest, LoginResponse, ProfileImage,
        PublicUser, RefreshRequest, RegisterRequest,
    },
    repo_types::NewUser,
    validators::{
        validate_email_change, validate_login, validate_password_change, validate_profile_image,
        validate_registration, ImageUpload, EMAIL_IN_USE,
    },
};
use crate::{
    auth::{
        extractors::{CurrentUser, JsonBody},
        jwt::{JwtKeys, TokenPair},
        password::hash_password,
    },
    error::{AppError, AppResult, ValidationErrors},
    images::services::{presign_profile_image, replace_profile_image},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
}

pub fn me_routes() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(get_me))
        .route("/users/me/password", post(change_password))
        .route("/users/me/email", post(change_email))
        .route(
            "/users/me/image",
            get(get_profile_image)
                .put(upload_profile_image)
                .layer(DefaultBodyLimit::max(20 * 1024 * 1024)),
        )
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> AppResult<(StatusCode, Json<PublicUser>)> {
    let valid = validate_registration(state.users.as_ref(), &state.config.accounts, &payload).await?;

    let password_hash = hash_password(&valid.password)?;
    let user = state
        .users
        .create_user(NewUser {
            username: valid.username,
            email: valid.email,
            password_hash,
            first_name: valid.first_name,
            last_name: valid.last_name,
        })
        .await?;

    info!(user_id = user.id, username = %user.username, "user registered");
    Ok((StatusCode::CREATED, Json(PublicUser::from(&user))))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let user = validate_login(state.users.as_ref(), &payload).await?;

    let tokens = JwtKeys::from_ref(&state).issue_pair(user.id)?;

    if state.config.accounts.update_last_login {
        state
            .users
            .record_last_login(user.id, OffsetDateTime::now_utc())
            .await?;
    }

    info!(user_id = user.id, "user logged in");
    Ok(Json(LoginResponse {
        tokens,
        user: PublicUser::from(&user),
    }))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RefreshRequest>,
) -> AppResult<Json<TokenPair>> {
    let Some(token) = payload.refresh.as_deref() else {
        return Err(ValidationErrors::single("refresh", "This field is required.").into());
    };

    let keys = JwtKeys::from_ref(&state);
    let claims = keys.verify_refresh(token).map_err(|e| {
        warn!(error = %e, "refresh rejected");
        AppError::Unauthorized("Token is invalid or expired".into())
    })?;

    let user = state
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User not found".into()))?;

    Ok(Json(keys.issue_pair(user.id)?))
}

#[instrument(skip(user))]
pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<PublicUser> {
    Json(PublicUser::from(&user))
}

#[instrument(skip(state, caller, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    JsonBody(payload): JsonBody<ChangePasswordRequest>,
) -> AppResult<Json<Detail>> {
    let new_password = validate_password_change(&caller, &state.config.accounts, &payload)?;

    let hash = hash_password(&new_password)?;
    state.users.set_password(caller.id, &hash).await?;

    info!(user_id = caller.id, "password changed");
    Ok(Json(Detail {
        detail: "Password updated successfully.".into(),
    }))
}

#[instrument(skip(state, caller, payload))]
pub async fn change_email(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    JsonBody(payload): JsonBody<ChangeEmailRequest>,
) -> AppResult<Json<PublicUser>> {
    let new_email = validate_email_change(state.users.as_ref(), &caller, &payload).await?;

    // Another request may have claimed the address since validation.
    let user = state
        .users
        .set_email(caller.id, &new_email)
        .await
        .map_err(|e| e.conflict_as("email_exists", EMAIL_IN_USE))?;

    info!(user_id = user.id, "email changed");
    Ok(Json(PublicUser::from(&user)))
}

#[instrument(skip(state, user))]
pub async fn get_profile_image(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<ProfileImage>> {
    let image = presign_profile_image(&state, &user).await?;
    Ok(Json(ProfileImage { image }))
}

/// PUT /users/me/image (multipart, single `image` field)
#[instrument(skip(state, user, mp))]
pub async fn upload_profile_image(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    mut mp: Multipart,
) -> AppResult<Json<ProfileImage>> {
    let mut upload = None;
    loop {
        let field = match mp.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "malformed multipart body");
                return Err(ValidationErrors::single("image", "The submitted data was not a file.").into());
            }
        };
        if field.name() != Some("image") {
            continue;
        }
        let content_type = field
            .content_type()
            .map(str::to_string)
            .unwrap_or_else(|| "application/octet-stream".into());
        let body = field.bytes().await.map_err(|e| {
            warn!(error = %e, "failed to read image field");
            AppError::from(ValidationErrors::single("image", "The submitted data was not a file."))
        })?;
        upload = Some(ImageUpload { content_type, body });
        break;
    }

    let (upload, ext) = validate_profile_image(upload, state.config.accounts.max_image_bytes)?;

    let updated = replace_profile_image(&state, &user, upload, ext).await?;
    let image = presign_profile_image(&state, &updated).await?;
    Ok(Json(ProfileImage { image }))
}
