use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
};
use chrono::Utc;
use validator::Validate;

use crate::{
    AppState,
    errors::{AppError, AppResult},
    extract::{AppJson, AppPath, AppQuery},
    models::{
        Book, BookId, CallerIdentity, CheckoutRequest, CreateBookRequest, LoginRequest, NewUser,
        RegisterRequest, TokenResponse, Transaction, TransactionFilter, TransactionId,
        UserResponse,
    },
    utils::{create_jwt_tokens, decode_jwt, hash_password, verify_password},
};

/// Health check endpoint.
#[must_use]
#[allow(clippy::unused_async)]
pub async fn health_check() -> &'static str { "OK" }

/// Register a new, non-staff user.
///
/// # Errors
/// Returns validation errors (including a taken username), hashing errors, or database errors.
pub async fn register(
    State(state): State<Arc<AppState>>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let password_hash = hash_password(&payload.password)?;

    let user = state
        .store
        .create_user(NewUser {
            username: payload.username,
            email: payload.email,
            password_hash,
            is_staff: false,
        })
        .await?;

    tracing::info!(user_id = %user.id, "user registered");
    Ok((StatusCode::CREATED, Json(user.into())))
}

/// Authenticate a user and return JWT tokens.
///
/// # Errors
/// Returns validation, invalid credentials, or database errors.
pub async fn login(
    State(state): State<Arc<AppState>>,
    AppJson(payload): AppJson<LoginRequest>,
) -> AppResult<(StatusCode, Json<TokenResponse>)> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let user = state
        .store
        .find_user_by_username(&payload.username)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    if !verify_password(&payload.password, &user.password_hash)? {
        return Err(AppError::InvalidCredentials);
    }

    let (access, refresh) = create_jwt_tokens(user.id, &state.config)?;
    Ok((
        StatusCode::OK,
        Json(TokenResponse {
            access_token: access,
            refresh_token: refresh,
        }),
    ))
}

/// Refresh JWT tokens using a refresh token.
///
/// # Errors
/// Returns unauthorized errors or token decoding errors.
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    AppJson(body): AppJson<TokenResponse>,
) -> AppResult<Json<TokenResponse>> {
    let claims = decode_jwt(&body.refresh_token, &state.config)?;
    if !claims.refresh { return Err(AppError::Unauthorized); }
    state
        .store
        .find_user(claims.sub)
        .await?
        .ok_or(AppError::Unauthorized)?;
    let (access, refresh) = create_jwt_tokens(claims.sub, &state.config)?;
    Ok(Json(TokenResponse { access_token: access, refresh_token: refresh }))
}

/// List all books.
///
/// # Errors
/// Returns database errors.
pub async fn list_books(State(state): State<Arc<AppState>>) -> AppResult<Json<Vec<Book>>> {
    Ok(Json(state.store.list_books().await?))
}

/// Add a book to the catalog. Staff only.
///
/// # Errors
/// Returns permission, validation or database errors.
pub async fn create_book(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    AppJson(payload): AppJson<CreateBookRequest>,
) -> AppResult<(StatusCode, Json<Book>)> {
    if !caller.is_staff {
        return Err(AppError::permission_denied("only staff may add books"));
    }
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let book = state.store.create_book(payload.into()).await?;
    tracing::info!(book_id = %book.id, copies = book.copies_available, "book added");
    Ok((StatusCode::CREATED, Json(book)))
}

/// Get a single book by id.
///
/// # Errors
/// Returns not found or database errors.
pub async fn get_book(
    State(state): State<Arc<AppState>>,
    AppPath(id): AppPath<BookId>,
) -> AppResult<Json<Book>> {
    let book = state
        .store
        .find_book(id)
        .await?
        .ok_or_else(|| AppError::not_found("book not found"))?;
    Ok(Json(book))
}

/// Check a book out to a user.
///
/// # Errors
/// Returns not found, permission, validation or database errors.
pub async fn checkout(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    AppJson(body): AppJson<CheckoutRequest>,
) -> AppResult<(StatusCode, Json<Transaction>)> {
    let loan = state
        .circulation
        .checkout(&caller, body.book_id, body.user_id, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(loan)))
}

/// Return the book held under a transaction.
///
/// # Errors
/// Returns not found, permission, validation or database errors.
pub async fn return_book(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    AppPath(id): AppPath<TransactionId>,
) -> AppResult<Json<Transaction>> {
    let loan = state
        .circulation
        .return_book(&caller, id, Utc::now())
        .await?;
    Ok(Json(loan))
}

/// List the transactions visible to the caller.
///
/// # Errors
/// Returns database errors.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    AppQuery(filter): AppQuery<TransactionFilter>,
) -> AppResult<Json<Vec<Transaction>>> {
    let loans = state.circulation.list_transactions(&caller, filter).await?;
    Ok(Json(loans))
}

/// Get a single transaction visible to the caller.
///
/// # Errors
/// Returns not found or database errors.
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    AppPath(id): AppPath<TransactionId>,
) -> AppResult<Json<Transaction>> {
    Ok(Json(state.circulation.get_transaction(&caller, id).await?))
}

/// Generic create. Always refused; checkout is the only way to open a loan.
///
/// # Errors
/// Always returns permission denied.
#[allow(clippy::unused_async)]
pub async fn create_transaction(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
) -> AppResult<Json<Transaction>> {
    state.circulation.create_transaction(&caller).map(Json)
}
