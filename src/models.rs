use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
            sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

define_id!(UserId);
define_id!(BookId);
define_id!(TransactionId);

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_staff: bool,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub copies_available: i32,
}

/// A loan record. Created only by checkout and closed exactly once by a return.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    #[sqlx(rename = "user_id")]
    pub user: UserId,
    #[sqlx(rename = "book_id")]
    pub book: BookId,
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub is_returned: bool,
}

impl Transaction {
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.is_returned
    }
}

/// Who is making the request. Threaded explicitly into every circulation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerIdentity {
    pub id: UserId,
    pub is_staff: bool,
}

impl CallerIdentity {
    #[must_use]
    pub fn may_act_for(&self, user: UserId) -> bool {
        self.is_staff || self.id == user
    }
}

impl From<&User> for CallerIdentity {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            is_staff: user.is_staff,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_staff: bool,
}

#[derive(Debug, Clone)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub copies_available: i32,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user: UserId,
    pub book: BookId,
    pub due_date: DateTime<Utc>,
}

/// Optional, AND-combined narrowing of a transaction listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TransactionFilter {
    pub user: Option<UserId>,
    pub book: Option<BookId>,
    pub is_returned: Option<bool>,
}

impl TransactionFilter {
    #[must_use]
    pub fn matches(&self, txn: &Transaction) -> bool {
        self.user.is_none_or(|u| txn.user == u)
            && self.book.is_none_or(|b| txn.book == b)
            && self.is_returned.is_none_or(|r| txn.is_returned == r)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub exp: usize,
    pub refresh: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 150))]
    pub username: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub is_staff: bool,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            is_staff: user.is_staff,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1))]
    pub username: String,
    #[validate(length(min = 8))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateBookRequest {
    #[validate(length(min = 1))]
    pub title: String,
    #[validate(length(min = 1))]
    pub author: String,
    #[validate(length(min = 10, max = 17))]
    pub isbn: String,
    #[validate(range(min = 0))]
    pub copies_available: i32,
}

impl From<CreateBookRequest> for NewBook {
    fn from(req: CreateBookRequest) -> Self {
        Self {
            title: req.title,
            author: req.author,
            isbn: req.isbn,
            copies_available: req.copies_available,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub book_id: BookId,
    pub user_id: UserId,
}
