//! Persistence collaborators for users, books and loan transactions.
//!
//! Every read-check-write sequence in circulation goes through a [`StoreTx`]:
//! rows read with `lock_*` stay exclusively held until the unit of work is
//! committed or dropped, and dropping without [`StoreTx::commit`] discards all
//! staged writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    errors::AppResult,
    models::{
        Book, BookId, NewBook, NewTransaction, NewUser, Transaction, TransactionFilter,
        TransactionId, User, UserId,
    },
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// Open a unit of work.
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>>;

    async fn find_user(&self, id: UserId) -> AppResult<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> AppResult<Option<User>>;
    /// Fails with a validation error when the username is taken.
    async fn create_user(&self, user: NewUser) -> AppResult<User>;

    async fn list_books(&self) -> AppResult<Vec<Book>>;
    async fn find_book(&self, id: BookId) -> AppResult<Option<Book>>;
    async fn create_book(&self, book: NewBook) -> AppResult<Book>;

    /// Ordered by id ascending.
    async fn list_transactions(&self, filter: &TransactionFilter) -> AppResult<Vec<Transaction>>;
    async fn find_transaction(&self, id: TransactionId) -> AppResult<Option<Transaction>>;
}

#[async_trait]
pub trait StoreTx: Send {
    async fn lock_book(&mut self, id: BookId) -> AppResult<Option<Book>>;
    async fn lock_transaction(&mut self, id: TransactionId) -> AppResult<Option<Transaction>>;
    async fn find_user(&mut self, id: UserId) -> AppResult<Option<User>>;
    async fn has_active_loan(&mut self, user: UserId, book: BookId) -> AppResult<bool>;
    async fn insert_transaction(&mut self, txn: NewTransaction) -> AppResult<Transaction>;
    async fn mark_returned(
        &mut self,
        id: TransactionId,
        returned_at: DateTime<Utc>,
    ) -> AppResult<Transaction>;
    async fn set_copies_available(&mut self, book: BookId, copies: i32) -> AppResult<()>;
    async fn commit(self: Box<Self>) -> AppResult<()>;
}
