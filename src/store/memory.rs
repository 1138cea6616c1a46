use std::{collections::BTreeMap, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{LibraryStore, StoreTx};
use crate::{
    errors::{AppError, AppResult},
    models::{
        Book, BookId, NewBook, NewTransaction, NewUser, Transaction, TransactionFilter,
        TransactionId, User, UserId,
    },
};

#[derive(Debug, Default)]
struct MemoryState {
    users: BTreeMap<UserId, User>,
    books: BTreeMap<BookId, Book>,
    transactions: BTreeMap<TransactionId, Transaction>,
    last_user_id: i64,
    last_book_id: i64,
    last_transaction_id: i64,
}

fn is_active_loan_of(txn: &Transaction, user: UserId, book: BookId) -> bool {
    txn.user == user && txn.book == book && txn.is_active()
}

/// Process-local store. A unit of work holds the single state lock, so all
/// circulation is serialized, not only per book.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LibraryStore for MemoryStore {
    async fn begin(&self) -> AppResult<Box<dyn StoreTx>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let last_transaction_id = guard.last_transaction_id;
        Ok(Box::new(MemoryTx {
            guard,
            copies: BTreeMap::new(),
            transactions: BTreeMap::new(),
            last_transaction_id,
        }))
    }

    async fn find_user(&self, id: UserId) -> AppResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.username == user.username) {
            return Err(AppError::validation("username already taken"));
        }
        state.last_user_id += 1;
        let created = User {
            id: UserId(state.last_user_id),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            is_staff: user.is_staff,
        };
        state.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn list_books(&self) -> AppResult<Vec<Book>> {
        Ok(self.state.lock().await.books.values().cloned().collect())
    }

    async fn find_book(&self, id: BookId) -> AppResult<Option<Book>> {
        Ok(self.state.lock().await.books.get(&id).cloned())
    }

    async fn create_book(&self, book: NewBook) -> AppResult<Book> {
        if book.copies_available < 0 {
            return Err(AppError::validation("copies_available must not be negative"));
        }
        let mut state = self.state.lock().await;
        state.last_book_id += 1;
        let created = Book {
            id: BookId(state.last_book_id),
            title: book.title,
            author: book.author,
            isbn: book.isbn,
            copies_available: book.copies_available,
        };
        state.books.insert(created.id, created.clone());
        Ok(created)
    }

    async fn list_transactions(&self, filter: &TransactionFilter) -> AppResult<Vec<Transaction>> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn find_transaction(&self, id: TransactionId) -> AppResult<Option<Transaction>> {
        Ok(self.state.lock().await.transactions.get(&id).cloned())
    }
}

/// Holds the state lock and stages only the rows it writes. Reads overlay the
/// staged rows on the locked state; commit applies them.
struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    copies: BTreeMap<BookId, i32>,
    transactions: BTreeMap<TransactionId, Transaction>,
    last_transaction_id: i64,
}

impl MemoryTx {
    fn book(&self, id: BookId) -> Option<Book> {
        let mut book = self.guard.books.get(&id).cloned()?;
        if let Some(&copies) = self.copies.get(&id) {
            book.copies_available = copies;
        }
        Some(book)
    }

    fn transaction(&self, id: TransactionId) -> Option<Transaction> {
        self.transactions
            .get(&id)
            .or_else(|| self.guard.transactions.get(&id))
            .cloned()
    }

    fn active_loan_exists(&self, user: UserId, book: BookId) -> bool {
        self.transactions
            .values()
            .any(|t| is_active_loan_of(t, user, book))
            || self
                .guard
                .transactions
                .values()
                .filter(|t| !self.transactions.contains_key(&t.id))
                .any(|t| is_active_loan_of(t, user, book))
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_book(&mut self, id: BookId) -> AppResult<Option<Book>> {
        Ok(self.book(id))
    }

    async fn lock_transaction(&mut self, id: TransactionId) -> AppResult<Option<Transaction>> {
        Ok(self.transaction(id))
    }

    async fn find_user(&mut self, id: UserId) -> AppResult<Option<User>> {
        Ok(self.guard.users.get(&id).cloned())
    }

    async fn has_active_loan(&mut self, user: UserId, book: BookId) -> AppResult<bool> {
        Ok(self.active_loan_exists(user, book))
    }

    async fn insert_transaction(&mut self, txn: NewTransaction) -> AppResult<Transaction> {
        if self.active_loan_exists(txn.user, txn.book) {
            return Err(AppError::validation("already checked out"));
        }
        self.last_transaction_id += 1;
        let created = Transaction {
            id: TransactionId(self.last_transaction_id),
            user: txn.user,
            book: txn.book,
            due_date: txn.due_date,
            return_date: None,
            is_returned: false,
        };
        self.transactions.insert(created.id, created.clone());
        Ok(created)
    }

    async fn mark_returned(
        &mut self,
        id: TransactionId,
        returned_at: DateTime<Utc>,
    ) -> AppResult<Transaction> {
        let mut txn = self
            .transaction(id)
            .ok_or_else(|| AppError::not_found("transaction not found"))?;
        txn.is_returned = true;
        txn.return_date = Some(returned_at);
        self.transactions.insert(id, txn.clone());
        Ok(txn)
    }

    async fn set_copies_available(&mut self, book: BookId, copies: i32) -> AppResult<()> {
        if copies < 0 {
            return Err(AppError::Anyhow(anyhow!(
                "copies_available for book {book} would become negative"
            )));
        }
        if !self.guard.books.contains_key(&book) {
            return Err(AppError::not_found("book not found"));
        }
        self.copies.insert(book, copies);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let Self {
            mut guard,
            copies,
            transactions,
            last_transaction_id,
        } = *self;
        for (id, count) in copies {
            if let Some(book) = guard.books.get_mut(&id) {
                book.copies_available = count;
            }
        }
        guard.transactions.extend(transactions);
        guard.last_transaction_id = last_transaction_id;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_book(copies: i32) -> NewBook {
        NewBook {
            title: "The Pragmatic Programmer".into(),
            author: "Hunt & Thomas".into(),
            isbn: "9780201616224".into(),
            copies_available: copies,
        }
    }

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.into(),
            email: format!("{name}@example.com"),
            password_hash: "not-a-real-hash".into(),
            is_staff: false,
        }
    }

    #[tokio::test]
    async fn dropped_unit_of_work_discards_writes() {
        let store = MemoryStore::new();
        let book = store.create_book(new_book(2)).await.unwrap();
        let user = store.create_user(new_user("ada")).await.unwrap();

        {
            let mut tx = store.begin().await.unwrap();
            tx.set_copies_available(book.id, 1).await.unwrap();
            tx.insert_transaction(NewTransaction {
                user: user.id,
                book: book.id,
                due_date: Utc::now(),
            })
            .await
            .unwrap();
        }

        let reloaded = store.find_book(book.id).await.unwrap().unwrap();
        assert_eq!(reloaded.copies_available, 2);
        let loans = store
            .list_transactions(&TransactionFilter::default())
            .await
            .unwrap();
        assert!(loans.is_empty());
    }

    #[tokio::test]
    async fn committed_unit_of_work_is_visible() {
        let store = MemoryStore::new();
        let book = store.create_book(new_book(2)).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.set_copies_available(book.id, 1).await.unwrap();
        tx.commit().await.unwrap();

        let reloaded = store.find_book(book.id).await.unwrap().unwrap();
        assert_eq!(reloaded.copies_available, 1);
    }

    #[tokio::test]
    async fn staged_rows_are_read_back_inside_the_unit_of_work() {
        let store = MemoryStore::new();
        let book = store.create_book(new_book(1)).await.unwrap();
        let user = store.create_user(new_user("ada")).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.set_copies_available(book.id, 0).await.unwrap();
        let loan = tx
            .insert_transaction(NewTransaction {
                user: user.id,
                book: book.id,
                due_date: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(tx.lock_book(book.id).await.unwrap().unwrap().copies_available, 0);
        assert!(tx.has_active_loan(user.id, book.id).await.unwrap());

        let returned = tx.mark_returned(loan.id, Utc::now()).await.unwrap();
        assert!(returned.is_returned);
        assert!(!tx.has_active_loan(user.id, book.id).await.unwrap());
        assert!(tx.lock_transaction(loan.id).await.unwrap().unwrap().is_returned);
        tx.commit().await.unwrap();

        let stored = store.find_transaction(loan.id).await.unwrap().unwrap();
        assert!(stored.is_returned);
        assert_eq!(store.find_book(book.id).await.unwrap().unwrap().copies_available, 0);
    }

    #[tokio::test]
    async fn committed_return_frees_the_pair_for_a_new_loan() {
        let store = MemoryStore::new();
        let book = store.create_book(new_book(1)).await.unwrap();
        let user = store.create_user(new_user("ada")).await.unwrap();
        let loan = NewTransaction {
            user: user.id,
            book: book.id,
            due_date: Utc::now(),
        };

        let mut tx = store.begin().await.unwrap();
        let first = tx.insert_transaction(loan.clone()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            tx.insert_transaction(loan.clone()).await,
            Err(AppError::Validation(_))
        ));
        tx.mark_returned(first.id, Utc::now()).await.unwrap();
        let second = tx.insert_transaction(loan).await.unwrap();
        tx.commit().await.unwrap();

        assert_ne!(first.id, second.id);
        let all = store
            .list_transactions(&TransactionFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn negative_copies_are_refused() {
        let store = MemoryStore::new();
        let book = store.create_book(new_book(0)).await.unwrap();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.set_copies_available(book.id, -1).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_username_is_a_validation_error() {
        let store = MemoryStore::new();
        store.create_user(new_user("grace")).await.unwrap();
        let err = store.create_user(new_user("grace")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
