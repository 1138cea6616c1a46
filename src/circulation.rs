//! Checkout and return workflow, plus the caller-scoped transaction queries.
//!
//! Each mutating operation runs inside a single [`StoreTx`](crate::store::StoreTx):
//! all validation happens before the first write, and the rows involved stay
//! locked until commit, so checkouts and returns are serialized per book.

use std::sync::Arc;

use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::{
    errors::{AppError, AppResult},
    models::{
        BookId, CallerIdentity, NewTransaction, Transaction, TransactionFilter, TransactionId,
        UserId,
    },
    store::LibraryStore,
};

pub const DEFAULT_LOAN_PERIOD_DAYS: u32 = 14;

pub const MSG_NO_COPIES: &str = "no copies available";
pub const MSG_ALREADY_CHECKED_OUT: &str = "already checked out";
pub const MSG_ALREADY_RETURNED: &str = "book already returned";
pub const MSG_CHECKOUT_OWN_ONLY: &str = "you may only checkout your own books";
pub const MSG_RETURN_OWN_ONLY: &str = "you may only return your own books";
pub const MSG_CREATE_VIA_CHECKOUT: &str = "transactions can only be created through checkout";

#[derive(Clone)]
pub struct CirculationService {
    store: Arc<dyn LibraryStore>,
    loan_period: Duration,
}

impl CirculationService {
    pub fn new(store: Arc<dyn LibraryStore>, loan_period_days: u32) -> Self {
        Self {
            store,
            loan_period: Duration::days(i64::from(loan_period_days)),
        }
    }

    /// Lend `book_id` to `user_id`, returning the new active loan.
    ///
    /// # Errors
    /// `NotFound` if the book or user does not exist, `PermissionDenied` if a
    /// non-staff caller targets another user, `Validation` if no copy is left or
    /// the user already holds an active loan of this book.
    pub async fn checkout(
        &self,
        caller: &CallerIdentity,
        book_id: BookId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> AppResult<Transaction> {
        let mut tx = self.store.begin().await?;

        let book = tx
            .lock_book(book_id)
            .await?
            .ok_or_else(|| AppError::not_found("book not found"))?;
        let user = tx
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("user not found"))?;

        if !caller.may_act_for(user.id) {
            debug!(caller = %caller.id, target = %user.id, "checkout for another user refused");
            return Err(AppError::permission_denied(MSG_CHECKOUT_OWN_ONLY));
        }

        if book.copies_available <= 0 {
            debug!(book_id = %book.id, "checkout refused: no copies");
            return Err(AppError::validation(MSG_NO_COPIES));
        }

        if tx.has_active_loan(user.id, book.id).await? {
            debug!(book_id = %book.id, user_id = %user.id, "checkout refused: active loan exists");
            return Err(AppError::validation(MSG_ALREADY_CHECKED_OUT));
        }

        let due_date = now
            .checked_add_signed(self.loan_period)
            .ok_or_else(|| AppError::Anyhow(anyhow!("due date out of range")))?;

        let loan = tx
            .insert_transaction(NewTransaction {
                user: user.id,
                book: book.id,
                due_date,
            })
            .await?;
        tx.set_copies_available(book.id, book.copies_available - 1)
            .await?;
        tx.commit().await?;

        info!(
            transaction_id = %loan.id,
            book_id = %book.id,
            user_id = %user.id,
            due_date = %loan.due_date,
            "book checked out"
        );
        Ok(loan)
    }

    /// Close an active loan and put its copy back on the shelf.
    ///
    /// # Errors
    /// `NotFound` if the transaction (or its book) does not exist,
    /// `PermissionDenied` if a non-staff caller does not own the loan,
    /// `Validation` if the loan was already returned.
    pub async fn return_book(
        &self,
        caller: &CallerIdentity,
        transaction_id: TransactionId,
        now: DateTime<Utc>,
    ) -> AppResult<Transaction> {
        let mut tx = self.store.begin().await?;

        let loan = tx
            .lock_transaction(transaction_id)
            .await?
            .ok_or_else(|| AppError::not_found("transaction not found"))?;

        if !caller.may_act_for(loan.user) {
            debug!(caller = %caller.id, transaction_id = %loan.id, "return of foreign loan refused");
            return Err(AppError::permission_denied(MSG_RETURN_OWN_ONLY));
        }

        if loan.is_returned {
            return Err(AppError::validation(MSG_ALREADY_RETURNED));
        }

        let book = tx
            .lock_book(loan.book)
            .await?
            .ok_or_else(|| AppError::not_found("book not found"))?;
        let copies = book
            .copies_available
            .checked_add(1)
            .ok_or_else(|| AppError::Anyhow(anyhow!("copies_available overflow for book {}", book.id)))?;

        let returned = tx.mark_returned(loan.id, now).await?;
        tx.set_copies_available(book.id, copies).await?;
        tx.commit().await?;

        info!(
            transaction_id = %returned.id,
            book_id = %book.id,
            user_id = %returned.user,
            "book returned"
        );
        Ok(returned)
    }

    /// Staff see every transaction; everyone else sees only their own, whatever
    /// `user` filter they asked for.
    ///
    /// # Errors
    /// Propagates store errors.
    pub async fn list_transactions(
        &self,
        caller: &CallerIdentity,
        mut filter: TransactionFilter,
    ) -> AppResult<Vec<Transaction>> {
        if !caller.is_staff {
            if filter.user.is_some_and(|u| u != caller.id) {
                return Ok(Vec::new());
            }
            filter.user = Some(caller.id);
        }
        self.store.list_transactions(&filter).await
    }

    /// Fetch one transaction from the caller's visible set.
    ///
    /// # Errors
    /// `NotFound` when it does not exist or belongs to someone else and the
    /// caller is not staff.
    pub async fn get_transaction(
        &self,
        caller: &CallerIdentity,
        id: TransactionId,
    ) -> AppResult<Transaction> {
        self.store
            .find_transaction(id)
            .await?
            .filter(|t| caller.may_act_for(t.user))
            .ok_or_else(|| AppError::not_found("transaction not found"))
    }

    /// The generic create path. Loans only come into existence through [`Self::checkout`].
    ///
    /// # Errors
    /// Always `PermissionDenied`.
    pub fn create_transaction(&self, caller: &CallerIdentity) -> AppResult<Transaction> {
        debug!(caller = %caller.id, "generic transaction create refused");
        Err(AppError::permission_denied(MSG_CREATE_VIA_CHECKOUT))
    }
}
