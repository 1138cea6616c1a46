#![allow(dead_code)]

use std::sync::Arc;

use circulation_api::{
    Book, CallerIdentity, CirculationService, Config, NewBook, NewUser, User,
    store::{LibraryStore, MemoryStore},
};

pub fn test_config() -> Config {
    Config {
        database_url: None,
        database_max_connections: 1,
        jwt_secret: "super_secret_test_key".into(),
        server_port: 0,
        loan_period_days: 14,
        rate_limit_per_minute: 1_000,
        access_token_ttl_minutes: 15,
        refresh_token_ttl_days: 7,
    }
}

pub struct Library {
    pub store: Arc<MemoryStore>,
    pub service: CirculationService,
}

impl Library {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let service = CirculationService::new(store.clone(), 14);
        Self { store, service }
    }

    pub async fn book(&self, copies: i32) -> Book {
        self.store
            .create_book(NewBook {
                title: "Structure and Interpretation of Computer Programs".into(),
                author: "Abelson & Sussman".into(),
                isbn: "9780262510875".into(),
                copies_available: copies,
            })
            .await
            .unwrap()
    }

    pub async fn user(&self, name: &str) -> User {
        self.seed_user(name, false).await
    }

    pub async fn staff(&self, name: &str) -> User {
        self.seed_user(name, true).await
    }

    async fn seed_user(&self, name: &str, is_staff: bool) -> User {
        self.store
            .create_user(NewUser {
                username: name.into(),
                email: format!("{name}@example.com"),
                password_hash: "unused".into(),
                is_staff,
            })
            .await
            .unwrap()
    }

    pub async fn copies(&self, book: &Book) -> i32 {
        self.store
            .find_book(book.id)
            .await
            .unwrap()
            .unwrap()
            .copies_available
    }
}

pub fn caller(user: &User) -> CallerIdentity {
    CallerIdentity::from(user)
}
