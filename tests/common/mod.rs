//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::net::TcpListener;

use gatekeeper::config::AppConfig;
use gatekeeper::lifecycle::Shutdown;
use gatekeeper::mailer::{MailError, Mailer};
use gatekeeper::models::{Scope, Token, User};
use gatekeeper::store::MemoryStore;
use gatekeeper::{AppState, HttpServer};

static NEXT_USER: AtomicUsize = AtomicUsize::new(1);

/// Keeps every activation mail instead of sending it.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMailer {
    /// Plaintext of the last activation token mailed to `email`.
    #[allow(dead_code)]
    pub fn activation_token_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, token)| token.clone())
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_activation(&self, user: &User, token: &Token) -> Result<(), MailError> {
        self.sent
            .lock()
            .unwrap()
            .push((user.email.clone(), token.plaintext.clone()));
        Ok(())
    }
}

/// A running server plus the store and mailer behind it.
pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
    #[allow(dead_code)]
    pub mailer: Arc<RecordingMailer>,
    pub shutdown: Shutdown,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Register a user holding `permissions` and return a bearer token for them.
    #[allow(dead_code)]
    pub fn user_with_token(&self, activated: bool, permissions: &[&str]) -> String {
        let user = self.store.insert_user(User {
            id: 0,
            created_at: Utc::now(),
            name: "Test User".into(),
            email: format!("user{}@example.com", NEXT_USER.fetch_add(1, Ordering::Relaxed)),
            activated,
            version: 0,
        });
        self.store
            .add_permissions_for_user(user.id, permissions.iter().copied());
        let token = Token::generate(user.id, chrono::Duration::hours(1), Scope::Authentication);
        self.store.insert_token(&token);
        token.plaintext
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start the server on an ephemeral port.
pub async fn spawn_server(config: AppConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let store = Arc::new(MemoryStore::new());
    let shutdown = Shutdown::new();
    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState::with_store(config, store.clone()).with_mailer(mailer.clone());
    let server = HttpServer::with_state(state);
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    // Wait for server to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        addr,
        store,
        mailer,
        shutdown,
    }
}

/// Default config with the limiter switched off, so tests only hit it on purpose.
#[allow(dead_code)]
pub fn unlimited_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.limiter.enabled = false;
    config
}
