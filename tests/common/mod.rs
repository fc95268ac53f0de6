//! Shared test utilities

use sellio_gateway::db::{self, DbPool, Integration, IntegrationRepo};
use sellio_gateway::event::Platform;

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Seed an active integration
pub fn create_test_integration(db: &DbPool, platform: Platform) -> Integration {
    let mut integration = Integration::new(platform);
    if platform == Platform::TelegramBusiness {
        integration.credentials = serde_json::json!({"bot_token": "1000:test"});
    }
    IntegrationRepo::new(db.clone())
        .insert(&integration)
        .expect("failed to seed integration");
    integration
}
