//! Shared test fixtures: an [`App`] wired to in-memory collaborators.

use std::sync::Arc;

use crate::store::testing::MemoryRecordStore;
use crate::tokens::InMemoryTokenStore;
use crate::{App, Config};

pub struct Harness {
    pub records: Arc<MemoryRecordStore>,
    pub tokens: Arc<InMemoryTokenStore>,
    pub app: App,
}

pub fn harness(dev_mode: bool) -> Harness {
    let records = Arc::new(MemoryRecordStore::new());
    let tokens = Arc::new(InMemoryTokenStore::new());
    let app = App {
        config: Arc::new(Config {
            base_url: "http://portal.test".to_string(),
            dev_mode,
            dev_email: "test@example.com".to_string(),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
        }),
        records: records.clone(),
        tokens: tokens.clone(),
        mailer: None,
        chat: None,
    };
    Harness {
        records,
        tokens,
        app,
    }
}

pub fn test_app() -> App {
    harness(false).app
}
