//! Test utilities and common setup.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use tidepool::{FetchError, FetchResult, PageFetcher};
use tidepool_protocol::{Cursor, Message, Page, Role};

/// Build a test message.
pub fn msg(id: &str, conversation_id: &str, seq: u64) -> Message {
    let mut m = Message::provisional(id, conversation_id, seq, 1738764000000 + seq as i64);
    m.role = if seq % 2 == 1 {
        Role::User
    } else {
        Role::Assistant
    };
    m.content = format!("message {id}");
    m
}

/// Build a test page.
pub fn page(
    conversation_id: &str,
    ids: &[(&str, u64)],
    cursor: Option<&str>,
    has_more: bool,
) -> Page {
    Page {
        messages: ids
            .iter()
            .map(|(id, seq)| msg(id, conversation_id, *seq))
            .collect(),
        next_cursor: cursor.map(Cursor::new),
        has_more,
    }
}

/// A fetcher that replays a scripted sequence of results and records how it
/// was called.
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<FetchResult<Page>>>,
    calls: AtomicU32,
    cursors: Mutex<Vec<Option<String>>>,
}

impl ScriptedFetcher {
    pub fn new(script: Vec<FetchResult<Page>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicU32::new(0),
            cursors: Mutex::new(Vec::new()),
        }
    }

    /// Total fetch calls observed.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Cursor tokens observed, in call order.
    pub fn seen_cursors(&self) -> Vec<Option<String>> {
        self.cursors.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch_page(
        &self,
        _conversation_id: &str,
        cursor: Option<&Cursor>,
        _limit: u32,
    ) -> FetchResult<Page> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.cursors
            .lock()
            .unwrap()
            .push(cursor.map(|c| c.as_str().to_string()));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Terminal("script exhausted".to_string())))
    }
}

/// A scripted fetcher whose calls block until released, for exercising
/// in-flight behavior deterministically.
pub struct GatedFetcher {
    inner: ScriptedFetcher,
    gate: Semaphore,
}

impl GatedFetcher {
    pub fn new(script: Vec<FetchResult<Page>>) -> Self {
        Self {
            inner: ScriptedFetcher::new(script),
            gate: Semaphore::new(0),
        }
    }

    /// Let `n` blocked fetches proceed.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn calls(&self) -> u32 {
        self.inner.calls()
    }
}

#[async_trait]
impl PageFetcher for GatedFetcher {
    async fn fetch_page(
        &self,
        conversation_id: &str,
        cursor: Option<&Cursor>,
        limit: u32,
    ) -> FetchResult<Page> {
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        self.inner.fetch_page(conversation_id, cursor, limit).await
    }
}
