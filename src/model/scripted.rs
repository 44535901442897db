//! Scripted model caller for tests

use super::{ModelCaller, PromptSpec};
use crate::error::ModelError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

enum Reply {
    Text(String),
    Delayed(Duration, String),
    Fail(ModelError),
}

/// Replies are queued per prompt key (`clarifier`, `option_evaluator#1`, ...).
/// An exhausted queue answers with a permanent error.
#[derive(Default)]
pub(crate) struct ScriptedCaller {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedCaller {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, key: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn push_text(&self, key: &str, text: impl Into<String>) {
        self.push(key, Reply::Text(text.into()));
    }

    pub fn push_delayed(&self, key: &str, delay: Duration, text: impl Into<String>) {
        self.push(key, Reply::Delayed(delay, text.into()));
    }

    pub fn push_error(&self, key: &str, err: ModelError) {
        self.push(key, Reply::Fail(err));
    }

    pub fn calls_for(&self, key: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|k| *k == key).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Prompts seen so far, in call order
    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelCaller for ScriptedCaller {
    async fn call(&self, spec: &PromptSpec) -> Result<String, ModelError> {
        let key = spec.key();
        self.calls.lock().unwrap().push(key.clone());

        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(|queue| queue.pop_front());

        match reply {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Delayed(delay, text)) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
            Some(Reply::Fail(err)) => Err(err),
            None => Err(ModelError::permanent(format!("no scripted reply for {}", key))),
        }
    }
}
