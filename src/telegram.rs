//! Minimal Telegram Bot API client: long-polled updates in, messages out.
//! Blocking JSON over HTTPS; only the two methods the bot needs.

use log::debug;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const API_BASE: &str = "https://api.telegram.org";
const LONG_POLL_TIMEOUT_SECS: u64 = 30;

#[derive(thiserror::Error, Debug)]
pub enum BotError {
    #[error("telegram request failed: {0}")]
    Http(#[source] Box<ureq::Error>),
    #[error("malformed telegram response: {0}")]
    Decode(#[from] std::io::Error),
    #[error("telegram api error: {0}")]
    Api(String),
}

// https://core.telegram.org/bots/api#making-requests
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

pub struct Bot {
    agent: ureq::Agent,
    base: String,
}

impl Bot {
    pub fn new(token: &str) -> Bot {
        // The read timeout has to outlast the long poll.
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(LONG_POLL_TIMEOUT_SECS + 15))
            .build();
        Bot {
            agent,
            base: format!("{}/bot{}", API_BASE, token),
        }
    }

    fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, BotError> {
        let url = format!("{}/{}", self.base, method);
        debug!("calling {}", method);
        let resp = match self.agent.post(&url).send_json(params) {
            Ok(resp) => resp,
            // API-level failures come back as HTTP errors with an ok=false
            // JSON body; fall through and surface the description.
            Err(ureq::Error::Status(_, resp)) => resp,
            Err(err) => return Err(BotError::Http(Box::new(err))),
        };
        let api: ApiResponse<T> = resp.into_json()?;
        if !api.ok {
            return Err(BotError::Api(
                api.description
                    .unwrap_or_else(|| "no description".to_string()),
            ));
        }
        api.result
            .ok_or_else(|| BotError::Api("response has no result".to_string()))
    }

    /// Long-poll for updates past `offset`. Blocks up to the poll timeout
    /// when nothing is queued.
    pub fn get_updates(&self, offset: i64) -> Result<Vec<Update>, BotError> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": LONG_POLL_TIMEOUT_SECS,
                "allowed_updates": ["message"],
            }),
        )
    }

    pub fn send_message(&self, chat_id: i64, text: &str) -> Result<Message, BotError> {
        self.call(
            "sendMessage",
            json!({
                "chat_id": chat_id,
                "text": text,
            }),
        )
    }
}
