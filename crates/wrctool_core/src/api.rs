use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use rand::Rng;
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{WikiSettings, WrcConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePage {
    pub title: String,
    pub page_id: i64,
    pub revision_id: i64,
    pub timestamp: String,
    pub content: String,
    pub content_model: Option<String>,
    /// Server time of the fetch, used as the edit start timestamp.
    pub fetched_at: Option<String>,
}

/// One row of a Translate message group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEntry {
    pub key: String,
    pub definition: Option<String>,
    pub translation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditRequest {
    pub title: String,
    pub text: String,
    pub summary: String,
    /// Replace only this section of the page.
    pub section: Option<u32>,
    /// Fail instead of creating the page.
    pub nocreate: bool,
    pub content_model: Option<String>,
    /// Revision timestamp the text was based on; a newer revision is a conflict.
    pub base_timestamp: Option<String>,
    pub start_timestamp: Option<String>,
}

impl EditRequest {
    pub fn new(
        title: impl Into<String>,
        text: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            summary: summary.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub title: String,
    pub new_revision_id: Option<i64>,
    pub no_change: bool,
}

pub trait WikiReadApi {
    fn get_page(&mut self, title: &str) -> Result<Option<RemotePage>>;
    fn get_message_collection(&mut self, group: &str, language: &str)
    -> Result<Vec<MessageEntry>>;
    fn request_count(&self) -> usize;
}

pub trait WikiWriteApi: WikiReadApi {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    fn edit_page(&mut self, request: &EditRequest) -> Result<EditOutcome>;
    /// Purge rendered caches; returns the titles the wiki reports as purged.
    fn purge_pages(&mut self, titles: &[String]) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &WrcConfig) -> Self {
        Self::from_settings(&config.wiki_settings())
    }

    pub fn from_settings(settings: &WikiSettings) -> Self {
        Self {
            api_url: settings.api_url.clone(),
            user_agent: settings.user_agent.clone(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            max_write_retries: env_value_usize("WIKI_HTTP_WRITE_RETRIES", 1),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        Url::parse(&config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    fn request_json_get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let base_url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", self.config.api_url))?;
        let pairs = api_pairs(params);
        let max_retries = self.config.max_retries;

        for attempt in 0..=max_retries {
            self.apply_rate_limit(false);
            debug!(action = action_of(params), attempt, "GET MediaWiki API");
            let response = self
                .client
                .get(base_url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .query(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, false);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }
                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    return check_api_error(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, false);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn request_json_post(&mut self, params: &[(&str, String)], is_write: bool) -> Result<Value> {
        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };
        let pairs = api_pairs(params);

        for attempt in 0..=max_retries {
            self.apply_rate_limit(is_write);
            debug!(action = action_of(params), attempt, is_write, "POST MediaWiki API");
            let response = self
                .client
                .post(&self.config.api_url)
                .header("User-Agent", self.config.user_agent.clone())
                .form(&pairs)
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, is_write);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }
                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    return check_api_error(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, is_write);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = rand::thread_rng().gen_range(0..100u64);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        let delay = base.saturating_mul(multiplier).saturating_add(jitter);
        warn!(attempt, delay_ms = delay, "retrying MediaWiki API request");
        sleep(Duration::from_millis(delay));
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode csrf token response")?;
        let token = parsed
            .query
            .tokens
            .and_then(|tokens| tokens.csrftoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki csrf token"))?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }
}

impl WikiReadApi for MediaWikiClient {
    fn get_page(&mut self, title: &str) -> Result<Option<RemotePage>> {
        let response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content|contentmodel|timestamp|ids".to_string()),
            ("rvslots", "main".to_string()),
            ("curtimestamp", "1".to_string()),
        ])?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode page content API response")?;

        let fetched_at = parsed.curtimestamp;
        let Some(page) = parsed.query.pages.into_iter().next() else {
            return Ok(None);
        };
        if page.missing.unwrap_or(false) || page.invalid.unwrap_or(false) {
            return Ok(None);
        }
        let Some(page_id) = page.pageid else {
            return Ok(None);
        };
        let Some(revision) = page.revisions.into_iter().next() else {
            return Ok(None);
        };
        let Some(slot) = revision.slots.and_then(|slots| slots.main) else {
            bail!("revision of {} has no main slot", page.title);
        };

        Ok(Some(RemotePage {
            title: page.title,
            page_id,
            revision_id: revision.revid,
            timestamp: revision.timestamp,
            content: slot.content,
            content_model: slot.contentmodel,
            fetched_at,
        }))
    }

    fn get_message_collection(
        &mut self,
        group: &str,
        language: &str,
    ) -> Result<Vec<MessageEntry>> {
        let mut messages = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("list", "messagecollection".to_string()),
                ("mcgroup", group.to_string()),
                ("mclanguage", language.to_string()),
                ("mclimit", "max".to_string()),
            ];
            if let Some(token) = &offset {
                params.push(("mcoffset", token.clone()));
            }

            let response = self.request_json_get(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode messagecollection API response")?;
            for item in parsed.query.messagecollection {
                messages.push(MessageEntry {
                    key: item.key,
                    definition: item.definition,
                    translation: item.translation,
                });
            }

            offset = parsed.continuation.and_then(|cont| cont.mcoffset);
            if offset.is_none() {
                break;
            }
        }

        Ok(messages)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl WikiWriteApi for MediaWikiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let token_response = self.request_json_get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json_post(
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            true,
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                debug!(user = username, "logged in to MediaWiki");
                Ok(())
            }
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn edit_page(&mut self, request: &EditRequest) -> Result<EditOutcome> {
        let token = self.ensure_csrf_token()?;
        let mut params = vec![
            ("action", "edit".to_string()),
            ("title", request.title.clone()),
            ("text", request.text.clone()),
            ("summary", request.summary.clone()),
            ("bot", "1".to_string()),
        ];
        if let Some(section) = request.section {
            params.push(("section", section.to_string()));
        }
        if request.nocreate {
            params.push(("nocreate", "1".to_string()));
        }
        if let Some(model) = &request.content_model {
            params.push(("contentmodel", model.clone()));
        }
        if let Some(timestamp) = &request.base_timestamp {
            params.push(("basetimestamp", timestamp.clone()));
        }
        if let Some(timestamp) = &request.start_timestamp {
            params.push(("starttimestamp", timestamp.clone()));
        }
        // Token must be the last form field.
        params.push(("token", token));

        let response = self.request_json_post(&params, true)?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let edit = edit_payload
            .edit
            .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
        if edit.result.as_deref() != Some("Success") {
            bail!(
                "MediaWiki edit failed for {}: {}",
                request.title,
                edit.result.unwrap_or_else(|| "unknown".to_string())
            );
        }

        Ok(EditOutcome {
            title: edit.title.unwrap_or_else(|| request.title.clone()),
            new_revision_id: edit.newrevid,
            no_change: edit.nochange.unwrap_or(false),
        })
    }

    fn purge_pages(&mut self, titles: &[String]) -> Result<Vec<String>> {
        let mut purged = Vec::new();
        for batch in titles.chunks(50) {
            let response = self.request_json_post(
                &[
                    ("action", "purge".to_string()),
                    ("titles", batch.join("|")),
                ],
                false,
            )?;
            let parsed: PurgeResponse =
                serde_json::from_value(response).context("failed to decode purge response")?;
            purged.extend(
                parsed
                    .purge
                    .into_iter()
                    .filter(|item| item.purged.unwrap_or(false))
                    .map(|item| item.title),
            );
        }
        Ok(purged)
    }
}

fn api_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() {
            pairs.push(((*key).to_string(), value.clone()));
        }
    }
    pairs
}

fn action_of<'a>(params: &'a [(&str, String)]) -> &'a str {
    params
        .iter()
        .find(|(key, _)| *key == "action")
        .map(|(_, value)| value.as_str())
        .unwrap_or("unknown")
}

fn check_api_error(payload: Value) -> Result<Value> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(payload)
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
    curtimestamp: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
    #[serde(default)]
    messagecollection: Vec<MessageCollectionItem>,
}

#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    #[serde(default, deserialize_with = "string_or_number")]
    mcoffset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    pageid: Option<i64>,
    title: String,
    missing: Option<bool>,
    invalid: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    revid: i64,
    timestamp: String,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
    contentmodel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageCollectionItem {
    key: String,
    definition: Option<String>,
    translation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
    title: Option<String>,
    newrevid: Option<i64>,
    nochange: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct PurgeResponse {
    #[serde(default)]
    purge: Vec<PurgeItem>,
}

#[derive(Debug, Deserialize)]
struct PurgeItem {
    title: String,
    purged: Option<bool>,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        EditResponse, QueryResponse, api_pairs, check_api_error, is_retryable_status,
    };
    use reqwest::StatusCode;

    #[test]
    fn api_pairs_add_format_and_skip_empty_values() {
        let pairs = api_pairs(&[
            ("action", "query".to_string()),
            ("mcoffset", String::new()),
        ]);
        assert_eq!(
            pairs,
            vec![
                ("format".to_string(), "json".to_string()),
                ("formatversion".to_string(), "2".to_string()),
                ("action".to_string(), "query".to_string()),
            ]
        );
    }

    #[test]
    fn api_error_payload_becomes_error() {
        let error = check_api_error(json!({
            "error": { "code": "editconflict", "info": "Edit conflict." }
        }))
        .expect_err("must fail");
        assert_eq!(
            error.to_string(),
            "MediaWiki API error [editconflict]: Edit conflict."
        );
        assert!(check_api_error(json!({ "batchcomplete": true })).is_ok());
    }

    #[test]
    fn decodes_page_revision_with_content_model() {
        let parsed: QueryResponse = serde_json::from_value(json!({
            "query": { "pages": [{
                "pageid": 7,
                "ns": 828,
                "title": "Module:Wikimedia Resource Center/Groups",
                "revisions": [{
                    "revid": 42,
                    "timestamp": "2024-01-02T03:04:05Z",
                    "slots": { "main": {
                        "contentmodel": "Scribunto",
                        "content": "return {}"
                    }}
                }]
            }]}
        }))
        .expect("decode");
        let page = &parsed.query.pages[0];
        assert_eq!(page.pageid, Some(7));
        let slot = page.revisions[0]
            .slots
            .as_ref()
            .and_then(|slots| slots.main.as_ref())
            .expect("main slot");
        assert_eq!(slot.contentmodel.as_deref(), Some("Scribunto"));
        assert_eq!(slot.content, "return {}");
    }

    #[test]
    fn decodes_message_collection_with_numeric_offset() {
        let parsed: QueryResponse = serde_json::from_value(json!({
            "continue": { "mcoffset": 500, "continue": "-||" },
            "query": { "messagecollection": [{
                "key": "Template:I18n/Wikimedia_Resource_Center/user-page",
                "definition": "User:",
                "translation": null
            }]}
        }))
        .expect("decode");
        assert_eq!(
            parsed.continuation.and_then(|cont| cont.mcoffset).as_deref(),
            Some("500")
        );
        assert_eq!(parsed.query.messagecollection.len(), 1);
        assert!(parsed.query.messagecollection[0].translation.is_none());
    }

    #[test]
    fn decodes_nochange_edit() {
        let parsed: EditResponse = serde_json::from_value(json!({
            "edit": { "result": "Success", "title": "Connect/Alpha", "nochange": true }
        }))
        .expect("decode");
        let edit = parsed.edit.expect("edit");
        assert_eq!(edit.nochange, Some(true));
        assert!(edit.newrevid.is_none());
    }

    #[test]
    fn retries_only_transient_statuses() {
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }
}
