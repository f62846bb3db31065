//! Supabase adapter for the realtime collection
//!
//! Bulk queries go through the PostgREST endpoint (`/rest/v1/{table}`).
//! Live changes come from the Realtime websocket, which speaks the Phoenix
//! channel protocol: join `realtime:{table}-channel` with a `postgres_changes`
//! config, heartbeat on the `phoenix` topic, and receive one
//! `postgres_changes` message per row change.
//!
//! A dropped socket is not reconnected; the subscription simply ends.

use super::store::{Filter, Query, RemoteStore, Subscription, SUBSCRIPTION_BUFFER};
use crate::config::Settings;
use crate::error::Error;
use crate::models::{ChangeEvent, ChangeKind, Record};
use crate::Result;
use futures_util::{SinkExt, StreamExt};
use reqwest::header::CONTENT_RANGE;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

const HEARTBEAT_INTERVAL_SECS: u64 = 30;
const REALTIME_PROTOCOL_VSN: &str = "1.0.0";

/// Phoenix channel frame
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PhoenixMessage {
    topic: String,
    event: String,
    payload: Value,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangePayload {
    data: ChangeData,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: ChangeKind,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    old_record: Option<Value>,
}

/// Client for a hosted Supabase project
#[derive(Clone)]
pub struct SupabaseStore {
    client: Client,
    base_url: String,
    api_key: String,
    heartbeat: Duration,
}

impl SupabaseStore {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            heartbeat: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        if settings.supabase_url.is_empty() || settings.supabase_key.is_empty() {
            return Err(Error::Store(
                "SUPABASE_URL and SUPABASE_KEY must be set".to_string(),
            ));
        }
        Ok(Self::new(&settings.supabase_url, &settings.supabase_key))
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn realtime_url(&self) -> Result<String> {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        };
        let mut url = Url::parse(&format!("{}/realtime/v1/websocket", ws_base))
            .map_err(|e| Error::Store(format!("invalid realtime url {}: {}", ws_base, e)))?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.api_key)
            .append_pair("vsn", REALTIME_PROTOCOL_VSN);
        Ok(url.to_string())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }
}

/// PostgREST horizontal filter, e.g. `status=eq.completed`
fn filter_param(filter: &Filter) -> (String, String) {
    let op = match filter {
        Filter::Eq(..) => "eq",
        Filter::Gte(..) => "gte",
    };
    let value = match filter.value() {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    (filter.field().to_string(), format!("{}.{}", op, value))
}

/// Total from a `Content-Range` header such as `0-24/3573` or `*/3573`
fn parse_content_range(header: &str) -> Result<u64> {
    header
        .rsplit('/')
        .next()
        .and_then(|total| total.trim().parse().ok())
        .ok_or_else(|| Error::Malformed(format!("unusable Content-Range {:?}", header)))
}

#[async_trait::async_trait]
impl RemoteStore for SupabaseStore {
    async fn query(&self, query: &Query) -> Result<Vec<Record>> {
        let url = self.rest_url(&query.table);

        let mut params: Vec<(String, String)> = vec![("select".to_string(), "*".to_string())];
        params.extend(query.filters.iter().map(filter_param));
        if let Some(order) = &query.order_by {
            let direction = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{}", order.field, direction)));
        }
        params.push(("limit".to_string(), query.limit.to_string()));

        let response = self
            .authorized(self.client.get(&url))
            .query(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        let body = response.text().await?;
        let rows: Vec<Value> = serde_json::from_str(&body)?;
        let records = rows
            .into_iter()
            .map(Record::from_value)
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(table = %query.table, rows = records.len(), "Fetched rows");

        Ok(records)
    }

    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64> {
        let url = self.rest_url(table);

        let mut params: Vec<(String, String)> = vec![("select".to_string(), "*".to_string())];
        params.extend(filters.iter().map(filter_param));

        let response = self
            .authorized(self.client.head(&url))
            .query(&params)
            .header("Prefer", "count=exact")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        let range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Malformed("count response without Content-Range".to_string()))?;
        let count = parse_content_range(range)?;

        tracing::debug!(table = %table, filters = filters.len(), count, "Counted rows");

        Ok(count)
    }

    async fn subscribe(&self, table: &str) -> Result<Subscription> {
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(run_channel(
            self.realtime_url()?,
            table.to_string(),
            sender,
            self.heartbeat,
        ));
        Ok(Subscription::new(table, receiver))
    }
}

fn join_message(table: &str, reference: u64) -> PhoenixMessage {
    PhoenixMessage {
        topic: format!("realtime:{}-channel", table),
        event: "phx_join".to_string(),
        payload: json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "*", "schema": "public", "table": table }
                ]
            }
        }),
        reference: Some(reference.to_string()),
    }
}

fn control_message(topic: &str, event: &str, reference: u64) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic.to_string(),
        event: event.to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

/// Decoded Realtime frame
#[derive(Debug, PartialEq)]
enum Frame {
    Change(ChangeEvent),
    Control,
    /// The server refused the join or failed the channel
    Rejected(String),
}

/// Decode one Realtime frame
///
/// Undecodable frames and change frames without a row are `Err`.
fn parse_frame(text: &str) -> Result<Frame> {
    let frame: PhoenixMessage = serde_json::from_str(text)?;

    match frame.event.as_str() {
        "postgres_changes" => {
            let payload: ChangePayload = serde_json::from_value(frame.payload)?;
            let row = match payload.data.kind {
                ChangeKind::Delete => payload.data.old_record,
                ChangeKind::Insert | ChangeKind::Update => payload.data.record,
            }
            .ok_or_else(|| Error::Malformed("change frame without row".to_string()))?;

            Ok(Frame::Change(ChangeEvent {
                kind: payload.data.kind,
                record: Record::from_value(row)?,
            }))
        }
        "phx_reply" | "system" => {
            if frame.payload.get("status").and_then(Value::as_str) == Some("error") {
                return Ok(Frame::Rejected(format!("{}: {}", frame.topic, frame.payload)));
            }
            Ok(Frame::Control)
        }
        "phx_error" => Ok(Frame::Rejected(format!("channel {} errored", frame.topic))),
        _ => Ok(Frame::Control),
    }
}

async fn send_frame<S>(write: &mut S, frame: &PhoenixMessage) -> Result<()>
where
    S: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(frame)?;
    write.send(Message::Text(text)).await?;
    Ok(())
}

async fn run_channel(
    url: String,
    table: String,
    sender: mpsc::Sender<ChangeEvent>,
    heartbeat: Duration,
) {
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            tracing::warn!(table = %table, error = %e, "Failed to connect to realtime");
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let topic = format!("realtime:{}-channel", table);
    let mut next_ref: u64 = 1;

    if let Err(e) = send_frame(&mut write, &join_message(&table, next_ref)).await {
        tracing::warn!(table = %table, error = %e, "Failed to join realtime channel");
        return;
    }
    tracing::info!(table = %table, "Joined realtime channel");

    let mut heartbeat_timer = interval_at(Instant::now() + heartbeat, heartbeat);

    loop {
        tokio::select! {
            _ = sender.closed() => {
                next_ref += 1;
                let _ = send_frame(&mut write, &control_message(&topic, "phx_leave", next_ref)).await;
                let _ = write.send(Message::Close(None)).await;
                tracing::debug!(table = %table, "Left realtime channel");
                break;
            }
            _ = heartbeat_timer.tick() => {
                next_ref += 1;
                if let Err(e) = send_frame(&mut write, &control_message("phoenix", "heartbeat", next_ref)).await {
                    tracing::warn!(table = %table, error = %e, "Failed to send heartbeat");
                    break;
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                        Ok(Frame::Change(event)) => {
                            if sender.send(event).await.is_err() {
                                break;
                            }
                        }
                        Ok(Frame::Control) => {}
                        Ok(Frame::Rejected(reason)) => {
                            tracing::warn!(table = %table, reason = %reason, "Realtime channel rejected");
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(table = %table, error = %e, "Dropped realtime frame");
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::warn!(table = %table, ?frame, "Realtime connection closed by server");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(table = %table, error = %e, "Realtime websocket error");
                        break;
                    }
                    None => {
                        tracing::warn!(table = %table, "Realtime stream ended");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}
