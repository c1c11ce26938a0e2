use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::OnceLock;
use tokio::sync::mpsc;
use tokio::time::Duration;
use whistle_core::registry::ChannelHandle;
use whistle_core::{observability, AppState};
use whistle_models::gateway::{ClientEvent, ServerEvent};

use crate::session::Session;

const WS_PING_INTERVAL: Duration = Duration::from_secs(20);
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const WS_MAX_GLOBAL_CONNECTIONS_DEFAULT: usize = 2_000;
const WS_MAX_MESSAGES_PER_MINUTE_DEFAULT: u32 = 240;
const WS_MAX_TYPING_EVENTS_PER_MINUTE_DEFAULT: u32 = 120;
const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

#[derive(Clone, Copy)]
struct WsLimits {
    max_global_connections: usize,
    max_messages_per_minute: u32,
    max_typing_events_per_minute: u32,
}

static WS_LIMITS: OnceLock<WsLimits> = OnceLock::new();

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn ws_limits() -> WsLimits {
    *WS_LIMITS.get_or_init(|| WsLimits {
        max_global_connections: env_usize(
            "WHISTLE_WS_MAX_CONNECTIONS",
            WS_MAX_GLOBAL_CONNECTIONS_DEFAULT,
        ),
        max_messages_per_minute: env_u32(
            "WHISTLE_WS_MAX_MESSAGES_PER_MINUTE",
            WS_MAX_MESSAGES_PER_MINUTE_DEFAULT,
        ),
        max_typing_events_per_minute: env_u32(
            "WHISTLE_WS_MAX_TYPING_EVENTS_PER_MINUTE",
            WS_MAX_TYPING_EVENTS_PER_MINUTE_DEFAULT,
        ),
    })
}

struct ConnectionGuard {
    acquired: bool,
}

impl ConnectionGuard {
    fn try_acquire() -> Self {
        let limits = ws_limits();
        let mut current = ACTIVE_CONNECTIONS.load(AtomicOrdering::SeqCst);
        loop {
            if current >= limits.max_global_connections {
                return Self { acquired: false };
            }
            match ACTIVE_CONNECTIONS.compare_exchange(
                current,
                current + 1,
                AtomicOrdering::SeqCst,
                AtomicOrdering::SeqCst,
            ) {
                Ok(_) => {
                    observability::connection_opened();
                    return Self { acquired: true };
                }
                Err(observed) => current = observed,
            }
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.acquired {
            observability::connection_closed();
            ACTIVE_CONNECTIONS.fetch_sub(1, AtomicOrdering::SeqCst);
        }
    }
}

/// Per-user limiters shared by every channel of the same user.
struct UserRateLimits {
    /// send_message: 240/min per user
    messages: DefaultKeyedRateLimiter<String>,
    /// typing: 120/min per user
    typing: DefaultKeyedRateLimiter<String>,
}

static USER_RATE_LIMITS: OnceLock<UserRateLimits> = OnceLock::new();

fn per_minute(value: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN))
}

fn user_rate_limits() -> &'static UserRateLimits {
    USER_RATE_LIMITS.get_or_init(|| {
        let limits = ws_limits();
        let rate_limits = UserRateLimits {
            messages: RateLimiter::keyed(per_minute(limits.max_messages_per_minute)),
            typing: RateLimiter::keyed(per_minute(limits.max_typing_events_per_minute)),
        };

        tokio::spawn(async {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            interval.tick().await;
            loop {
                interval.tick().await;
                let rl = user_rate_limits();
                rl.messages.retain_recent();
                rl.typing.retain_recent();
                rl.messages.shrink_to_fit();
                rl.typing.shrink_to_fit();
                tracing::trace!("rate limiter cleanup: pruned stale entries");
            }
        });

        rate_limits
    })
}

enum RateDecision {
    Allow,
    /// Over limit; tell the client when to retry.
    Reject { retry_after_ms: u64 },
    /// Over limit; drop without a reply.
    Drop,
}

impl UserRateLimits {
    fn check(&self, user_id: &str, event: &ClientEvent) -> RateDecision {
        let now = DefaultClock::default().now();
        let key = user_id.to_string();
        match event {
            ClientEvent::SendMessage(_) => match self.messages.check_key(&key) {
                Ok(()) => RateDecision::Allow,
                Err(not_until) => RateDecision::Reject {
                    retry_after_ms: not_until.wait_time_from(now).as_millis().max(1) as u64,
                },
            },
            ClientEvent::Typing(_) => match self.typing.check_key(&key) {
                Ok(()) => RateDecision::Allow,
                Err(_) => RateDecision::Drop,
            },
            _ => RateDecision::Allow,
        }
    }
}

pub async fn handle_connection(socket: WebSocket, state: AppState) {
    let guard = ConnectionGuard::try_acquire();
    if !guard.acquired {
        let (mut sender, _) = socket.split();
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_TRY_AGAIN_LATER,
                reason: "gateway is at connection capacity".to_string().into(),
            })))
            .await;
        tracing::warn!("gateway at connection capacity, refusing socket");
        return;
    }

    let (sink, mut stream) = socket.split();
    let (handle, outbound) = ChannelHandle::channel(state.config.channel_buffer);
    let channel_id = handle.id();
    let registry = state.connections.clone();
    let mut session = Session::new(state, handle);
    let writer = tokio::spawn(write_loop(sink, outbound, channel_id));
    let rate_limits = user_rate_limits();
    tracing::debug!(channel_id, "channel opened");

    let disconnect_reason = loop {
        tokio::select! {
            () = registry.closed() => break "server shutting down".to_string(),
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    dispatch_frame(&mut session, text.as_str(), rate_limits).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    session.reject_frame("binary frames are not supported");
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => format!(
                            "client close frame (code={}, reason={})",
                            frame.code, frame.reason
                        ),
                        None => "client close frame (no code/reason)".to_string(),
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => break format!("websocket receive error: {err}"),
                None => break "websocket stream ended".to_string(),
            },
        }
    };

    let user_id = session.user_id().map(str::to_owned);
    session.close();
    // Dropping the session releases the last outbound sender so the writer drains and exits.
    drop(session);
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        tracing::debug!(channel_id, "writer did not drain in time");
    }
    tracing::info!(
        channel_id,
        user_id = user_id.as_deref().unwrap_or("-"),
        reason = %disconnect_reason,
        "channel closed"
    );
    drop(guard);
}

async fn dispatch_frame(session: &mut Session, text: &str, rate_limits: &UserRateLimits) {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(err) => {
            tracing::debug!(channel_id = session.channel_id(), error = %err, "unparseable frame");
            session.reject_frame(&err.to_string());
            return;
        }
    };

    if let Some(user_id) = session.user_id() {
        match rate_limits.check(user_id, &event) {
            RateDecision::Allow => {}
            RateDecision::Reject { retry_after_ms } => {
                tracing::debug!(user_id, event = event.name(), "rate limited");
                session.reject_rate_limited(retry_after_ms);
                return;
            }
            RateDecision::Drop => {
                tracing::debug!(user_id, event = event.name(), "rate limited (silent drop)");
                return;
            }
        }
    }

    session.handle_event(event).await;
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerEvent>,
    channel_id: u64,
) {
    let mut ping = tokio::time::interval(WS_PING_INTERVAL);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping.tick().await;

    loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::error!(channel_id, error = %err, "failed to encode server event");
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    tracing::debug!(channel_id, "socket send failed, stopping writer");
                    break;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = sink.close().await;
}
