//! Streaming market data client over WebSocket.

use async_trait::async_trait;
use futures_util::{SinkExt, Stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use super::traits::{QuoteFeed, QuoteSink};
use super::types::{
    request_id, CandleInterval, FeedEvent, Quote, StreamingMessage, StreamingRequest,
};
use crate::error::FeedError;

pub const STREAMING_URL: &str = "wss://api-invest.tinkoff.ru/openapi/md/v1/md-openapi/ws";

type SubscriberKey = (String, CandleInterval);
type Subscribers = Arc<RwLock<HashMap<SubscriberKey, QuoteSink>>>;

/// Candle stream client.
///
/// One socket is shared by all subscriptions. Incoming candles are routed to
/// the sink registered for their `(figi, interval)` pair from the reader task.
pub struct StreamingFeed {
    outbound: mpsc::UnboundedSender<Message>,
    subscribers: Subscribers,
}

impl StreamingFeed {
    /// Open the socket, authorizing with a bearer token.
    pub async fn connect(url: &str, token: &str) -> Result<Self, FeedError> {
        info!("Connecting to streaming feed: {}", url);

        let mut request = url
            .into_client_request()
            .map_err(|e| FeedError::Connect(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| FeedError::Connect(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;
        let (mut write, read) = ws_stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    warn!("Failed to write to streaming feed: {}", e);
                    break;
                }
                if closing {
                    debug!("Close frame sent");
                    break;
                }
            }
        });

        let subscribers: Subscribers = Arc::new(RwLock::new(HashMap::new()));
        tokio::spawn(Self::read_loop(read, subscribers.clone()));

        info!("Streaming feed connected");
        Ok(Self {
            outbound,
            subscribers,
        })
    }

    async fn read_loop<S>(mut read: S, subscribers: Subscribers)
    where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        let reason = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => dispatch(&subscribers, &text).await,
                Some(Ok(Message::Ping(_))) => {
                    debug!("Received ping");
                    // Pong is handled automatically by tungstenite
                }
                Some(Ok(Message::Close(_))) => {
                    info!("Streaming feed closed by server");
                    break "closed by server".to_string();
                }
                Some(Err(e)) => {
                    error!("Streaming feed error: {}", e);
                    break e.to_string();
                }
                Some(Ok(_)) => {}
                None => break "stream ended".to_string(),
            }
        };

        let mut subscribers = subscribers.write().await;
        for ((figi, interval), sink) in subscribers.drain() {
            debug!(%figi, %interval, "Failing subscription after disconnect");
            sink.deliver(FeedEvent::Error(format!("feed disconnected: {reason}")));
        }
    }

    fn send(&self, request: &StreamingRequest<'_>) -> Result<(), String> {
        let payload = serde_json::to_string(request).map_err(|e| e.to_string())?;
        self.outbound
            .send(Message::Text(payload.into()))
            .map_err(|_| "connection writer has stopped".to_string())
    }
}

/// Route one text frame to its subscriber.
async fn dispatch(subscribers: &Subscribers, text: &str) {
    let message = match StreamingMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("Unparseable streaming message ({}): {}", e, text);
            return;
        }
    };

    match message {
        StreamingMessage::Candle(candle) => {
            let key = (candle.figi.clone(), candle.interval);
            let quote = Quote::new(candle.figi, candle.interval, candle.open);
            let mut subscribers = subscribers.write().await;
            let keep = match subscribers.get(&key) {
                Some(sink) => sink.deliver(FeedEvent::Quote(quote)),
                None => {
                    debug!(figi = %key.0, "Candle for an instrument nobody listens to");
                    return;
                }
            };
            if !keep {
                debug!(figi = %key.0, "Subscriber stopped listening");
                subscribers.remove(&key);
            }
        }
        StreamingMessage::Error(payload) => {
            let subscribers = subscribers.read().await;
            let target = payload.request_id.as_deref().and_then(|id| {
                subscribers
                    .iter()
                    .find(|((figi, interval), _)| request_id(figi, *interval) == id)
            });
            match target {
                Some((_, sink)) => {
                    sink.deliver(FeedEvent::Error(payload.error));
                }
                None => warn!("Streaming feed error: {}", payload.error),
            }
        }
        StreamingMessage::Other(event) => debug!(%event, "Ignoring streaming event"),
    }
}

#[async_trait]
impl QuoteFeed for StreamingFeed {
    async fn subscribe(
        &self,
        instrument_id: &str,
        interval: CandleInterval,
        sink: QuoteSink,
    ) -> Result<(), FeedError> {
        let key = (instrument_id.to_string(), interval);
        self.subscribers.write().await.insert(key.clone(), sink);

        if let Err(reason) = self.send(&StreamingRequest::subscribe_candle(instrument_id, interval))
        {
            self.subscribers.write().await.remove(&key);
            return Err(FeedError::Subscribe {
                instrument_id: instrument_id.to_string(),
                reason,
            });
        }
        debug!(instrument = %instrument_id, %interval, "Subscribed to candles");
        Ok(())
    }

    async fn unsubscribe(
        &self,
        instrument_id: &str,
        interval: CandleInterval,
    ) -> Result<(), FeedError> {
        self.subscribers
            .write()
            .await
            .remove(&(instrument_id.to_string(), interval));

        self.send(&StreamingRequest::unsubscribe_candle(instrument_id, interval))
            .map_err(|reason| FeedError::Unsubscribe {
                instrument_id: instrument_id.to_string(),
                reason,
            })?;
        debug!(instrument = %instrument_id, %interval, "Unsubscribed from candles");
        Ok(())
    }

    fn shutdown(&self) {
        if self.outbound.send(Message::Close(None)).is_err() {
            debug!("Streaming feed writer already stopped");
        }
    }
}
