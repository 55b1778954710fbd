//! Redis pub/sub subscriptions with a background forwarding task.

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use pulse_core::error::CacheError;
use pulse_core::result::CacheResult;
use pulse_core::traits::cache::{PubSubMessage, Subscription};

use super::client::RedisClient;

/// Open a dedicated pub/sub connection subscribed to `channels`.
///
/// A spawned task relays messages into the returned subscription until the
/// server closes the stream, the subscription is closed, or `parent` is
/// cancelled. Messages that do not fit in the buffer are dropped.
pub async fn subscribe(
    client: &RedisClient,
    channels: &[&str],
    buffer_size: usize,
    parent: &CancellationToken,
) -> CacheResult<Subscription> {
    if !client.is_available() {
        return Err(CacheError::unavailable("Redis is not available"));
    }

    let mut pubsub = tokio::time::timeout(client.connect_timeout(), client.raw().get_async_pubsub())
        .await
        .map_err(|_| CacheError::unavailable("Redis pub/sub connection timed out"))?
        .map_err(|e| client.map_err(e))?;

    for channel in channels {
        pubsub
            .subscribe(client.prefixed_key(channel))
            .await
            .map_err(|e| client.map_err(e))?;
    }

    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    let token = parent.child_token();
    let task_token = token.clone();
    let forwarder = client.clone();

    tokio::spawn(async move {
        let mut stream = pubsub.into_on_message();
        loop {
            tokio::select! {
                _ = task_token.cancelled() => break,
                next = stream.next() => {
                    let Some(msg) = next else {
                        debug!("Redis pub/sub stream ended");
                        break;
                    };
                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(error = %e, "Dropping undecodable pub/sub payload");
                            continue;
                        }
                    };
                    let message = PubSubMessage {
                        channel: forwarder.strip_prefix(msg.get_channel_name()),
                        payload,
                    };
                    match tx.try_send(message) {
                        Ok(()) => {}
                        Err(TrySendError::Full(message)) => {
                            debug!(channel = %message.channel, "Subscriber buffer full, message dropped");
                        }
                        Err(TrySendError::Closed(_)) => break,
                    }
                }
            }
        }
        debug!("Redis pub/sub forwarding stopped");
    });

    let names = channels.iter().map(|c| (*c).to_string()).collect();
    Ok(Subscription::new(names, rx, move || token.cancel()))
}
