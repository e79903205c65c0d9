//! Deadline helpers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::RpcError;
use crate::event::{Event, EventSource};

/// Bound used when no explicit duration is given
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

#[inline]
fn timeout_message(timeout: Duration, context: Option<&str>) -> String {
    match context {
        Some(ctx) => {
            format!("[{}] Service or another peer not responding more than {} ms", ctx, timeout.as_millis())
        }
        None => format!("Service or another peer not responding more than {} ms", timeout.as_millis()),
    }
}

/// Settles with `fut` or with a timeout error once `timeout` elapsed, whichever comes first.
///
/// On timeout `fut` is dropped. Calls made through [`crate::RpcEngine`] forget
/// their pending entry when dropped, so a late reply is ignored.
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use std::time::Duration;
/// use mqrpc::{race_with_timeout, RpcError};
///
/// let r: Result<(), RpcError> =
///     race_with_timeout(futures::future::pending(), Duration::from_millis(10), Some("ping")).await;
/// assert_eq!(
///     r,
///     Err(RpcError::Timeout("[ping] Service or another peer not responding more than 10 ms".into()))
/// );
/// # }
/// ```
pub async fn race_with_timeout<F, T, E>(fut: F, timeout: Duration, context: Option<&str>) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<RpcError>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res,
        Err(_) => {
            log::debug!("{}", timeout_message(timeout, context));
            Err(RpcError::Timeout(timeout_message(timeout, context)).into())
        }
    }
}

/// [`race_with_timeout`] bounded by [`DEFAULT_TIMEOUT`]
#[inline]
pub async fn race_with_default_timeout<F, T, E>(fut: F, context: Option<&str>) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<RpcError>,
{
    race_with_timeout(fut, DEFAULT_TIMEOUT, context).await
}

/// Waits for the first `label` event accepted by `filter`, after kicking off `trigger`.
///
/// The listener is registered before `trigger` starts, so a confirmation that
/// arrives while the trigger is still in flight is not missed. It fails with the
/// trigger's error if the trigger fails first, or with a timeout error. The
/// listener is removed from `source` on every exit path. When the event wins,
/// an unfinished trigger is dropped.
pub async fn wait_for_event<S, P, F, T>(
    source: &S,
    label: &str,
    filter: P,
    trigger: F,
    timeout: Duration,
    context: Option<&str>,
) -> Result<Event, RpcError>
where
    S: EventSource + ?Sized,
    P: Fn(&Event) -> bool + Send + Sync + 'static,
    F: Future<Output = Result<T, RpcError>>,
{
    let (tx, mut rx) = oneshot::channel::<Event>();
    let tx = Arc::new(Mutex::new(Some(tx)));
    let id = source.on(
        label,
        Arc::new(move |event: &Event| {
            if filter(event) {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(event.clone());
                }
            }
        }),
    );
    let _listener = scopeguard::guard(id, |id| source.off(id));

    let wait = async move {
        let mut trigger = std::pin::pin!(trigger);
        let mut triggered = false;
        loop {
            tokio::select! {
                res = &mut trigger, if !triggered => {
                    if let Err(e) = res {
                        return Err(e);
                    }
                    triggered = true;
                }
                event = &mut rx => {
                    return event.map_err(|_| RpcError::service("event listener dropped"));
                }
            }
        }
    };

    race_with_timeout(wait, timeout, context).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBus;
    use serde_json::json;

    fn agent_filter(agent: &'static str) -> impl Fn(&Event) -> bool + Send + Sync + 'static {
        move |e: &Event| e.data.get("agent_id").and_then(|v| v.as_str()) == Some(agent)
    }

    #[tokio::test]
    async fn test_race_with_timeout() {
        let r: Result<u32, RpcError> = race_with_timeout(async { Ok(7) }, Duration::from_millis(50), None).await;
        assert_eq!(r, Ok(7));

        let r: Result<u32, RpcError> =
            race_with_timeout(async { Err(RpcError::service("boom")) }, Duration::from_millis(50), None).await;
        assert_eq!(r, Err(RpcError::Service("boom".into())));

        let r: Result<u32, RpcError> = race_with_timeout(futures::future::pending(), Duration::from_millis(20), None).await;
        assert_eq!(r, Err(RpcError::Timeout("Service or another peer not responding more than 20 ms".into())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_timeout() {
        let r: Result<(), RpcError> = race_with_default_timeout(futures::future::pending(), Some("room.enter")).await;
        assert_eq!(
            r,
            Err(RpcError::Timeout("[room.enter] Service or another peer not responding more than 5000 ms".into()))
        );
    }

    #[tokio::test]
    async fn test_wait_for_event_success() {
        let bus = EventBus::new();
        let emitter = bus.clone();
        let trigger = async move {
            emitter.emit(&Event::new("room.enter", json!({"agent_id": "other"})));
            emitter.emit(&Event::new("room.enter", json!({"agent_id": "me"})));
            Ok::<_, RpcError>(())
        };
        let event = wait_for_event(&bus, "room.enter", agent_filter("me"), trigger, Duration::from_millis(100), None)
            .await
            .unwrap();
        assert_eq!(event.data, json!({"agent_id": "me"}));
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_event_after_trigger() {
        let bus = EventBus::new();
        let emitter = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            emitter.emit(&Event::new("room.enter", json!({"agent_id": "me"})));
        });
        let event = wait_for_event(
            &bus,
            "room.enter",
            agent_filter("me"),
            async { Ok::<_, RpcError>(json!({})) },
            Duration::from_millis(1000),
            Some("room.enter"),
        )
        .await
        .unwrap();
        assert_eq!(event.label, "room.enter");
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_event_trigger_failure() {
        let bus = EventBus::new();
        let r = wait_for_event(
            &bus,
            "room.enter",
            agent_filter("me"),
            async { Err::<(), _>(RpcError::transport("publish failed")) },
            Duration::from_millis(100),
            None,
        )
        .await;
        assert_eq!(r, Err(RpcError::Transport("publish failed".into())));
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_for_event_timeout() {
        let bus = EventBus::new();
        let emitter = bus.clone();
        let trigger = async move {
            emitter.emit(&Event::new("room.enter", json!({"agent_id": "other"})));
            Ok::<_, RpcError>(())
        };
        let r = wait_for_event(&bus, "room.enter", agent_filter("me"), trigger, Duration::from_millis(30), Some("room.enter"))
            .await;
        assert!(matches!(r, Err(RpcError::Timeout(ref m)) if m.starts_with("[room.enter]")));
        assert_eq!(bus.listener_count(), 0);
    }
}
