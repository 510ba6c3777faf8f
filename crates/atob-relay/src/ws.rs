//! [`WsRelay`]: a NIP-01 relay reached over WebSocket.
//!
//! Each call opens a fresh connection, performs one exchange and closes.
//! Marketplace traffic is a handful of requests per view, so no connection
//! pool is kept.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::{net::TcpStream, time::Instant};
use tokio_tungstenite::{
  MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};
use tracing::debug;

use atob_core::{
  event::{Event, Filter},
  relay::{Relay, RelayError},
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WsRelay {
  url: String,
}

impl WsRelay {
  pub fn new(url: impl Into<String>) -> Self { Self { url: url.into() } }

  fn connect_err(&self, reason: impl ToString) -> RelayError {
    RelayError::Connect { url: self.url.clone(), reason: reason.to_string() }
  }

  fn protocol_err(&self, reason: impl ToString) -> RelayError {
    RelayError::Protocol { url: self.url.clone(), reason: reason.to_string() }
  }

  async fn connect(&self, deadline: Instant) -> Result<Socket, RelayError> {
    match tokio::time::timeout_at(deadline, connect_async(self.url.as_str())).await {
      Ok(Ok((socket, _response))) => Ok(socket),
      Ok(Err(e)) => Err(self.connect_err(e)),
      Err(_) => Err(RelayError::Timeout(self.url.clone())),
    }
  }

  async fn send(&self, socket: &mut Socket, frame: Value) -> Result<(), RelayError> {
    socket
      .send(Message::Text(frame.to_string()))
      .await
      .map_err(|e| self.connect_err(e))
  }

  /// Next relay message as a JSON array, skipping control frames.
  async fn next_frame(&self, socket: &mut Socket) -> Result<Option<Vec<Value>>, RelayError> {
    while let Some(msg) = socket.next().await {
      let msg = msg.map_err(|e| self.connect_err(e))?;
      let text = match msg {
        Message::Text(text) => text,
        Message::Close(_) => return Ok(None),
        _ => continue,
      };
      match serde_json::from_str::<Value>(&text) {
        Ok(Value::Array(frame)) => return Ok(Some(frame)),
        Ok(_) | Err(_) => {
          debug!(relay = %self.url, "ignoring non-array relay message");
          continue;
        }
      }
    }
    Ok(None)
  }

  async fn close(socket: &mut Socket) { let _ = socket.close(None).await; }
}

impl Relay for WsRelay {
  fn url(&self) -> &str { &self.url }

  async fn publish(&self, event: &Event, timeout: Duration) -> Result<(), RelayError> {
    let deadline = Instant::now() + timeout;
    let mut socket = self.connect(deadline).await?;

    let exchange = async {
      self.send(&mut socket, json!(["EVENT", event])).await?;
      loop {
        let Some(frame) = self.next_frame(&mut socket).await? else {
          return Err(self.protocol_err("connection closed before OK"));
        };
        match frame.first().and_then(Value::as_str) {
          Some("OK") if frame.get(1).and_then(Value::as_str) == Some(event.id.as_str()) => {
            let accepted = frame.get(2).and_then(Value::as_bool).unwrap_or(false);
            if accepted {
              return Ok(());
            }
            let reason = frame.get(3).and_then(Value::as_str).unwrap_or_default();
            return Err(RelayError::Rejected { url: self.url.clone(), reason: reason.into() });
          }
          Some("NOTICE") => debug!(relay = %self.url, notice = ?frame.get(1), "relay notice"),
          _ => {}
        }
      }
    };

    let result = match tokio::time::timeout_at(deadline, exchange).await {
      Ok(result) => result,
      Err(_) => Err(RelayError::Timeout(self.url.clone())),
    };
    Self::close(&mut socket).await;
    result
  }

  async fn query(&self, filter: &Filter, timeout: Duration) -> Result<Vec<Event>, RelayError> {
    let deadline = Instant::now() + timeout;
    let mut socket = self.connect(deadline).await?;
    let sub_id = uuid::Uuid::new_v4().simple().to_string();

    self.send(&mut socket, json!(["REQ", sub_id, filter])).await?;

    let mut events = Vec::new();
    loop {
      let frame = match tokio::time::timeout_at(deadline, self.next_frame(&mut socket)).await {
        Ok(Ok(Some(frame))) => frame,
        Ok(Ok(None)) => break,
        Ok(Err(e)) => {
          if events.is_empty() {
            return Err(e);
          }
          debug!(relay = %self.url, error = %e, "relay dropped mid-query, keeping partial results");
          break;
        }
        Err(_) => {
          debug!(relay = %self.url, count = events.len(), "query deadline reached");
          break;
        }
      };

      let for_us = frame.get(1).and_then(Value::as_str) == Some(sub_id.as_str());
      match frame.first().and_then(Value::as_str) {
        Some("EVENT") if for_us => match frame.get(2).cloned().map(serde_json::from_value::<Event>) {
          Some(Ok(event)) => events.push(event),
          _ => debug!(relay = %self.url, "dropping malformed event frame"),
        },
        Some("EOSE") if for_us => break,
        Some("CLOSED") if for_us => {
          debug!(relay = %self.url, reason = ?frame.get(2), "subscription closed by relay");
          break;
        }
        Some("NOTICE") => debug!(relay = %self.url, notice = ?frame.get(1), "relay notice"),
        _ => {}
      }
    }

    let _ = self.send(&mut socket, json!(["CLOSE", sub_id])).await;
    Self::close(&mut socket).await;
    Ok(events)
  }

  async fn ping(&self, timeout: Duration) -> Result<(), RelayError> {
    let mut socket = self.connect(Instant::now() + timeout).await?;
    Self::close(&mut socket).await;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::future::Future;

  use atob_core::event::{EventDraft, kinds};
  use tokio::{net::TcpListener, task::JoinHandle};
  use tokio_tungstenite::accept_async;

  use super::*;

  type Server = WebSocketStream<TcpStream>;

  /// Accept one connection on a loopback port and hand it to `script`.
  /// Awaiting the handle surfaces the script's own assertions.
  async fn relay_with<F, Fut>(script: F) -> (WsRelay, JoinHandle<()>)
  where
    F: FnOnce(Server) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
  {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
      let (stream, _) = listener.accept().await.unwrap();
      let ws = accept_async(stream).await.unwrap();
      script(ws).await;
    });
    (WsRelay::new(format!("ws://{addr}")), server)
  }

  async fn recv(ws: &mut Server) -> Vec<Value> {
    loop {
      match ws.next().await {
        Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
        Some(Ok(_)) => continue,
        other => panic!("client went away: {other:?}"),
      }
    }
  }

  async fn reply(ws: &mut Server, frame: Value) {
    ws.send(Message::Text(frame.to_string())).await.unwrap();
  }

  /// Read the REQ and return its subscription id.
  async fn subscription(ws: &mut Server) -> String {
    let req = recv(ws).await;
    assert_eq!(req[0], "REQ");
    req[1].as_str().unwrap().to_owned()
  }

  fn event(id: &str) -> Event {
    EventDraft::new(kinds::PACKAGE, 1_700_000_000, "{}").into_event(
      "creator".into(),
      id.into(),
      String::new(),
    )
  }

  fn ids(events: &[Event]) -> Vec<&str> { events.iter().map(|e| e.id.as_str()).collect() }

  const WAIT: Duration = Duration::from_secs(5);

  // ── Queries ─────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn query_collects_events_until_eose() {
    let (relay, server) = relay_with(|mut ws| async move {
      let sub = subscription(&mut ws).await;
      reply(&mut ws, json!(["EVENT", sub, event("e1")])).await;
      reply(&mut ws, json!(["EVENT", "someone-else", event("stray")])).await;
      reply(&mut ws, json!(["NOTICE", "slow down"])).await;
      reply(&mut ws, json!(["EVENT", sub, {"not": "an event"}])).await;
      reply(&mut ws, json!(["EVENT", sub, event("e2")])).await;
      reply(&mut ws, json!(["EOSE", sub])).await;
      assert_eq!(recv(&mut ws).await, vec![json!("CLOSE"), json!(sub)]);
    })
    .await;

    let events = relay.query(&Filter::new().kind(kinds::PACKAGE), WAIT).await.unwrap();
    assert_eq!(ids(&events), vec!["e1", "e2"]);
    server.await.unwrap();
  }

  #[tokio::test]
  async fn closed_subscription_ends_the_query() {
    let (relay, server) = relay_with(|mut ws| async move {
      let sub = subscription(&mut ws).await;
      reply(&mut ws, json!(["EVENT", sub, event("e1")])).await;
      reply(&mut ws, json!(["CLOSED", sub, "error: shutting down"])).await;
      let _ = ws.next().await;
    })
    .await;

    let events = relay.query(&Filter::new(), WAIT).await.unwrap();
    assert_eq!(ids(&events), vec!["e1"]);
    server.await.unwrap();
  }

  #[tokio::test]
  async fn dropped_connection_keeps_partial_results() {
    let (relay, server) = relay_with(|mut ws| async move {
      let sub = subscription(&mut ws).await;
      reply(&mut ws, json!(["EVENT", sub, event("e1")])).await;
      drop(ws);
    })
    .await;

    let events = relay.query(&Filter::new(), WAIT).await.unwrap();
    assert_eq!(ids(&events), vec!["e1"]);
    server.await.unwrap();
  }

  #[tokio::test]
  async fn deadline_returns_what_arrived() {
    let (relay, _server) = relay_with(|mut ws| async move {
      let sub = subscription(&mut ws).await;
      reply(&mut ws, json!(["EVENT", sub, event("e1")])).await;
      // Never send EOSE.
      std::future::pending::<()>().await;
    })
    .await;

    let started = Instant::now();
    let events = relay.query(&Filter::new(), Duration::from_millis(300)).await.unwrap();
    assert_eq!(ids(&events), vec!["e1"]);
    assert!(started.elapsed() < WAIT);
  }

  // ── Publishing ──────────────────────────────────────────────────────────

  #[tokio::test]
  async fn publish_waits_for_matching_ok() {
    let (relay, server) = relay_with(|mut ws| async move {
      let frame = recv(&mut ws).await;
      assert_eq!(frame[0], "EVENT");
      assert_eq!(frame[1]["id"], "e1");
      reply(&mut ws, json!(["OK", "other", false, "not this one"])).await;
      reply(&mut ws, json!(["OK", "e1", true, ""])).await;
    })
    .await;

    relay.publish(&event("e1"), WAIT).await.unwrap();
    server.await.unwrap();
  }

  #[tokio::test]
  async fn refused_event_is_rejected_with_reason() {
    let (relay, server) = relay_with(|mut ws| async move {
      recv(&mut ws).await;
      reply(&mut ws, json!(["OK", "e1", false, "blocked: spam"])).await;
    })
    .await;

    let err = relay.publish(&event("e1"), WAIT).await.unwrap_err();
    assert_eq!(
      err,
      RelayError::Rejected { url: relay.url().to_owned(), reason: "blocked: spam".into() }
    );
    server.await.unwrap();
  }

  #[tokio::test]
  async fn close_before_ok_is_a_protocol_error() {
    let (relay, server) = relay_with(|mut ws| async move {
      recv(&mut ws).await;
      ws.close(None).await.unwrap();
    })
    .await;

    let err = relay.publish(&event("e1"), WAIT).await.unwrap_err();
    assert!(matches!(err, RelayError::Protocol { .. }), "{err:?}");
    server.await.unwrap();
  }

  #[tokio::test]
  async fn unreachable_relay_fails_to_connect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let relay = WsRelay::new(format!("ws://{addr}"));
    let err = relay.ping(WAIT).await.unwrap_err();
    assert!(matches!(err, RelayError::Connect { .. }), "{err:?}");
  }
}
