//! Serialized request/response exchanges over one secure channel.
//!
//! Every request is sent Confirmable and retransmitted with the RFC 7252
//! exponential back-off until it is acknowledged. The channel sits behind a
//! mutex so concurrent callers take turns; only one request is outstanding
//! at any time.

use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, trace};

use super::code::MessageType;
use super::message::Message;
use super::request::{Request, Response};
use crate::core::{
    ACK_RANDOM_FACTOR, ACK_TIMEOUT, DEFAULT_EXCHANGE_TIMEOUT, GatewayError, MAX_RETRANSMIT,
    RecordChannel, Result, TOKEN_LENGTH,
};
use crate::transport::SecureChannel;

/// Timing parameters for one exchange.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Upper bound for a complete exchange, retransmissions included.
    pub exchange_timeout: Duration,
    /// Initial acknowledgement timeout.
    pub ack_timeout: Duration,
    /// Upper bound of the random factor applied to `ack_timeout`.
    pub ack_random_factor: f64,
    /// Retransmissions before waiting passively for the deadline.
    pub max_retransmit: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
            ack_timeout: ACK_TIMEOUT,
            ack_random_factor: ACK_RANDOM_FACTOR,
            max_retransmit: MAX_RETRANSMIT,
        }
    }
}

impl ExchangeConfig {
    /// Initial retransmission timeout, randomized in
    /// `[ack_timeout, ack_timeout * ack_random_factor)`.
    fn initial_timeout(&self) -> Duration {
        if self.ack_random_factor > 1.0 {
            let factor = rand::thread_rng().gen_range(1.0..self.ack_random_factor);
            self.ack_timeout.mul_f64(factor)
        } else {
            self.ack_timeout
        }
    }
}

/// CoAP exchange engine bound to one channel.
pub struct Exchange<C = SecureChannel> {
    channel: Mutex<C>,
    config: ExchangeConfig,
    next_message_id: AtomicU16,
}

impl<C: RecordChannel> Exchange<C> {
    /// Take ownership of an open channel.
    pub fn new(channel: C, config: ExchangeConfig) -> Self {
        Self {
            channel: Mutex::new(channel),
            config,
            next_message_id: AtomicU16::new(rand::random()),
        }
    }

    /// Get the exchange configuration.
    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Send `request` and wait for its response.
    ///
    /// Any well-formed response is returned whatever its code; judging the
    /// code is the caller's business.
    pub async fn exchange(&self, request: Request) -> Result<Response> {
        let mut channel = self.channel.lock().await;

        let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        let token: [u8; TOKEN_LENGTH] = rand::random();
        let wire = request.to_message(message_id, &token).encode()?;

        debug!(
            method = %request.method,
            path = %request.path,
            message_id,
            bytes = wire.len(),
            "sending request"
        );

        let deadline = Instant::now() + self.config.exchange_timeout;
        let response = timeout_at(
            deadline,
            self.transact(&mut *channel, &wire, message_id, &token),
        )
        .await
        .map_err(|_| GatewayError::Timeout {
            operation: "exchange",
            after: self.config.exchange_timeout,
        })??;

        debug!(path = %request.path, code = %response.code, "received response");
        Ok(response)
    }

    /// Close the underlying channel.
    pub async fn close(&self) {
        self.channel.lock().await.close().await;
    }

    /// Give back the channel.
    pub fn into_channel(self) -> C {
        self.channel.into_inner()
    }

    async fn transact(
        &self,
        channel: &mut C,
        wire: &[u8],
        message_id: u16,
        token: &[u8],
    ) -> Result<Response> {
        channel.send(wire).await?;

        let mut wait = self.config.initial_timeout();
        let mut retransmits = 0u32;
        let mut acknowledged = false;

        loop {
            let record = if acknowledged || retransmits >= self.config.max_retransmit {
                channel.recv().await?
            } else {
                match timeout(wait, channel.recv()).await {
                    Ok(record) => record?,
                    Err(_) => {
                        retransmits += 1;
                        wait *= 2;
                        debug!(message_id, attempt = retransmits, "retransmitting request");
                        channel.send(wire).await?;
                        continue;
                    }
                }
            };

            let message = Message::decode(&record)?;

            match message.message_type {
                MessageType::Reset if message.message_id == message_id => {
                    return Err(GatewayError::Protocol(format!(
                        "request {message_id} was reset by the gateway"
                    )));
                }
                MessageType::Acknowledgement if message.message_id == message_id => {
                    if message.is_empty() {
                        trace!(message_id, "request acknowledged, awaiting separate response");
                        acknowledged = true;
                        continue;
                    }
                    if message.token != token {
                        return Err(GatewayError::Protocol(format!(
                            "token mismatch on acknowledgement of request {message_id}"
                        )));
                    }
                    return Response::from_message(&message);
                }
                MessageType::Confirmable | MessageType::NonConfirmable
                    if !message.is_empty() && message.token == token =>
                {
                    if message.message_type == MessageType::Confirmable {
                        channel
                            .send(&Message::empty_ack(message.message_id).encode()?)
                            .await?;
                    }
                    return Response::from_message(&message);
                }
                _ => {
                    trace!(
                        message_id = message.message_id,
                        "ignoring unrelated message"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use super::*;
    use crate::coap::code::{MessageCode, ResponseCode};
    use crate::core::{APPLICATION_JSON, ErrorKind};

    type Script = Box<dyn FnMut(&Message) -> Vec<Message> + Send>;

    /// In-memory channel answering each sent request through a script.
    struct ScriptedChannel {
        script: Script,
        inbound: VecDeque<Vec<u8>>,
        sent: Arc<std::sync::Mutex<Vec<Message>>>,
        closed: bool,
    }

    impl ScriptedChannel {
        fn new(script: impl FnMut(&Message) -> Vec<Message> + Send + 'static) -> Self {
            Self {
                script: Box::new(script),
                inbound: VecDeque::new(),
                sent: Arc::new(std::sync::Mutex::new(Vec::new())),
                closed: false,
            }
        }
    }

    impl RecordChannel for ScriptedChannel {
        async fn send(&mut self, record: &[u8]) -> Result<()> {
            let message = Message::decode(record)?;
            for reply in (self.script)(&message) {
                self.inbound.push_back(reply.encode()?);
            }
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Result<Vec<u8>> {
            match self.inbound.pop_front() {
                Some(record) => Ok(record),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }

    fn fast_config() -> ExchangeConfig {
        ExchangeConfig {
            exchange_timeout: Duration::from_millis(500),
            ack_timeout: Duration::from_millis(20),
            ack_random_factor: 1.0,
            max_retransmit: 2,
        }
    }

    fn piggybacked(request: &Message, code: ResponseCode, body: &[u8]) -> Message {
        Response::new(code)
            .content_format(APPLICATION_JSON)
            .payload(body.to_vec())
            .to_message(MessageType::Acknowledgement, request.message_id, &request.token)
    }

    #[tokio::test]
    async fn test_piggybacked_response() {
        let channel = ScriptedChannel::new(|req| {
            if req.uri_path() == "/aminfo" {
                vec![piggybacked(req, ResponseCode::Content, b"{}")]
            } else {
                vec![]
            }
        });
        let exchange = Exchange::new(channel, fast_config());

        let response = exchange.exchange(Request::get("/aminfo")).await.unwrap();
        assert_eq!(response.code, ResponseCode::Content);
        assert_eq!(response.content_format, Some(APPLICATION_JSON));
        assert_eq!(response.payload, b"{}");
    }

    #[tokio::test]
    async fn test_non_success_code_is_returned() {
        let channel =
            ScriptedChannel::new(|req| vec![piggybacked(req, ResponseCode::BadGateway, b"")]);
        let exchange = Exchange::new(channel, fast_config());

        let response = exchange.exchange(Request::post("/authenticate")).await.unwrap();
        assert_eq!(response.code, ResponseCode::BadGateway);
    }

    #[tokio::test]
    async fn test_separate_response_is_acknowledged() {
        let channel = ScriptedChannel::new(|req| {
            if req.is_empty() {
                return vec![];
            }
            let separate = Response::new(ResponseCode::Changed).to_message(
                MessageType::Confirmable,
                0x7777,
                &req.token,
            );
            vec![Message::empty_ack(req.message_id), separate]
        });
        let sent = Arc::clone(&channel.sent);
        let exchange = Exchange::new(channel, fast_config());

        let response = exchange.exchange(Request::post("/accesstoken")).await.unwrap();
        assert_eq!(response.code, ResponseCode::Changed);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].message_type, MessageType::Acknowledgement);
        assert_eq!(sent[1].message_id, 0x7777);
    }

    #[tokio::test]
    async fn test_retransmits_until_answered() {
        let mut seen = 0;
        let channel = ScriptedChannel::new(move |req| {
            seen += 1;
            if seen < 3 {
                vec![]
            } else {
                vec![piggybacked(req, ResponseCode::Valid, b"{}")]
            }
        });
        let sent = Arc::clone(&channel.sent);
        let exchange = Exchange::new(channel, fast_config());

        let response = exchange.exchange(Request::post("/authenticate")).await.unwrap();
        assert_eq!(response.code, ResponseCode::Valid);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|m| m.message_id == sent[0].message_id));
        assert!(sent.iter().all(|m| m.token == sent[0].token));
    }

    #[tokio::test]
    async fn test_timeout_without_answer() {
        let channel = ScriptedChannel::new(|_| vec![]);
        let sent = Arc::clone(&channel.sent);
        let exchange = Exchange::new(channel, fast_config());

        let err = exchange.exchange(Request::get("/aminfo")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        // initial send plus max_retransmit
        assert_eq!(sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_reset_is_protocol_error() {
        let channel = ScriptedChannel::new(|req| vec![Message::reset(req.message_id)]);
        let exchange = Exchange::new(channel, fast_config());

        let err = exchange.exchange(Request::get("/aminfo")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_token_mismatch_is_protocol_error() {
        let channel = ScriptedChannel::new(|req| {
            let mut reply = piggybacked(req, ResponseCode::Content, b"{}");
            reply.token = vec![0xDE, 0xAD];
            vec![reply]
        });
        let exchange = Exchange::new(channel, fast_config());

        let err = exchange.exchange(Request::get("/aminfo")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_stray_messages_are_ignored() {
        let channel = ScriptedChannel::new(|req| {
            let stale = Response::new(ResponseCode::Content).to_message(
                MessageType::Acknowledgement,
                req.message_id.wrapping_sub(1),
                &[9, 9, 9, 9],
            );
            vec![stale, piggybacked(req, ResponseCode::Content, b"{}")]
        });
        let exchange = Exchange::new(channel, fast_config());

        let response = exchange.exchange(Request::get("/aminfo")).await.unwrap();
        assert_eq!(response.code, ResponseCode::Content);
    }

    #[tokio::test]
    async fn test_message_ids_advance() {
        let channel = ScriptedChannel::new(|req| vec![piggybacked(req, ResponseCode::Content, b"")]);
        let sent = Arc::clone(&channel.sent);
        let exchange = Exchange::new(channel, fast_config());

        exchange.exchange(Request::get("/a")).await.unwrap();
        exchange.exchange(Request::get("/b")).await.unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent[1].message_id, sent[0].message_id.wrapping_add(1));
        assert_ne!(sent[0].code, MessageCode::Empty);
    }

    #[tokio::test]
    async fn test_close_reaches_channel() {
        let exchange = Exchange::new(ScriptedChannel::new(|_| vec![]), fast_config());
        exchange.close().await;
        assert!(exchange.into_channel().closed);
    }
}
