use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::{Broker, BusMessage, BusStream};
use crate::error::HarnessError;

/// In-process broker with Redis-style `PSUBSCRIBE` glob matching.
#[derive(Clone, Debug, Default)]
pub struct MemoryBroker {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

#[derive(Debug)]
struct Subscriber {
    pattern: String,
    sender: mpsc::UnboundedSender<BusMessage>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Live subscriptions, dropped receivers excluded.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.sender.is_closed());
        subscribers.len()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<usize, HarnessError> {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.sender.is_closed());

        let receivers = subscribers
            .iter()
            .filter(|s| glob_match(s.pattern.as_bytes(), topic.as_bytes()))
            .filter(|s| {
                s.sender
                    .send(BusMessage {
                        topic: topic.to_owned(),
                        payload: payload.to_vec(),
                    })
                    .is_ok()
            })
            .count();

        Ok(receivers)
    }

    async fn psubscribe(&self, pattern: &str) -> Result<BusStream, HarnessError> {
        let (sender, receiver) = mpsc::unbounded_channel();

        self.subscribers.lock().push(Subscriber {
            pattern: pattern.to_owned(),
            sender,
        });

        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }
}

/// `*` matches any run of bytes, `?` exactly one.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == b'?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}
