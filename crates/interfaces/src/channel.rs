use crate::traits::Responder;
use async_trait::async_trait;
use autodl_claw_memory::UserId;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub user_id: UserId,
    pub text: String,
}

/// Forwards notifications into a channel drained by a chat adapter.
#[derive(Clone)]
pub struct ChannelResponder {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelResponder {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Responder for ChannelResponder {
    async fn notify(&self, user_id: UserId, text: &str) {
        let notification = Notification {
            user_id,
            text: text.to_string(),
        };
        if self.tx.send(notification).is_err() {
            tracing::debug!("Dropped notification for user {}: receiver closed", user_id);
        }
    }
}
