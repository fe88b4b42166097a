use async_trait::async_trait;
use autodl_claw_memory::UserId;

/// Delivers an asynchronous text reply to a user.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn notify(&self, user_id: UserId, text: &str);
}

/// Line-oriented chat front-end.
#[async_trait]
pub trait Interface: Send + Sync {
    async fn receive_input(&self) -> Option<String>;
    async fn send_output(&self, message: &str);
}
