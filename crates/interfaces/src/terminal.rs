use crate::traits::{Interface, Responder};
use async_trait::async_trait;
use autodl_claw_memory::UserId;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin};
use tokio::sync::Mutex;

/// Stdin/stdout session acting as a single chat user.
pub struct TerminalInterface {
    user_id: UserId,
    reader: Mutex<BufReader<Stdin>>,
}

impl TerminalInterface {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            reader: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

#[async_trait]
impl Interface for TerminalInterface {
    async fn receive_input(&self) -> Option<String> {
        let mut reader = self.reader.lock().await;
        let mut line = String::new();

        match reader.read_line(&mut line).await {
            Ok(0) => None, // EOF
            Ok(_) => Some(line.trim().to_string()),
            Err(_) => None,
        }
    }

    async fn send_output(&self, message: &str) {
        let mut stdout = tokio::io::stdout();
        let _ = stdout.write_all(message.as_bytes()).await;
        let _ = stdout.write_all(b"\n").await;
        let _ = stdout.flush().await;
    }
}

#[async_trait]
impl Responder for TerminalInterface {
    async fn notify(&self, user_id: UserId, text: &str) {
        if user_id == self.user_id {
            self.send_output(text).await;
        } else {
            // Resumed tasks of other users have no live session here.
            self.send_output(&format!("[user {}] {}", user_id, text))
                .await;
        }
    }
}
