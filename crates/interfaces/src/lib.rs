pub mod channel;
pub mod terminal;
pub mod traits;

pub use channel::{ChannelResponder, Notification};
pub use terminal::TerminalInterface;
pub use traits::{Interface, Responder};
