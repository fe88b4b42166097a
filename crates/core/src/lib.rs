//! Text command front door: parses slash commands and runs them against the
//! config store, the platform API and the grab task registry.

pub mod command;
pub mod router;

pub use command::{Command, CommandError};
pub use router::{describe_grab, CommandRouter, GRAB_MENU_TEXT, HELP_TEXT, REFRESH_SETTLE, REFRESH_SPACING};
