//! Parsing of the slash commands users send to the bot.

use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0}. Send /help for the list of commands.")]
    UnknownCommand(String),
    #[error("Missing argument. Usage: {usage}")]
    MissingArgument { usage: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    SetUser(String),
    SetPassword(String),
    GpuValid,
    Instances,
    Start(String),
    StartCpu(String),
    Stop(String),
    Refresh(String),
    RefreshAll,
    GetUser,
    Balance,
    GrabMenu,
    GrabGpu(String),
    GrabUuid(String),
    StopGrab,
    GrabStatus,
}

impl Command {
    /// True when `line` is addressed to the command router at all.
    pub fn is_command(line: &str) -> bool {
        line.trim_start().starts_with('/')
    }
}

fn required(argument: &str, usage: &'static str) -> Result<String, CommandError> {
    if argument.is_empty() {
        Err(CommandError::MissingArgument { usage })
    } else {
        Ok(argument.to_string())
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (name, argument) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };

        match name {
            "/help" => Ok(Command::Help),
            "/user" => required(argument, "/user <username>").map(Command::SetUser),
            "/password" => required(argument, "/password <password>").map(Command::SetPassword),
            "/gpuvalid" => Ok(Command::GpuValid),
            "/instances" => Ok(Command::Instances),
            "/start" => required(argument, "/start <uuid>").map(Command::Start),
            "/startcpu" => required(argument, "/startcpu <uuid>").map(Command::StartCpu),
            "/stop" => required(argument, "/stop <uuid>").map(Command::Stop),
            "/refresh" => required(argument, "/refresh <uuid>").map(Command::Refresh),
            "/refreshall" => Ok(Command::RefreshAll),
            "/getuser" => Ok(Command::GetUser),
            "/balance" => Ok(Command::Balance),
            "/grabmenu" => Ok(Command::GrabMenu),
            "/grabgpu" => required(argument, "/grabgpu <gpu_type>").map(Command::GrabGpu),
            "/grabuuid" => required(argument, "/grabuuid <uuid>").map(Command::GrabUuid),
            "/stopgrab" => Ok(Command::StopGrab),
            "/grabstatus" => Ok(Command::GrabStatus),
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }
}
