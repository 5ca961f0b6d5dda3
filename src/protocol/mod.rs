//! Agent wire protocol: JSON messages over HTTP POST, discriminated by `mtcommand`.

pub mod sender;
pub mod server;
pub mod types;

pub use sender::{local_play_response, CommandSender, HttpCommandSender, SendError};
pub use server::{EchoHandler, JsonHandler, JsonRequest, JsonServer};
pub use types::{
    envelope, ping_payload, MtCommand, PingInfo, Response, ResponseStatus, Timing, VerifyResult,
};
