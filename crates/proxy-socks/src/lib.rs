pub mod reply;
pub mod wire;

pub use reply::ReplyCode;
pub use wire::{Command, DecodeError, DecodeResult, Decoded, Greeting, Request};
