// SPDX-License-Identifier: MIT

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! relay-chat: the chat surface of the bridge.
//!
//! The command handler turns pre-parsed chat updates into a list of
//! [`Action`]s (the transport executes them), and the run streamer
//! coalesces the normalized event stream into throttled progress edits
//! on a single chat message.

pub mod dashboard;
pub mod handler;
pub mod streamer;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod transport;

pub use handler::{ChatCommandHandler, HandlerConfig};
pub use streamer::{RunStreamer, StreamerConfig};
pub use transport::{
    Action, Button, CallbackQuery, ChatKind, ChatRef, ChatUpdate, IncomingMessage, Keyboard,
    MessageTransport, TransportError, UserRef,
};
