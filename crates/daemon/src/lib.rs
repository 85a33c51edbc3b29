// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `tf-daemon` library: the IPC protocol, fan-out, configuration, and
//! background wiring shared between the `tfd` binary and any in-process
//! tests. The CLI depends on this crate for the `Request`/`Response`
//! vocabulary and wire codec only.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod classifier_client;
pub mod config;
pub mod fanout;
pub mod ingestor;
pub mod listener;
pub mod protocol;
pub mod protocol_wire;

pub use classifier_client::CliSmallLmClient;
pub use config::{Config, ConfigError};
pub use fanout::{Channel, Envelope, Fanout, MetricsSnapshot, Payload, Scope};
pub use listener::{ListenCtx, Listener};
pub use protocol::{Request, Response, StatusSnapshot};
pub use protocol_wire::{ProtocolError, DEFAULT_TIMEOUT, MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
