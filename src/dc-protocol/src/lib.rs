// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! JSON line protocol spoken between network commanders and dc-server.
//!
//! Requests arrive as [`ClientEnvelope`] lines; the server answers each with
//! a [`ClientResponse`] and interleaves [`Notification`] lines carrying the
//! commander callbacks.

pub mod auth;
pub mod codec;
pub mod mapping;
pub mod types;

pub use auth::{AuthError, SimpleTokenValidator, TokenValidator};
pub use codec::{encode_line, parse_envelope};
pub use mapping::{command_set_from_client, parse_take_action};
pub use types::{ClientCommand, ClientEnvelope, ClientResponse, DeviceInfo, Notification};
