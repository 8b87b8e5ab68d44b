// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod auth;
pub mod handler;
pub mod pairing;

pub use auth::{PeerAllowlist, PeerRole};
pub use handler::P2pControlNode;
pub use pairing::PairingUri;
