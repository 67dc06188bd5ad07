// SPDX-FileCopyrightText: 2026 Relaybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test doubles and the end-to-end harness for the relaybot bridge.

pub mod harness;
pub mod mock_telegram;
pub mod scripted_adapter;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_telegram::{MockTelegram, RecordedCall};
pub use scripted_adapter::{RecordedRun, ScriptedAdapter, ScriptedTurn};
