// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Deskline delivery pipeline.
//!
//! One `tokio-rusqlite` connection serializes every statement on a background
//! thread. Concurrency-sensitive writes are single conditional `UPDATE`s whose
//! affected-row count decides who won, so callers never need a wider
//! transaction.

pub mod convert;
pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

pub use database::{Database, map_tr_err};
pub use models::*;
