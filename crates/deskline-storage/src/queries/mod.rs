// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules, one per table.

pub mod agents;
pub mod customers;
pub mod delay_events;
pub mod kpi;
pub mod messages;
pub mod tickets;
