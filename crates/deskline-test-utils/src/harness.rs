// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness: a migrated temp database plus the shared collaborators every
//! pipeline component needs.

use std::sync::Arc;

use deskline_bus::EventBus;
use deskline_config::DesklineConfig;
use deskline_core::{Agent, Customer, DesklineError, Ticket, TicketStatus};
use deskline_storage::queries::{agents, customers, tickets};
use deskline_storage::{Database, NewAgent, NewCustomer, NewTicket};

use crate::clock::{ManualClock, default_start};
use crate::mock_driver::MockDriver;

type ConfigEdit = Box<dyn FnOnce(&mut DesklineConfig) + Send>;

pub struct TestHarnessBuilder {
    edits: Vec<ConfigEdit>,
    driver: Option<Arc<MockDriver>>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            edits: Vec::new(),
            driver: None,
        }
    }

    /// Adjust the default configuration before anything is built.
    pub fn with_config(mut self, edit: impl FnOnce(&mut DesklineConfig) + Send + 'static) -> Self {
        self.edits.push(Box::new(edit));
        self
    }

    pub fn with_driver(mut self, driver: Arc<MockDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub async fn build(self) -> Result<TestHarness, DesklineError> {
        let temp_dir = tempfile::TempDir::new().map_err(|e| DesklineError::Storage {
            source: Box::new(e),
        })?;
        let db_path = temp_dir.path().join("test.db").to_string_lossy().to_string();

        let mut config = DesklineConfig::default();
        config.storage.database_path = db_path.clone();
        for edit in self.edits {
            edit(&mut config);
        }

        let db = Database::open_with(&db_path, config.storage.wal_mode).await?;

        Ok(TestHarness {
            db,
            config,
            bus: EventBus::default(),
            clock: Arc::new(ManualClock::at_default()),
            driver: self.driver.unwrap_or_default(),
            _temp_dir: temp_dir,
        })
    }
}

/// A complete test environment around a temp SQLite database.
pub struct TestHarness {
    pub db: Database,
    pub config: DesklineConfig,
    pub bus: EventBus,
    pub clock: Arc<ManualClock>,
    pub driver: Arc<MockDriver>,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    pub async fn new() -> Result<Self, DesklineError> {
        Self::builder().build().await
    }

    pub async fn customer(&self, phone: &str) -> Result<Customer, DesklineError> {
        customers::insert_customer(
            &self.db,
            NewCustomer {
                name: None,
                phone_number: phone.to_string(),
                channel_address: None,
            },
            default_start(),
        )
        .await
    }

    /// Customer reachable only through a channel address.
    pub async fn customer_with_address(
        &self,
        phone: &str,
        address: &str,
    ) -> Result<Customer, DesklineError> {
        customers::insert_customer(
            &self.db,
            NewCustomer {
                name: None,
                phone_number: phone.to_string(),
                channel_address: Some(address.to_string()),
            },
            default_start(),
        )
        .await
    }

    pub async fn agent(&self, user_id: i64, max_capacity: u32, online: bool) -> Result<Agent, DesklineError> {
        agents::insert_agent(
            &self.db,
            NewAgent {
                user_id,
                display_name: format!("agent-{user_id}"),
                max_capacity,
                is_online: online,
            },
        )
        .await
    }

    /// Open, unassigned ticket for `customer`, created at the clock's instant.
    pub async fn open_ticket(&self, customer: &Customer) -> Result<Ticket, DesklineError> {
        tickets::create_ticket(
            &self.db,
            NewTicket {
                customer_id: customer.id,
                assigned_agent_id: None,
                status: TicketStatus::Open,
                category: None,
            },
            deskline_core::Clock::now(self.clock.as_ref()),
        )
        .await
    }

    pub async fn ticket(&self, ticket: &Ticket) -> Result<Ticket, DesklineError> {
        tickets::get_ticket(&self.db, ticket.id)
            .await?
            .ok_or_else(|| DesklineError::not_found("ticket", ticket.id))
    }
}
