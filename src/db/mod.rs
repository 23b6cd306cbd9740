mod connection;
mod helpers;
mod migrations;
mod repositories;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;

pub use connection::Database;

use crate::{
    models::{FraudReport, SpotRecord},
    store::{SpotCounter, SpotStore, SpotUpdate},
};

#[async_trait]
impl SpotStore for Database {
    fn subscribe_active(&self) -> watch::Receiver<Vec<SpotRecord>> {
        self.active_spots_receiver()
    }

    async fn fetch_spot(&self, spot_id: &str) -> Result<Option<SpotRecord>> {
        self.get_spot(spot_id).await
    }

    async fn update_spot(&self, spot_id: &str, update: SpotUpdate) -> Result<()> {
        self.update_spot_fields(spot_id, update).await
    }

    async fn increment(&self, spot_id: &str, counter: SpotCounter, by: i64) -> Result<()> {
        self.increment_counter(spot_id, counter, by).await
    }

    async fn append_fraud_report(&self, report: &FraudReport) -> Result<String> {
        self.insert_fraud_report(report).await
    }
}
