use std::cmp::Ordering;

use serde::Serialize;
use tokio::sync::watch;

use crate::{geo::Position, models::SpotRecord};

/// A spot together with its distance from the querying position.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbySpot {
    pub spot: SpotRecord,
    pub distance_m: f64,
}

/// Read side of the live active-spot snapshot.
#[derive(Clone)]
pub struct SpotBoard {
    active: watch::Receiver<Vec<SpotRecord>>,
}

impl SpotBoard {
    pub fn new(active: watch::Receiver<Vec<SpotRecord>>) -> Self {
        Self { active }
    }

    pub fn spots(&self) -> Vec<SpotRecord> {
        self.active.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.active.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find(&self, spot_id: &str) -> Option<SpotRecord> {
        self.active
            .borrow()
            .iter()
            .find(|spot| spot.id == spot_id)
            .cloned()
    }

    /// Active spots within `radius_m` of `position`, nearest first.
    pub fn nearby(&self, position: &Position, radius_m: f64) -> Vec<NearbySpot> {
        if !position.is_valid() {
            return Vec::new();
        }
        let mut nearby: Vec<NearbySpot> = self
            .active
            .borrow()
            .iter()
            .filter_map(|spot| {
                let distance_m = position.distance_to(&spot.location);
                (distance_m <= radius_m).then(|| NearbySpot {
                    spot: spot.clone(),
                    distance_m,
                })
            })
            .collect();
        nearby.sort_by(|a, b| {
            a.distance_m
                .partial_cmp(&b.distance_m)
                .unwrap_or(Ordering::Equal)
        });
        nearby
    }

    /// Waits for the next published snapshot. Returns `false` once the
    /// publishing side is gone.
    pub async fn changed(&mut self) -> bool {
        self.active.changed().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::UserIdentity;

    fn spot(id: &str, latitude: f64, longitude: f64) -> SpotRecord {
        SpotRecord::reported_at(
            id,
            Position::new(latitude, longitude),
            &UserIdentity::anonymous_reporter(),
            Utc::now(),
        )
    }

    #[test]
    fn nearby_is_filtered_and_sorted_by_distance() {
        let (_tx, rx) = watch::channel(vec![
            spot("far", -25.99, 28.10),
            spot("near", -25.9501, 28.10),
            spot("mid", -25.952, 28.10),
        ]);
        let board = SpotBoard::new(rx);

        let ids: Vec<_> = board
            .nearby(&Position::new(-25.95, 28.10), 500.0)
            .into_iter()
            .map(|nearby| nearby.spot.id)
            .collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert!(board.nearby(&Position::new(f64::NAN, 0.0), 500.0).is_empty());
    }

    #[tokio::test]
    async fn follows_published_snapshots() {
        let (tx, rx) = watch::channel(vec![spot("a", 0.0, 0.0)]);
        let mut board = SpotBoard::new(rx);
        assert!(board.find("a").is_some());

        tx.send_replace(vec![spot("b", 1.0, 1.0)]);
        assert!(board.changed().await);
        assert!(board.find("a").is_none());
        assert_eq!(board.len(), 1);

        drop(tx);
        assert!(!board.changed().await);
    }
}
