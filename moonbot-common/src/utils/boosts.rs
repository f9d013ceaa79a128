use std::collections::HashSet;
use std::time::Duration;

use mongodb::Database;
use serde::{Deserialize, Serialize};

use super::store::PersistentCachedStore;
use super::sui::CoinType;

/// Purchasable boost lengths with their price in SUI.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoostDuration {
    FourHours,
    EightHours,
    TwelveHours,
    OneDay,
    TwoDays,
    ThreeDays,
    OneWeek,
}

impl BoostDuration {
    pub const ALL: [BoostDuration; 7] = [
        BoostDuration::FourHours,
        BoostDuration::EightHours,
        BoostDuration::TwelveHours,
        BoostDuration::OneDay,
        BoostDuration::TwoDays,
        BoostDuration::ThreeDays,
        BoostDuration::OneWeek,
    ];

    pub fn duration(&self) -> Duration {
        Duration::from_secs(match self {
            BoostDuration::FourHours => 4 * 3600,
            BoostDuration::EightHours => 8 * 3600,
            BoostDuration::TwelveHours => 12 * 3600,
            BoostDuration::OneDay => 24 * 3600,
            BoostDuration::TwoDays => 48 * 3600,
            BoostDuration::ThreeDays => 72 * 3600,
            BoostDuration::OneWeek => 7 * 24 * 3600,
        })
    }

    pub fn price_sui(&self) -> f64 {
        match self {
            BoostDuration::FourHours => 15.0,
            BoostDuration::EightHours => 20.0,
            BoostDuration::TwelveHours => 27.0,
            BoostDuration::OneDay => 45.0,
            BoostDuration::TwoDays => 80.0,
            BoostDuration::ThreeDays => 110.0,
            BoostDuration::OneWeek => 180.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BoostDuration::FourHours => "4 hours",
            BoostDuration::EightHours => "8 hours",
            BoostDuration::TwelveHours => "12 hours",
            BoostDuration::OneDay => "24 hours",
            BoostDuration::TwoDays => "48 hours",
            BoostDuration::ThreeDays => "72 hours",
            BoostDuration::OneWeek => "1 week",
        }
    }
}

/// A paid visibility upgrade. Expiry is checked at read time, rows are
/// never deleted.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Boost {
    pub expires_at: u64,
}

impl Boost {
    pub fn is_active(&self, now: u64) -> bool {
        self.expires_at > now
    }
}

/// An extension counts from the current expiry if that is still in the
/// future, so re-boosting never shortens paid-for time.
fn next_expiry(current: Option<&Boost>, length: Duration, now: u64) -> u64 {
    let base = match current {
        Some(boost) if boost.is_active(now) => boost.expires_at,
        _ => now,
    };
    base + length.as_secs()
}

/// Active boosts plus the payment digests that funded them. Shared between
/// the boost module (writes) and the buybot (trending gate, leaderboard).
pub struct Boosts {
    active: PersistentCachedStore<CoinType, Boost>,
    claimed_txs: PersistentCachedStore<String, CoinType>,
}

impl Boosts {
    pub async fn new(db: Database) -> Result<Self, anyhow::Error> {
        Ok(Self {
            active: PersistentCachedStore::new(db.clone(), "boosts").await?,
            claimed_txs: PersistentCachedStore::new(db, "boost_txs").await?,
        })
    }

    pub async fn is_boosted(&self, coin: &CoinType, now: u64) -> bool {
        self.active
            .get(coin)
            .await
            .is_some_and(|boost| boost.is_active(now))
    }

    /// Claims a payment digest before verification, so the same transaction
    /// can never fund two boosts. Returns false if it was already used.
    pub async fn claim_tx(&self, digest: String, coin: CoinType) -> Result<bool, anyhow::Error> {
        self.claimed_txs.insert_if_not_exists(digest, coin).await
    }

    /// Releases a claimed digest after a failed verification, so the user
    /// can retry with the corrected hash.
    pub async fn release_tx(&self, digest: &str) -> Result<(), anyhow::Error> {
        self.claimed_txs.remove(&digest.to_string()).await?;
        Ok(())
    }

    /// Activates or extends a boost. Returns the new expiry.
    pub async fn activate(
        &self,
        coin: CoinType,
        length: Duration,
        now: u64,
    ) -> Result<u64, anyhow::Error> {
        let expires_at = next_expiry(self.active.get(&coin).await.as_ref(), length, now);
        self.active
            .insert_or_update(coin, Boost { expires_at })
            .await?;
        Ok(expires_at)
    }

    pub async fn active_coins(&self, now: u64) -> Result<HashSet<CoinType>, anyhow::Error> {
        Ok(self
            .active
            .values()
            .await?
            .filter(|entry| entry.value().is_active(now))
            .map(|entry| entry.key().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boost_expiry_is_exclusive() {
        let boost = Boost { expires_at: 1000 };
        assert!(boost.is_active(999));
        assert!(!boost.is_active(1000));
        assert!(!boost.is_active(2000));
    }

    #[test]
    fn extension_counts_from_the_later_of_now_and_current_expiry() {
        let hour = Duration::from_secs(3600);
        assert_eq!(next_expiry(None, hour, 1000), 4600);
        // Still active: stack on top of the current expiry
        let active = Boost { expires_at: 5000 };
        assert_eq!(next_expiry(Some(&active), hour, 1000), 8600);
        // Already expired: counts from now
        let expired = Boost { expires_at: 500 };
        assert_eq!(next_expiry(Some(&expired), hour, 1000), 4600);
    }

    #[test]
    fn duration_table() {
        assert_eq!(
            BoostDuration::FourHours.duration(),
            Duration::from_secs(14400)
        );
        assert_eq!(BoostDuration::FourHours.price_sui(), 15.0);
        assert_eq!(
            BoostDuration::OneWeek.duration(),
            Duration::from_secs(604800)
        );
        assert_eq!(BoostDuration::OneWeek.price_sui(), 180.0);
        // Longer boosts are never cheaper.
        for pair in BoostDuration::ALL.windows(2) {
            assert!(pair[0].price_sui() < pair[1].price_sui());
            assert!(pair[0].duration() < pair[1].duration());
        }
    }
}
