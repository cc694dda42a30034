use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::waitlist::WaitlistService;
use super::BookingContext;
use crate::error::AppError;

const SWEEP_BATCH: i64 = 100;

/// Фоновый обход просроченных офферов.
///
/// Клиент может так и не прислать timeout (закрыл вкладку), поэтому
/// истёкшие офферы переводятся дальше по автомату здесь.
pub struct OfferSweeper {
    ctx: Arc<BookingContext>,
    waitlist: WaitlistService,
    interval: Duration,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub lapsed: usize,
    pub reoffered: usize,
    pub freed: usize,
    pub failed: usize,
}

impl OfferSweeper {
    pub fn new(ctx: Arc<BookingContext>) -> Self {
        let interval = Duration::from_millis(ctx.waitlist_config.sweep_interval_ms.max(100));
        Self {
            waitlist: WaitlistService::new(ctx.clone()),
            ctx,
            interval,
        }
    }

    pub async fn run(self) {
        info!(interval_ms = self.interval.as_millis() as u64, "⏰ offer sweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let stats = self.sweep_once().await;
            if stats.lapsed > 0 {
                info!(
                    lapsed = stats.lapsed,
                    reoffered = stats.reoffered,
                    freed = stats.freed,
                    failed = stats.failed,
                    "⏰ lapsed waitlist offers processed"
                );
            }
        }
    }

    pub async fn sweep_once(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let lapsed = match self.ctx.store.lapsed_offers(self.ctx.now(), SWEEP_BATCH).await {
            Ok(lapsed) => lapsed,
            Err(e) => {
                error!(error = %e, "failed to list lapsed offers");
                return stats;
            }
        };

        for (event_id, user_id) in lapsed {
            match self.waitlist.expire(user_id, event_id).await {
                Ok(release) => {
                    stats.lapsed += 1;
                    stats.reoffered += release.handoff.offers.len();
                    stats.freed += release.handoff.released.len();
                }
                // Пользователь успел подтвердить или выйти между выборкой и обработкой
                Err(AppError::Conflict { .. }) | Err(AppError::NotFound(_)) => {
                    debug!(%event_id, %user_id, "offer already settled");
                }
                Err(e) => {
                    stats.failed += 1;
                    error!(%event_id, %user_id, error = %e, "failed to expire offer");
                }
            }
        }
        stats
    }
}
