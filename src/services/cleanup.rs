use std::sync::Arc;
use chrono::Utc;
use tracing::{debug, info};

use crate::AppState;

// Фоновая зачистка. Снимает истекшие PENDING-брони независимо от того,
// жив ли клиент, затем возвращает их слоты очереди и прибирает саму
// очередь (брошенные записи, просроченные промоушены).
pub struct CleanupService {
    state: Arc<AppState>,
}

impl CleanupService {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Один полный проход зачистки: брони -> слоты очереди -> очередь.
    /// Порядок важен: сначала истекают брони, чтобы освободившиеся
    /// слоты достались ожидающим в этом же проходе.
    pub fn run_sweep(&self) {
        let now = Utc::now();

        let expired = self.state.seats.sweep_expired(now);
        if expired.is_empty() {
            debug!("🧹 No expired reservations this pass");
        } else {
            for reservation in &expired {
                self.state.queue.release_session(reservation.reservation_id);
            }
            info!(
                "🎫 Expired {} reservations past the payment window",
                expired.len()
            );
        }

        let (purged, lapsed) = self.state.queue.sweep(now);
        if purged > 0 {
            info!("🧹 Purged {} abandoned queue entries", purged);
        }
        if lapsed > 0 {
            info!("🔑 Revoked {} promotions never exchanged for a booking", lapsed);
        }
    }
}
