pub mod config;
pub mod controllers;
pub mod error;
pub mod middleware;
pub mod models;
pub mod seed;
pub mod services;

use std::sync::Arc;

use services::queue::QueueService;
use services::seats::SeatLockService;
use services::tokens::TokenService;

// Shared state для всего приложения. Никакой внешней базы: владельцы
// состояния — сами сервисы, по хранилищу на событие.
pub struct AppState {
    pub config: config::Config,
    pub catalog: seed::SeedCatalog,
    pub seats: SeatLockService,
    pub queue: QueueService,
    pub tokens: TokenService,
}

impl AppState {
    pub fn new(config: config::Config, catalog: seed::SeedCatalog) -> Arc<Self> {
        let seats = SeatLockService::new(
            config.reservation.ttl_secs,
            config.reservation.retention_secs,
        );
        let queue = QueueService::new(
            config.queue.promotion_grace_secs,
            config.queue.disconnect_grace_secs,
        );
        let tokens = TokenService::new(&config.jwt.secret, config.jwt.booking_ttl_secs);

        let state = Arc::new(Self {
            config,
            catalog,
            seats,
            queue,
            tokens,
        });
        seed::apply_catalog(&state);
        state
    }
}
