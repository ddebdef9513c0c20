use serde::Deserialize;
use std::env;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub queue: QueueConfig,
    pub reservation: ReservationConfig,
    pub jwt: JwtConfig,
    pub sweeper: SweeperConfig,
    pub seed: SeedConfig,
    pub features: FeatureFlags,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

// Настройки очереди допуска
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    // Сколько клиентов события могут одновременно держать booking-слот
    // (если событие не переопределяет capacity в seed-файле).
    pub default_capacity: usize,
    // Сколько секунд PROMOTED-запись может не потреблять свой слот.
    // Должно быть не меньше TTL booking-токена.
    pub promotion_grace_secs: i64,
    // Сколько секунд WAITING-запись переживает разрыв соединения.
    pub disconnect_grace_secs: i64,
    // Требовать booking-токен на reserve; выключается для стендов,
    // которые нагружают движок блокировок напрямую.
    pub enforce_admission: bool,
}

// Настройки бронирования
#[derive(Debug, Clone, Deserialize)]
pub struct ReservationConfig {
    // Платежное окно: TTL замка и PENDING-брони.
    pub ttl_secs: i64,
    pub max_seats_per_request: usize,
    // Сколько секунд терминальная бронь остается читаемой по id.
    pub retention_secs: i64,
}

// Настройки JWT
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    // TTL короткоживущего booking-токена.
    pub booking_ttl_secs: i64,
}

// Настройки фонового чистильщика
#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    pub interval_secs: u64,
}

// Откуда грузить каталог событий и карту мест
#[derive(Debug, Clone, Deserialize)]
pub struct SeedConfig {
    pub file: String,
}

// Feature flags для включения/выключения функциональности
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFlags {
    pub enable_analytics: bool,
    pub enable_test_api: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env::var("PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()
                    .expect("PORT must be a valid number"),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "ticket_gate=debug,tower_http=debug".to_string()),
            },
            queue: QueueConfig {
                default_capacity: env::var("QUEUE_DEFAULT_CAPACITY")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()
                    .expect("QUEUE_DEFAULT_CAPACITY must be a valid number"),
                promotion_grace_secs: env::var("QUEUE_PROMOTION_GRACE_SECS")
                    .unwrap_or_else(|_| "330".to_string())
                    .parse()
                    .expect("QUEUE_PROMOTION_GRACE_SECS must be a valid number"),
                disconnect_grace_secs: env::var("QUEUE_DISCONNECT_GRACE_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .expect("QUEUE_DISCONNECT_GRACE_SECS must be a valid number"),
                enforce_admission: env::var("QUEUE_ENFORCE_ADMISSION")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()
                    .expect("QUEUE_ENFORCE_ADMISSION must be true or false"),
            },
            reservation: ReservationConfig {
                ttl_secs: env::var("RESERVATION_TTL_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .expect("RESERVATION_TTL_SECS must be a valid number"),
                max_seats_per_request: env::var("RESERVATION_MAX_SEATS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .expect("RESERVATION_MAX_SEATS must be a valid number"),
                retention_secs: env::var("RESERVATION_RETENTION_SECS")
                    .unwrap_or_else(|_| "3600".to_string())
                    .parse()
                    .expect("RESERVATION_RETENTION_SECS must be a valid number"),
            },
            jwt: JwtConfig {
                secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
                booking_ttl_secs: env::var("BOOKING_TOKEN_TTL_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .expect("BOOKING_TOKEN_TTL_SECS must be a valid number"),
            },
            sweeper: SweeperConfig {
                interval_secs: env::var("SWEEPER_INTERVAL_SECS")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()
                    .expect("SWEEPER_INTERVAL_SECS must be a valid number"),
            },
            seed: SeedConfig {
                file: env::var("SEED_FILE").unwrap_or_else(|_| "seed.json".to_string()),
            },
            features: FeatureFlags {
                enable_analytics: env::var("ENABLE_ANALYTICS")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()
                    .expect("ENABLE_ANALYTICS must be true or false"),
                enable_test_api: env::var("ENABLE_TEST_API")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .expect("ENABLE_TEST_API must be true or false"),
            },
        }
    }
}
