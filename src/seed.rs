//! seed.rs
//!
//! Каталог событий и карта мест из seed-файла.
//!
//! Движок не управляет каталогом — события и разбивка на ярусы приходят
//! одним JSON-файлом при старте. /api/reset прогоняет ту же регистрацию
//! повторно и тем самым возвращает каждое событие к посеянному виду.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use tracing::info;

use crate::models::{Seat, SeatStatus};
use crate::AppState;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedCatalog {
    pub events: Vec<EventSeed>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSeed {
    pub id: String,
    pub title: String,
    // Если не задано, берется queue.default_capacity из конфига.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    pub tiers: Vec<TierSeed>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSeed {
    pub category: String,
    pub rows: Vec<String>,
    pub seats_per_row: u32,
    pub price: f64,
}

impl EventSeed {
    /// Разворачивает ярусы в плоскую карту мест. Идентификатор места —
    /// "{категория}-{ряд}{номер}", например "VIP-A12".
    pub fn build_seats(&self) -> Vec<Seat> {
        let mut seats = Vec::new();
        for tier in &self.tiers {
            for row in &tier.rows {
                for number in 1..=tier.seats_per_row {
                    seats.push(Seat {
                        id: format!("{}-{}{}", tier.category, row, number),
                        event_id: self.id.clone(),
                        row: row.clone(),
                        number: number as i32,
                        category: tier.category.clone(),
                        price: tier.price,
                        status: SeatStatus::Available,
                    });
                }
            }
        }
        seats
    }
}

pub fn load_catalog(path: &str) -> anyhow::Result<SeedCatalog> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("не удалось прочитать seed-файл {}", path))?;
    let catalog: SeedCatalog =
        serde_json::from_str(&raw).with_context(|| format!("не удалось разобрать {}", path))?;
    Ok(catalog)
}

/// Регистрирует (или перерегистрирует) все посеянные события в движке
/// замков и в очереди допуска. Возвращает число событий.
pub fn apply_catalog(state: &AppState) -> usize {
    for event in &state.catalog.events {
        let seats = event.build_seats();
        let capacity = event
            .queue_capacity
            .unwrap_or(state.config.queue.default_capacity);
        info!(
            "Seeding event {} ({}): {} seats, queue capacity {}",
            event.id,
            event.title,
            seats.len(),
            capacity
        );
        state.seats.register_event(&event.id, &event.title, seats);
        state.queue.register_event(&event.id, capacity);
    }
    state.catalog.events.len()
}
