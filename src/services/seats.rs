//! seats.rs
//!
//! Менеджер замков на места и жизненный цикл брони.
//!
//! Ключевые компоненты:
//! 1.  **EventSeats**: хранилище одного события — места, живые замки и
//!     брони под одним мьютексом. Захват набора мест проверяется и
//!     фиксируется в одной критической секции, поэтому по каждому месту
//!     операции линеаризуемы: два конкурентных acquire не могут оба
//!     увидеть место свободным.
//! 2.  **SeatLockService**: реестр хранилищ (отдельное хранилище на
//!     каждое событие) плюс индекс "бронь -> событие", чтобы confirm и
//!     cancel адресовались одним id брони.
//! 3.  **Фоновая зачистка**: просроченные PENDING-брони снимаются
//!     односторонне — места возвращаются в AVAILABLE, бронь помечается
//!     EXPIRED. Это и есть механизм "платежного окна".

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{
    PaymentRecord, Reservation, ReservationStatus, Seat, SeatLock, SeatStatus,
};

// --- Исходы операций ---

#[derive(Debug, PartialEq)]
pub enum AcquireError {
    UnknownEvent,
    // Хотя бы одно место недоступно: весь запрос отклоняется целиком,
    // частичного захвата не остается.
    Conflict(Vec<String>),
    // У пользователя уже есть открытая PENDING-бронь на это событие.
    AlreadyPending(Uuid),
}

#[derive(Debug, PartialEq)]
pub enum ConfirmError {
    NotFound,
    // PENDING истек (или бронь уже в терминальном незакрытом состоянии).
    Expired,
}

#[derive(Debug, PartialEq)]
pub enum ReleaseError {
    NotFound,
}

// Просроченная бронь, снятая зачисткой: очередь допуска по этим данным
// освобождает booking-слот пользователя.
#[derive(Debug, Clone)]
pub struct ExpiredReservation {
    pub reservation_id: Uuid,
    pub event_id: String,
    pub user_id: String,
}

// Счетчики одного события для аналитики.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatStats {
    pub total_seats: usize,
    pub available: usize,
    pub reserved: usize,
    pub sold: usize,
    pub blocked: usize,
    pub revenue: f64,
    pub pending_reservations: usize,
    pub paid_reservations: usize,
}

// Фильтры листинга мест (страничный вывод как в выдаче каталога).
#[derive(Debug)]
pub struct SeatFilter {
    pub status: Option<SeatStatus>,
    pub row: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for SeatFilter {
    fn default() -> Self {
        Self {
            status: None,
            row: None,
            page: 1,
            page_size: 100,
        }
    }
}

// --- Хранилище одного события ---

struct EventSeats {
    title: String,
    inner: Mutex<SeatTable>,
}

struct SeatTable {
    seats: HashMap<String, Seat>,
    locks: HashMap<String, SeatLock>,
    reservations: HashMap<Uuid, Reservation>,
    // Открытая PENDING-бронь пользователя: не больше одной на событие.
    open_by_user: HashMap<String, Uuid>,
}

impl SeatTable {
    // Возвращает места брони в AVAILABLE. Трогаем только те замки,
    // которые все еще принадлежат этой брони: повторный release или
    // запоздавшая зачистка не «воскресит» уже проданное место.
    fn release_seats_of(&mut self, reservation_id: Uuid, seat_ids: &[String]) -> usize {
        let mut freed = 0;
        for seat_id in seat_ids {
            let owned = self
                .locks
                .get(seat_id)
                .map(|l| l.reservation_id == reservation_id)
                .unwrap_or(false);
            if !owned {
                continue;
            }
            self.locks.remove(seat_id);
            if let Some(seat) = self.seats.get_mut(seat_id) {
                if seat.status == SeatStatus::Reserved {
                    seat.status = SeatStatus::Available;
                    freed += 1;
                }
            }
        }
        freed
    }
}

// --- Сервис ---

pub struct SeatLockService {
    stores: RwLock<HashMap<String, Arc<EventSeats>>>,
    // Индекс "id брони -> id события". Часть этого же владельца данных:
    // confirm/cancel приходят без eventId.
    index: RwLock<HashMap<Uuid, String>>,
    ttl: Duration,
    // Сколько терминальная бронь остается читаемой по id, прежде чем
    // зачистка выбросит ее запись.
    retention: Duration,
}

impl SeatLockService {
    pub fn new(ttl_secs: i64, retention_secs: i64) -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
            index: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs),
            retention: Duration::seconds(retention_secs),
        }
    }

    /// Регистрирует событие с готовой картой мест. Повторная регистрация
    /// того же id полностью заменяет хранилище (путь /api/reset).
    pub fn register_event(&self, event_id: &str, title: &str, seats: Vec<Seat>) {
        let table = SeatTable {
            seats: seats.into_iter().map(|s| (s.id.clone(), s)).collect(),
            locks: HashMap::new(),
            reservations: HashMap::new(),
            open_by_user: HashMap::new(),
        };
        let store = Arc::new(EventSeats {
            title: title.to_string(),
            inner: Mutex::new(table),
        });

        let dropped: Vec<Uuid> = {
            let mut stores = self.stores.write().unwrap();
            let old = stores.insert(event_id.to_string(), store);
            old.map(|s| s.inner.lock().unwrap().reservations.keys().copied().collect())
                .unwrap_or_default()
        };
        if !dropped.is_empty() {
            let mut index = self.index.write().unwrap();
            for id in dropped {
                index.remove(&id);
            }
        }
        info!("Event {} registered", event_id);
    }

    pub fn event_exists(&self, event_id: &str) -> bool {
        self.stores.read().unwrap().contains_key(event_id)
    }

    pub fn event_ids(&self) -> Vec<String> {
        self.stores.read().unwrap().keys().cloned().collect()
    }

    pub fn event_title(&self, event_id: &str) -> Option<String> {
        self.store(event_id).map(|s| s.title.clone())
    }

    fn store(&self, event_id: &str) -> Option<Arc<EventSeats>> {
        self.stores.read().unwrap().get(event_id).cloned()
    }

    /// Атомарный захват набора мест: либо замок на каждое место из
    /// запроса, либо Conflict и ни одного изменения. Победителя гонки
    /// определяет первый вошедший в критическую секцию; проигравший
    /// получает Conflict, а не место в очереди на повтор.
    pub fn acquire(
        &self,
        event_id: &str,
        user_id: &str,
        seat_ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Reservation, AcquireError> {
        let store = self.store(event_id).ok_or(AcquireError::UnknownEvent)?;

        // Дубликаты в запросе схлопываем, порядок сохраняем.
        let mut seen = HashSet::new();
        let requested: Vec<&String> = seat_ids.iter().filter(|s| seen.insert(s.as_str())).collect();

        let reservation = {
            let mut table = store.inner.lock().unwrap();

            if let Some(open_id) = table.open_by_user.get(user_id) {
                return Err(AcquireError::AlreadyPending(*open_id));
            }

            // Фаза проверки: все места должны быть AVAILABLE.
            let conflicts: Vec<String> = requested
                .iter()
                .filter(|id| {
                    table
                        .seats
                        .get(id.as_str())
                        .map(|s| s.status != SeatStatus::Available)
                        .unwrap_or(true)
                })
                .map(|id| (*id).clone())
                .collect();
            if !conflicts.is_empty() {
                return Err(AcquireError::Conflict(conflicts));
            }

            // Фаза фиксации: под тем же мьютексом, промежуточных состояний
            // снаружи не видно.
            let reservation_id = Uuid::new_v4();
            let expires_at = now + self.ttl;
            let mut total = 0.0;
            for id in &requested {
                let seat = table.seats.get_mut(id.as_str()).unwrap();
                seat.status = SeatStatus::Reserved;
                total += seat.price;
                table.locks.insert(
                    (*id).clone(),
                    SeatLock {
                        seat_id: (*id).clone(),
                        reservation_id,
                        acquired_at: now,
                        expires_at,
                    },
                );
            }

            let reservation = Reservation {
                id: reservation_id,
                user_id: user_id.to_string(),
                event_id: event_id.to_string(),
                seat_ids: requested.iter().map(|s| (*s).clone()).collect(),
                status: ReservationStatus::Pending,
                total_amount: total,
                created_at: now,
                expires_at,
                payment: None,
            };
            table.reservations.insert(reservation_id, reservation.clone());
            table.open_by_user.insert(user_id.to_string(), reservation_id);
            reservation
        };

        self.index
            .write()
            .unwrap()
            .insert(reservation.id, event_id.to_string());

        debug!(
            "Reservation {} acquired {} seats for user {} in event {}",
            reservation.id,
            reservation.seat_ids.len(),
            user_id,
            event_id
        );
        Ok(reservation)
    }

    /// Подтверждение в платежном окне: RESERVED -> SOLD, бронь PAID,
    /// замки снимаются. Повторный confirm уже оплаченной брони
    /// идемпотентно возвращает ее же. Если дедлайн прошел, а зачистка
    /// еще не успела, бронь истекает прямо здесь.
    pub fn confirm(
        &self,
        reservation_id: Uuid,
        payment_method: &str,
        now: DateTime<Utc>,
    ) -> Result<Reservation, ConfirmError> {
        let store = self
            .event_of(reservation_id)
            .and_then(|event_id| self.store(&event_id))
            .ok_or(ConfirmError::NotFound)?;

        let mut table = store.inner.lock().unwrap();
        let Some(current) = table.reservations.get(&reservation_id).cloned() else {
            return Err(ConfirmError::NotFound);
        };

        match current.status {
            ReservationStatus::Pending if now < current.expires_at => {
                for seat_id in &current.seat_ids {
                    table.locks.remove(seat_id);
                    if let Some(seat) = table.seats.get_mut(seat_id) {
                        seat.status = SeatStatus::Sold;
                    }
                }
                table.open_by_user.remove(&current.user_id);
                let reservation = table.reservations.get_mut(&reservation_id).unwrap();
                reservation.status = ReservationStatus::Paid;
                reservation.payment = Some(PaymentRecord {
                    transaction_id: Uuid::new_v4(),
                    method: payment_method.to_string(),
                    paid_at: now,
                });
                info!(
                    "Reservation {} confirmed, {} seats sold",
                    reservation_id,
                    reservation.seat_ids.len()
                );
                Ok(reservation.clone())
            }
            ReservationStatus::Pending => {
                // Дедлайн уже позади — истекаем и отвечаем как зачистка.
                let seat_ids = current.seat_ids.clone();
                table.release_seats_of(reservation_id, &seat_ids);
                table.open_by_user.remove(&current.user_id);
                table.reservations.get_mut(&reservation_id).unwrap().status =
                    ReservationStatus::Expired;
                Err(ConfirmError::Expired)
            }
            ReservationStatus::Paid => Ok(current),
            ReservationStatus::Expired | ReservationStatus::Cancelled => Err(ConfirmError::Expired),
        }
    }

    /// Явная отмена: места назад в AVAILABLE, бронь CANCELLED.
    /// Повторный вызов по терминальной брони — no-op с тем же ответом.
    pub fn release(
        &self,
        reservation_id: Uuid,
        _now: DateTime<Utc>,
    ) -> Result<Reservation, ReleaseError> {
        let store = self
            .event_of(reservation_id)
            .and_then(|event_id| self.store(&event_id))
            .ok_or(ReleaseError::NotFound)?;

        let mut table = store.inner.lock().unwrap();
        let Some(current) = table.reservations.get(&reservation_id).cloned() else {
            return Err(ReleaseError::NotFound);
        };

        if current.status != ReservationStatus::Pending {
            return Ok(current);
        }

        let freed = table.release_seats_of(reservation_id, &current.seat_ids);
        table.open_by_user.remove(&current.user_id);
        let reservation = table.reservations.get_mut(&reservation_id).unwrap();
        reservation.status = ReservationStatus::Cancelled;
        info!(
            "Reservation {} cancelled, {} seats released",
            reservation_id, freed
        );
        Ok(reservation.clone())
    }

    pub fn get_reservation(&self, reservation_id: Uuid) -> Option<Reservation> {
        let store = self
            .event_of(reservation_id)
            .and_then(|event_id| self.store(&event_id))?;
        let table = store.inner.lock().unwrap();
        table.reservations.get(&reservation_id).cloned()
    }

    fn event_of(&self, reservation_id: Uuid) -> Option<String> {
        self.index.read().unwrap().get(&reservation_id).cloned()
    }

    /// Снимает все PENDING-брони с истекшим платежным окном и выбрасывает
    /// терминальные брони, пережившие окно хранения. Вызывается фоновым
    /// чистильщиком независимо от состояния клиентских соединений.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<ExpiredReservation> {
        let stores: Vec<(String, Arc<EventSeats>)> = {
            let stores = self.stores.read().unwrap();
            stores.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let mut expired = Vec::new();
        let mut purged = Vec::new();
        for (event_id, store) in stores {
            let mut table = store.inner.lock().unwrap();
            let due: Vec<Reservation> = table
                .reservations
                .values()
                .filter(|r| r.is_expired_at(now))
                .cloned()
                .collect();
            for reservation in due {
                table.release_seats_of(reservation.id, &reservation.seat_ids);
                table.open_by_user.remove(&reservation.user_id);
                table.reservations.get_mut(&reservation.id).unwrap().status =
                    ReservationStatus::Expired;
                expired.push(ExpiredReservation {
                    reservation_id: reservation.id,
                    event_id: event_id.clone(),
                    user_id: reservation.user_id,
                });
            }

            // Терминальные брони хранятся ограниченно: старше окна
            // хранения (отсчет от платежного дедлайна) — вон из таблицы,
            // иначе она растет бесконечно под длительной нагрузкой.
            let stale: Vec<Uuid> = table
                .reservations
                .values()
                .filter(|r| r.status.is_terminal() && now - r.expires_at >= self.retention)
                .map(|r| r.id)
                .collect();
            for id in &stale {
                table.reservations.remove(id);
            }
            purged.extend(stale);
        }

        if !purged.is_empty() {
            let mut index = self.index.write().unwrap();
            for id in &purged {
                index.remove(id);
            }
            debug!("Dropped {} terminal reservations past retention", purged.len());
        }
        expired
    }

    pub fn list_seats(&self, event_id: &str, filter: &SeatFilter) -> Option<Vec<Seat>> {
        let store = self.store(event_id)?;
        let table = store.inner.lock().unwrap();

        let mut seats: Vec<Seat> = table
            .seats
            .values()
            .filter(|s| filter.status.map(|st| s.status == st).unwrap_or(true))
            .filter(|s| filter.row.as_deref().map(|r| s.row == r).unwrap_or(true))
            .cloned()
            .collect();
        seats.sort_by(|a, b| a.row.cmp(&b.row).then(a.number.cmp(&b.number)));

        let page = filter.page.max(1) as usize;
        let page_size = filter.page_size.clamp(1, 100) as usize;
        Some(
            seats
                .into_iter()
                .skip((page - 1) * page_size)
                .take(page_size)
                .collect(),
        )
    }

    pub fn stats(&self, event_id: &str) -> Option<SeatStats> {
        let store = self.store(event_id)?;
        let table = store.inner.lock().unwrap();

        let mut stats = SeatStats {
            total_seats: table.seats.len(),
            ..Default::default()
        };
        for seat in table.seats.values() {
            match seat.status {
                SeatStatus::Available => stats.available += 1,
                SeatStatus::Reserved => stats.reserved += 1,
                SeatStatus::Sold => {
                    stats.sold += 1;
                    stats.revenue += seat.price;
                }
                SeatStatus::Blocked => stats.blocked += 1,
            }
        }
        for reservation in table.reservations.values() {
            match reservation.status {
                ReservationStatus::Pending => stats.pending_reservations += 1,
                ReservationStatus::Paid => stats.paid_reservations += 1,
                _ => {}
            }
        }
        Some(stats)
    }
}
