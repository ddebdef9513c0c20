use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Статусы брони: PENDING — единственное нетерминальное состояние.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    Paid,
    Expired,
    Cancelled,
}

impl ReservationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "PENDING",
            ReservationStatus::Paid => "PAID",
            ReservationStatus::Expired => "EXPIRED",
            ReservationStatus::Cancelled => "CANCELLED",
        }
    }
}

// Краткоживущий эксклюзивный замок на место. Существует только пока
// место в статусе RESERVED; не более одного живого замка на место.
#[derive(Debug, Clone, Serialize)]
pub struct SeatLock {
    pub seat_id: String,
    pub reservation_id: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// Запись об оплате. Детали карты не храним — только факт транзакции.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentRecord {
    pub transaction_id: Uuid,
    pub method: String,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reservation {
    pub id: Uuid,
    pub user_id: String,
    pub event_id: String,
    pub seat_ids: Vec<String>,
    pub status: ReservationStatus,
    // Сумма фиксируется в момент захвата мест и больше не меняется.
    pub total_amount: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub payment: Option<PaymentRecord>,
}

impl Reservation {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Pending && now >= self.expires_at
    }
}
