//! queue.rs
//!
//! Очередь допуска ("виртуальный зал ожидания") перед бронированием.
//!
//! Ключевые компоненты:
//! 1.  **EventQueue**: состояние очереди одного события под одним
//!     мьютексом — записи ожидающих, активные booking-сессии, счетчик
//!     порядка. Все мутации и пересчет позиций идут в одной критической
//!     секции, секция никогда не ждет.
//! 2.  **Емкость**: число одновременных "бронирующих" на событие.
//!     Слот занимают и промоутнутые, еще не начавшие бронь, и активные
//!     сессии (размен промоушена на созданную бронь).
//! 3.  **Промоушен**: при каждом изменении состояния из головы очереди
//!     промоутится столько ожидающих, сколько влезает в емкость.
//!     Переход WAITING -> PROMOTED происходит ровно один раз на запись
//!     и сопровождается явным кадром PROMOTED; клиент не должен
//!     угадывать промоушен по позиции.
//! 4.  **Позиции**: позиция = ожидающие строго впереди + держатели
//!     слотов. Пока запись ждет, значение монотонно не растет и никогда
//!     не равно нулю; кадр шлется только при изменении значения (плюс
//!     один раз сразу при подключении).

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{QueueFrame, QueueStatus};

#[derive(Debug, PartialEq)]
pub enum JoinError {
    UnknownEvent,
}

// Счетчики одной очереди для аналитики.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub capacity: usize,
    pub waiting: usize,
    pub promoted: usize,
    pub active_sessions: usize,
}

struct QueueEntry {
    user_id: String,
    seq: u64,
    enqueued_at: DateTime<Utc>,
    status: QueueStatus,
    last_position: Option<usize>,
    // Живой канал к транспорту; None, пока клиент отключен.
    sender: Option<UnboundedSender<QueueFrame>>,
    disconnected_at: Option<DateTime<Utc>>,
    deadline: Option<DateTime<Utc>>,
    token_issued: bool,
}

impl QueueEntry {
    fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.enqueued_at, self.seq)
    }

    fn send(&self, frame: QueueFrame) {
        if let Some(tx) = &self.sender {
            // Получатель мог отвалиться между disconnect и этой отправкой.
            let _ = tx.send(frame);
        }
    }
}

struct QueueState {
    entries: HashMap<String, QueueEntry>,
    // Активные booking-сессии: бронь -> пользователь.
    sessions: HashMap<Uuid, String>,
    next_seq: u64,
}

impl QueueState {
    // Занятые слоты емкости.
    fn holders(&self) -> usize {
        let promoted = self
            .entries
            .values()
            .filter(|e| e.status == QueueStatus::Promoted)
            .count();
        promoted + self.sessions.len()
    }

    fn waiting_sorted(&self) -> Vec<(DateTime<Utc>, u64, String)> {
        let mut waiting: Vec<_> = self
            .entries
            .values()
            .filter(|e| e.status == QueueStatus::Waiting)
            .map(|e| (e.enqueued_at, e.seq, e.user_id.clone()))
            .collect();
        waiting.sort();
        waiting
    }
}

struct EventQueue {
    event_id: String,
    capacity: usize,
    promotion_grace: Duration,
    inner: Mutex<QueueState>,
}

impl EventQueue {
    // Промоутит из головы очереди, пока есть свободные слоты, затем
    // рассылает изменившиеся позиции. Единственная точка, где позиции
    // пересчитываются: промоушен всегда идет ПЕРЕД пересчетом, поэтому
    // у ожидающих держатели слотов всегда >= 1 и позиция >= 1.
    fn rebalance(&self, state: &mut QueueState, now: DateTime<Utc>) {
        let mut usage = state.holders();
        while usage < self.capacity {
            let head = state
                .entries
                .values()
                .filter(|e| e.status == QueueStatus::Waiting)
                .min_by_key(|e| e.order_key())
                .map(|e| e.user_id.clone());
            let Some(user_id) = head else { break };

            let entry = state.entries.get_mut(&user_id).unwrap();
            entry.status = QueueStatus::Promoted;
            entry.deadline = Some(now + self.promotion_grace);
            entry.last_position = None;
            entry.send(QueueFrame::Promoted);
            usage += 1;
            debug!("User {} promoted in event {}", user_id, self.event_id);
        }

        let holders = state.holders();
        let waiting = state.waiting_sorted();
        for (ahead, (_, _, user_id)) in waiting.into_iter().enumerate() {
            let position = holders + ahead;
            let entry = state.entries.get_mut(&user_id).unwrap();
            if entry.last_position != Some(position) {
                entry.last_position = Some(position);
                entry.send(QueueFrame::Position(position));
            }
        }
    }
}

pub struct QueueService {
    queues: RwLock<HashMap<String, Arc<EventQueue>>>,
    // Индекс "бронь -> событие" для освобождения сессии по одному id.
    sessions: RwLock<HashMap<Uuid, String>>,
    promotion_grace: Duration,
    disconnect_grace: Duration,
}

impl QueueService {
    pub fn new(promotion_grace_secs: i64, disconnect_grace_secs: i64) -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            promotion_grace: Duration::seconds(promotion_grace_secs),
            disconnect_grace: Duration::seconds(disconnect_grace_secs),
        }
    }

    /// Регистрирует очередь события. Повторная регистрация (путь
    /// /api/reset) заменяет очередь целиком: старые каналы закрываются,
    /// клиентов отключает сам транспорт.
    pub fn register_event(&self, event_id: &str, capacity: usize) {
        let queue = Arc::new(EventQueue {
            event_id: event_id.to_string(),
            capacity: capacity.max(1),
            promotion_grace: self.promotion_grace,
            inner: Mutex::new(QueueState {
                entries: HashMap::new(),
                sessions: HashMap::new(),
                next_seq: 0,
            }),
        });

        let stale: Vec<Uuid> = {
            let mut queues = self.queues.write().unwrap();
            let old = queues.insert(event_id.to_string(), queue);
            old.map(|q| q.inner.lock().unwrap().sessions.keys().copied().collect())
                .unwrap_or_default()
        };
        if !stale.is_empty() {
            let mut sessions = self.sessions.write().unwrap();
            for id in stale {
                sessions.remove(&id);
            }
        }
    }

    fn queue(&self, event_id: &str) -> Option<Arc<EventQueue>> {
        self.queues.read().unwrap().get(event_id).cloned()
    }

    /// Вход в очередь (или переподключение). На пару (событие,
    /// пользователь) живет одна запись: повторное подключение
    /// подхватывает ее, сохраняя исходный порядок, и заменяет канал —
    /// прежнее соединение при этом закрывается само. Уже промоутнутый
    /// при переподключении сразу получает повторный кадр PROMOTED.
    pub fn join(
        &self,
        event_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UnboundedReceiver<QueueFrame>, JoinError> {
        let queue = self.queue(event_id).ok_or(JoinError::UnknownEvent)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut guard = queue.inner.lock().unwrap();
        let state = &mut *guard;
        match state.entries.get_mut(user_id) {
            Some(entry) if entry.status == QueueStatus::Promoted => {
                entry.sender = Some(tx);
                entry.disconnected_at = None;
                entry.send(QueueFrame::Promoted);
            }
            Some(entry) if entry.status == QueueStatus::Waiting => {
                entry.sender = Some(tx);
                entry.disconnected_at = None;
                // Текущую позицию шлем безусловно, дальше — по изменению.
                entry.last_position = None;
                queue.rebalance(state, now);
            }
            Some(entry) => {
                // Запись истекла, но еще не вычищена: встаем в хвост заново.
                entry.status = QueueStatus::Waiting;
                entry.enqueued_at = now;
                entry.seq = state.next_seq;
                entry.sender = Some(tx);
                entry.disconnected_at = None;
                entry.last_position = None;
                entry.deadline = None;
                entry.token_issued = false;
                state.next_seq += 1;
                queue.rebalance(state, now);
            }
            None => {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.entries.insert(
                    user_id.to_string(),
                    QueueEntry {
                        user_id: user_id.to_string(),
                        seq,
                        enqueued_at: now,
                        status: QueueStatus::Waiting,
                        last_position: None,
                        sender: Some(tx),
                        disconnected_at: None,
                        deadline: None,
                        token_issued: false,
                    },
                );
                queue.rebalance(state, now);
            }
        }
        Ok(rx)
    }

    /// Обрыв соединения: канал отцепляется, запись остается на месте
    /// (и в порядке) до конца льготного окна переподключения.
    pub fn disconnect(&self, event_id: &str, user_id: &str, now: DateTime<Utc>) {
        let Some(queue) = self.queue(event_id) else {
            return;
        };
        let mut state = queue.inner.lock().unwrap();
        if let Some(entry) = state.entries.get_mut(user_id) {
            match &entry.sender {
                // Переподключение уже заменило канал: это запоздавший
                // teardown старого соединения, живой канал не трогаем.
                Some(tx) if !tx.is_closed() => {}
                Some(_) => {
                    entry.sender = None;
                    entry.disconnected_at = Some(now);
                }
                None => {}
            }
        }
    }

    /// Помечает выдачу booking-токена. true только для промоутнутой
    /// записи — слот при этом НЕ освобождается.
    pub fn mark_token_issued(&self, event_id: &str, user_id: &str) -> bool {
        let Some(queue) = self.queue(event_id) else {
            return false;
        };
        let mut state = queue.inner.lock().unwrap();
        match state.entries.get_mut(user_id) {
            Some(entry) if entry.status == QueueStatus::Promoted => {
                entry.token_issued = true;
                true
            }
            _ => false,
        }
    }

    /// Размен промоушена на booking-сессию: запись покидает очередь,
    /// слот переходит к брони и держится до ее исхода. Канал закрывается —
    /// очередь этому клиенту больше ничего не скажет.
    pub fn consume(&self, event_id: &str, user_id: &str, reservation_id: Uuid) {
        let Some(queue) = self.queue(event_id) else {
            return;
        };
        let consumed = {
            let mut state = queue.inner.lock().unwrap();
            let promoted = state
                .entries
                .get(user_id)
                .map(|e| e.status == QueueStatus::Promoted)
                .unwrap_or(false);
            if promoted {
                state.entries.remove(user_id);
                state.sessions.insert(reservation_id, user_id.to_string());
            }
            promoted
        };
        if consumed {
            self.sessions
                .write()
                .unwrap()
                .insert(reservation_id, event_id.to_string());
            debug!(
                "User {} consumed promotion in event {} (reservation {})",
                user_id, event_id, reservation_id
            );
        }
    }

    /// Возврат слота емкости после исхода брони (оплата, отмена,
    /// истечение). Освободившийся слот тут же разыгрывается промоушеном.
    pub fn release_session(&self, reservation_id: Uuid) {
        let event_id = {
            let mut sessions = self.sessions.write().unwrap();
            sessions.remove(&reservation_id)
        };
        let Some(event_id) = event_id else { return };
        let Some(queue) = self.queue(&event_id) else {
            return;
        };
        let mut state = queue.inner.lock().unwrap();
        if state.sessions.remove(&reservation_id).is_some() {
            queue.rebalance(&mut state, Utc::now());
        }
    }

    /// Фоновая зачистка: вычищает брошенные записи после льготного окна
    /// и снимает промоушены, не развязанные в срок. Возвращает
    /// (вычищено ожидающих, снято промоушенов).
    pub fn sweep(&self, now: DateTime<Utc>) -> (usize, usize) {
        let queues: Vec<Arc<EventQueue>> = {
            let queues = self.queues.read().unwrap();
            queues.values().cloned().collect()
        };

        let mut purged = 0;
        let mut expired = 0;
        for queue in queues {
            let mut state = queue.inner.lock().unwrap();

            // Промоушены с истекшим дедлайном: слот назад в пул, запись
            // помечается и уходит по обычному пути зачистки.
            let overdue: Vec<String> = state
                .entries
                .values()
                .filter(|e| {
                    e.status == QueueStatus::Promoted
                        && e.deadline.map(|d| now >= d).unwrap_or(false)
                })
                .map(|e| e.user_id.clone())
                .collect();
            for user_id in overdue {
                let entry = state.entries.get_mut(&user_id).unwrap();
                entry.status = QueueStatus::Expired;
                entry.sender = None;
                entry.deadline = None;
                entry.disconnected_at = Some(now);
                expired += 1;
                info!(
                    "Promotion of user {} expired in event {}",
                    user_id, queue.event_id
                );
            }

            // Отключенные дольше льготного окна — вон из очереди.
            let abandoned: Vec<String> = state
                .entries
                .values()
                .filter(|e| e.status != QueueStatus::Promoted)
                .filter(|e| {
                    e.disconnected_at
                        .map(|d| now - d >= self.disconnect_grace)
                        .unwrap_or(false)
                })
                .map(|e| e.user_id.clone())
                .collect();
            for user_id in &abandoned {
                state.entries.remove(user_id);
            }
            purged += abandoned.len();

            queue.rebalance(&mut state, now);
        }
        (purged, expired)
    }

    pub fn stats(&self, event_id: &str) -> Option<QueueStats> {
        let queue = self.queue(event_id)?;
        let state = queue.inner.lock().unwrap();
        let mut stats = QueueStats {
            capacity: queue.capacity,
            active_sessions: state.sessions.len(),
            ..Default::default()
        };
        for entry in state.entries.values() {
            match entry.status {
                QueueStatus::Waiting => stats.waiting += 1,
                QueueStatus::Promoted => stats.promoted += 1,
                QueueStatus::Expired => {}
            }
        }
        Some(stats)
    }
}
