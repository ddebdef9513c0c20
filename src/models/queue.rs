use serde::{Deserialize, Serialize};

// Статусы записи в очереди ожидания.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Waiting,
    Promoted,
    Expired,
}

// Кадры, которые транспорт очереди шлет клиенту. Сериализация в JSON
// происходит на стороне WebSocket-обработчика, канал несет только данные.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueFrame {
    // Текущая позиция в очереди (монотонно не растет).
    Position(usize),
    // Явный сигнал о промоушене. Ровно один переход WAITING -> PROMOTED
    // на запись; позиция <= 0 сигналом НЕ является.
    Promoted,
}
