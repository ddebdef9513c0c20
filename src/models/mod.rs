pub mod queue;
pub mod reservation;
pub mod seat;

pub use queue::{QueueFrame, QueueStatus};
pub use reservation::{PaymentRecord, Reservation, ReservationStatus, SeatLock};
pub use seat::{Seat, SeatStatus};
