pub mod cleanup;
pub mod queue;
pub mod seats;
pub mod tokens;
