pub mod connection;
pub mod core;

// Публичный экспорт клиента и соединения, чтобы упростить доступ к ним из
// внешнего кода.
pub use self::core::*;

pub use connection::*;
