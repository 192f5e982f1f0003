//! Сетевой модуль Herald.
//!
//! ## Подмодули
//!
//! - `server`: приём TCP-соединений и остановка сервера.
//! - `connection`: лимиты соединений и цикл обслуживания одного клиента.
//! - `session`: выполнение запросов протокола от имени соединения.
//! - `registry`: реестр активных соединений и агрегированная статистика.
//! - `state`: состояние и счётчики отдельного соединения.

pub mod connection;
pub mod registry;
pub mod server;
pub mod session;
pub mod state;

pub use connection::*;
pub use registry::*;
pub use server::*;
pub use session::*;
pub use state::*;
