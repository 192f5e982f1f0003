//! Подсистема Publish–Subscribe.
//!
//! - `broker`: фасад брокера (publish / subscribe / unsubscribe, остановка).
//! - `table`: таблица топиков, подписчиков и буферов истории.
//! - `replay`: политика и буфер replay для топиков без подписчиков.
//! - `sink`: абстракция доставки сообщений подписчику.
//! - `subscriber`: идентификаторы, handle'ы и внутрипроцессные подписки.
//! - `lifecycle`: координация остановки и автоматическая отписка.
//! - `metrics`: счётчики брокера.
//! - `message`: структура публикуемого сообщения.

pub mod broker;
pub mod lifecycle;
pub mod message;
pub mod metrics;
pub mod replay;
pub mod sink;
pub mod subscriber;
pub mod table;

pub use broker::*;
pub use lifecycle::*;
pub use message::*;
pub use metrics::*;
pub use replay::*;
pub use sink::*;
pub use subscriber::*;
pub use table::*;
