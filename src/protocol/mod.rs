//! Строковый протокол Herald.
//!
//! - `request`: декодированные запросы и формат вывода.
//! - `decoder`: цепочка декодеров (JSON, XML, команды, текст через двоеточие).
//! - `encoder`: ответы сервера и представление доставленных сообщений.
//! - `xml`: разбор и экранирование плоского XML.

pub mod decoder;
pub mod encoder;
pub mod request;
pub mod xml;

pub use decoder::*;
pub use encoder::*;
pub use request::*;
