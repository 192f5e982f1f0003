use std::{fmt, panic::Location, sync::Arc};

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::{ErrorExt, LogLevel, StatusCode};

/// Основная структура ошибки с поддержкой контекста.
///
/// Позволяет добавлять контекстную информацию по мере распространения ошибки
/// вверх по стеку вызовов.
#[derive(Clone)]
pub struct StackError {
    inner: Arc<dyn ErrorExt>,
    contexts: Arc<Vec<ErrorContext>>,
}

/// Контекст ошибки с location tracking.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub message: String,
    pub location: Option<&'static Location<'static>>,
}

/// Структура для сериализации ошибок в ответах.
#[cfg(feature = "serde")]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub message: String,
    pub retryable: bool,
}

#[cfg(feature = "serde")]
impl ErrorResponse {
    /// Ответ для любой ошибки, реализующей [`ErrorExt`].
    pub fn from_error(err: &dyn ErrorExt) -> Self {
        let status = err.status_code();
        Self {
            code: status.code(),
            message: err.client_message(),
            retryable: status.is_retryable(),
        }
    }
}

/// Добавление контекста к `Result` без явного `map_err`.
pub trait ResultExt<T> {
    fn context(
        self,
        msg: impl Into<String>,
    ) -> Result<T, StackError>;
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StackError {
    /// Создаёт новую ошибку.
    #[track_caller]
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            inner: Arc::new(err),
            contexts: Arc::new(Vec::new()),
        }
    }

    /// Добавляет контекст к ошибке.
    #[track_caller]
    pub fn context(
        mut self,
        msg: impl Into<String>,
    ) -> Self {
        let mut new_contexts = (*self.contexts).clone();
        new_contexts.push(ErrorContext {
            message: msg.into(),
            location: Some(Location::caller()),
        });
        self.contexts = Arc::new(new_contexts);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.inner.status_code()
    }

    pub fn client_message(&self) -> String {
        self.inner.client_message()
    }

    /// Возвращает корневую ошибку.
    pub fn root(&self) -> &dyn ErrorExt {
        self.inner.as_ref()
    }

    pub fn contexts(&self) -> &[ErrorContext] {
        &self.contexts
    }

    /// Попытка downcast к конкретному типу ошибки.
    pub fn downcast_ref<T: ErrorExt + 'static>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    /// Можно ли повторить операцию, завершившуюся этой ошибкой.
    pub fn is_retryable(&self) -> bool {
        self.status_code().is_retryable()
    }

    /// Сериализация для ответов клиенту (требует feature = "serde").
    #[cfg(feature = "serde")]
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse::from_error(self.root())
    }

    fn format_contexts(&self) -> Vec<String> {
        self.contexts
            .iter()
            .map(|ctx| match ctx.location {
                Some(loc) => format!("{} ({}:{})", ctx.message, loc.file(), loc.line()),
                None => ctx.message.clone(),
            })
            .collect()
    }

    /// Возвращает уровень логирования.
    pub fn log_level(&self) -> LogLevel {
        self.status_code().log_level()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StackError
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut debug = f.debug_struct("StackError");
        debug.field("inner", &self.inner.to_string());
        debug.field("status_code", &self.status_code());

        if !self.contexts.is_empty() {
            debug.field("contexts", &self.format_contexts());
        }

        debug.finish()
    }
}

impl fmt::Display for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        if self.contexts.is_empty() {
            return write!(f, "{}", self.inner);
        }
        let contexts: Vec<&str> = self.contexts.iter().map(|c| c.message.as_str()).collect();
        write!(f, "{}: {}", contexts.join(" → "), self.inner)
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

impl<E: ErrorExt> From<E> for StackError {
    #[track_caller]
    fn from(e: E) -> Self {
        StackError::new(e)
    }
}

impl<T, E: Into<StackError>> ResultExt<T> for Result<T, E> {
    #[track_caller]
    fn context(
        self,
        msg: impl Into<String>,
    ) -> Result<T, StackError> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(e.into().context(msg)),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BrokerError;

    #[test]
    fn test_context_chain() {
        let stack = StackError::new(BrokerError::EngineUnavailable)
            .context("publish rejected")
            .context("connection handler");

        assert_eq!(stack.contexts().len(), 2);
        assert_eq!(stack.contexts()[0].message, "publish rejected");
        assert!(stack.contexts()[0].location.is_some());
        assert!(stack.is_retryable());
    }

    #[test]
    fn test_downcast() {
        let stack = StackError::new(BrokerError::UnknownTopic {
            topic: "orders".to_string(),
        });
        assert!(matches!(
            stack.downcast_ref::<BrokerError>(),
            Some(BrokerError::UnknownTopic { topic }) if topic == "orders"
        ));
    }

    /// Тест проверяет, что `ResultExt::context` сохраняет исходную ошибку
    /// и добавляет контекст.
    #[test]
    fn test_result_ext_context() {
        let res: Result<(), BrokerError> = Err(BrokerError::EngineUnavailable);
        let err = res.context("subscribe").unwrap_err();
        let display = err.to_string();
        assert!(display.starts_with("subscribe: "));
        assert_eq!(err.status_code(), StatusCode::Unavailable);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_to_response() {
        let stack = StackError::new(BrokerError::EngineUnavailable).context("publish");
        let response = stack.to_response();
        assert_eq!(response.code, StatusCode::Unavailable.code());
        assert_eq!(response.message, "Broker unavailable, retry later");
        assert!(response.retryable);
        assert_eq!(
            response,
            ErrorResponse::from_error(&BrokerError::EngineUnavailable)
        );
    }
}
