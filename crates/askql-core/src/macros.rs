/// Helper macro for logging with structured fields
///
/// Usage:
/// ```ignore
/// askql_core::log_event!(
///     level: tracing::Level::INFO,
///     event: "stage_completed",
///     stage: "executing",
///     rows: 100
/// );
/// ```
#[macro_export]
macro_rules! log_event {
    (level: $level:expr, event: $event:expr $(, $key:ident: $value:expr)* $(,)?) => {
        tracing::event!(
            $level,
            event = $event
            $(, $key = ?$value)*
        );
    };
}
