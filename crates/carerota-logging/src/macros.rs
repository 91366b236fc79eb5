//! ---
//! rota_section: "03-logging"
//! rota_subsection: "module"
//! rota_type: "source"
//! rota_scope: "code"
//! rota_description: "Structured logging context for session and request events."
//! rota_version: "v0.0.0-prealpha"
//! rota_owner: "tbd"
//! ---

#[doc(hidden)]
#[macro_export]
macro_rules! __rota_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            principal = ctx.principal.unwrap_or(""),
            role = ctx.role.unwrap_or(""),
            route = ctx.route.unwrap_or(""),
            request_id = ctx.request_id.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with session context.
#[macro_export]
macro_rules! rota_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__rota_event!(tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__rota_event!(tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with session context.
#[macro_export]
macro_rules! rota_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__rota_event!(tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__rota_event!(tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with session context.
#[macro_export]
macro_rules! rota_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__rota_event!(tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__rota_event!(tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with session context.
#[macro_export]
macro_rules! rota_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__rota_event!(tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__rota_event!(tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
