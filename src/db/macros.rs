//! Database dispatch macro.
//!
//! `RawConnection` wraps a different sqlx connection type per backend. Most
//! operations on it are the same code written against three types; this macro
//! writes the `match` once and expands the body per variant at compile time.

/// Dispatch over the variants of `RawConnection`.
///
/// The short form repeats one body for every backend; the long form takes one
/// arm per backend when the bodies differ.
///
/// # Example
///
/// ```ignore
/// // same body for every backend
/// impl_db_dispatch!(raw, conn => conn.ping().await);
///
/// // per-backend bodies
/// impl_db_dispatch!(raw, {
///     MySql(c) => mysql::execute(c, sql),
///     Postgres(c) => postgres::execute(c, sql),
///     SQLite(c) => sqlite::execute(c, sql),
/// });
/// ```
macro_rules! impl_db_dispatch {
    ($conn:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $conn {
            $(
                $crate::db::executor::RawConnection::$variant($c) => $body,
            )+
        }
    };
    ($conn:expr, $c:ident => $body:expr) => {
        match $conn {
            $crate::db::executor::RawConnection::MySql($c) => $body,
            $crate::db::executor::RawConnection::Postgres($c) => $body,
            $crate::db::executor::RawConnection::SQLite($c) => $body,
        }
    };
}

pub(crate) use impl_db_dispatch;
