/// Increment a stats counter by 1.
///
/// Compiles to nothing when the `stats` feature is disabled.
macro_rules! stat_inc {
    ($counter:ident) => {
        #[cfg(feature = "stats")]
        {
            $crate::stats::STATS
                .$counter
                .fetch_add(1, ::core::sync::atomic::Ordering::Relaxed);
        }
    };
}

/// Add a value to a stats counter.
///
/// Compiles to nothing (including the value expression) when the `stats`
/// feature is disabled.
macro_rules! stat_add {
    ($counter:ident, $val:expr) => {
        #[cfg(feature = "stats")]
        {
            $crate::stats::STATS
                .$counter
                .fetch_add($val as u64, ::core::sync::atomic::Ordering::Relaxed);
        }
    };
}

/// Emit a leveled diagnostic line through the `log` facade.
///
/// `diag!(debug, "split {} pages", n)`. Compiles to nothing (arguments are
/// not evaluated) when the `debug` feature is disabled. Only for cold paths,
/// and never while a `SpinMutex` is held: the logger may allocate.
macro_rules! diag {
    ($level:ident, $($arg:tt)+) => {
        #[cfg(feature = "debug")]
        {
            ::log::$level!(target: "tcalloc", $($arg)+);
        }
    };
}
