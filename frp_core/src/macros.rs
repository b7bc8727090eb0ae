macro_rules! debug_warn {
    ($($x:tt)*) => {
        {
            #[cfg(debug_assertions)]
            {
                warn!($($x)*)
            }
            #[cfg(not(debug_assertions))]
            {
                _ = format_args!($($x)*);
            }
        }
    }
}

pub(crate) use debug_warn;
