#[cfg(feature = "std")]
pub(crate) use std::sync::Mutex;

#[cfg(not(feature = "std"))]
pub(crate) use spin::Mutex;

/// Lock a mutex, poisoning is ignored
#[macro_export]
macro_rules! acquire {
    ($mutex: expr) => {
        match () {
            #[cfg(feature = "std")]
            () => $mutex.lock().unwrap_or_else(|e| e.into_inner()),
            #[cfg(not(feature = "std"))]
            () => $mutex.lock(),
        }
    };
}

pub(crate) use acquire;
