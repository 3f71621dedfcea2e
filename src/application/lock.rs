use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Lock a std mutex, recovering the guard if a previous holder panicked.
///
/// Engine bookkeeping (ID pool, compilation state) stays usable after a
/// panic elsewhere; the recovery is logged so the event is not silent.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                "Recovered from poisoned engine lock"
            );
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{panic, sync::Arc};

    #[test]
    fn recovers_after_panicking_holder() {
        let lock = Arc::new(Mutex::new(1_u32));
        let poisoner = Arc::clone(&lock);
        let _ = panic::catch_unwind(move || {
            let _guard = poisoner.lock().expect("first lock");
            panic!("poison the lock");
        });

        assert!(lock.is_poisoned());
        let mut guard = mutex_lock(&lock, "application::lock", "lock::test");
        *guard += 1;
        assert_eq!(*guard, 2);
    }
}
