//! Snapshot/apply/commit/rollback helper for optimistic mutations.

use std::future::Future;

use parking_lot::Mutex;

/// Apply `mutate` to `state` immediately, then await `commit`.
///
/// On commit success the optimistic mutation stands and the commit's value
/// is returned. On failure the pre-mutation snapshot is restored before the
/// error propagates, so observers never see a half-applied update outlive
/// its transaction.
pub async fn optimistic<T, U, E, Fut>(
    state: &Mutex<T>,
    mutate: impl FnOnce(&mut T),
    commit: Fut,
) -> Result<U, E>
where
    T: Clone,
    Fut: Future<Output = Result<U, E>>,
{
    let snapshot = {
        let mut guard = state.lock();
        let snapshot = guard.clone();
        mutate(&mut guard);
        snapshot
    };
    match commit.await {
        Ok(value) => Ok(value),
        Err(err) => {
            *state.lock() = snapshot;
            Err(err)
        }
    }
}
