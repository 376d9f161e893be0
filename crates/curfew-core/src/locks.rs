//! Per-subject critical sections

use curfew_util::SubjectId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedMutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One async mutex per subject, behind a global gate.
///
/// Per-subject work holds the gate shared; [`SubjectLocks::lock_all`] holds it
/// exclusively, so a global reset waits for in-flight subject work and blocks
/// new work until it is done.
#[derive(Default)]
pub struct SubjectLocks {
    gate: RwLock<()>,
    locks: Mutex<HashMap<SubjectId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held for the duration of one subject's read-check-mutate sequence
pub struct SubjectGuard<'a> {
    _subject: OwnedMutexGuard<()>,
    _gate: RwLockReadGuard<'a, ()>,
}

impl SubjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, subject: SubjectId) -> SubjectGuard<'_> {
        let gate = self.gate.read().await;
        let mutex = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(subject)
            .or_default()
            .clone();

        SubjectGuard {
            _subject: mutex.lock_owned().await,
            _gate: gate,
        }
    }

    /// Exclusive access across every subject
    pub async fn lock_all(&self) -> RwLockWriteGuard<'_, ()> {
        let guard = self.gate.write().await;
        // Nobody holds a subject lock while the gate is exclusive
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn same_subject_is_serialized() {
        let locks = Arc::new(SubjectLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(SubjectId::new(1)).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_subjects_do_not_block() {
        let locks = SubjectLocks::new();
        let _a = locks.lock(SubjectId::new(1)).await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock(SubjectId::new(2))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn lock_all_waits_for_subject_work() {
        let locks = SubjectLocks::new();
        let guard = locks.lock(SubjectId::new(1)).await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.lock_all()).await;
        assert!(blocked.is_err());

        drop(guard);
        let all = tokio::time::timeout(Duration::from_millis(50), locks.lock_all()).await;
        assert!(all.is_ok());
    }
}
