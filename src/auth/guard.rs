//! Per-user admission guard.
//!
//! Requests of the same user may evaluate admission concurrently. Every evaluation takes
//! a generation number and stays registered as alive until it settles or is dropped.
//! An attempt publishes its own decision only when no newer attempt is alive; otherwise
//! it waits, and adopts the newer decision once one is published. If every newer attempt
//! goes away without publishing (a client disconnect drops the handler future), the
//! waiting attempt publishes its own result after all.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, RwLock};

use super::decision::Decision;

/// Result of one admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settled {
    pub decision: Decision,
    /// True when this attempt's own evaluation was published. Only such an attempt
    /// may act on a denial.
    pub current: bool,
}

#[derive(Debug, Clone)]
struct GuardState {
    /// Attempts that have neither settled nor been dropped
    alive: BTreeSet<u64>,
    published: u64,
    decision: Decision,
}

impl GuardState {
    fn newer_alive(&self, generation: u64) -> bool {
        self.alive.range(generation + 1..).next().is_some()
    }
}

#[derive(Debug)]
pub struct AuthGuard {
    generation: AtomicU64,
    state: watch::Sender<GuardState>,
}

/// Keeps an attempt registered as alive; dropping it withdraws the attempt.
struct Attempt<'a> {
    guard: &'a AuthGuard,
    generation: u64,
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        let generation = self.generation;
        self.guard
            .state
            .send_if_modified(|state| state.alive.remove(&generation));
    }
}

impl Default for AuthGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthGuard {
    pub fn new() -> Self {
        let (state, _) = watch::channel(GuardState {
            alive: BTreeSet::new(),
            published: 0,
            decision: Decision::Pending,
        });
        Self {
            generation: AtomicU64::new(0),
            state,
        }
    }

    /// Latest published decision.
    #[cfg(test)]
    fn settled(&self) -> Decision {
        self.state.borrow().decision
    }

    /// True while some attempt is still evaluating or waiting.
    pub fn is_busy(&self) -> bool {
        !self.state.borrow().alive.is_empty()
    }

    pub async fn admit<Fut>(&self, evaluation: Fut) -> Settled
    where
        Fut: Future<Output = Decision>,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_modify(|state| {
            state.alive.insert(generation);
        });
        let _attempt = Attempt {
            guard: self,
            generation,
        };

        let decision = evaluation.await;

        loop {
            let mut outcome = None;
            self.state.send_if_modified(|state| {
                if state.published > generation {
                    outcome = Some(Settled {
                        decision: state.decision,
                        current: false,
                    });
                    return state.alive.remove(&generation);
                }
                if state.newer_alive(generation) {
                    return false;
                }
                state.alive.remove(&generation);
                state.published = generation;
                state.decision = decision;
                outcome = Some(Settled {
                    decision,
                    current: true,
                });
                true
            });
            if let Some(settled) = outcome {
                return settled;
            }

            tracing::debug!(generation, "Admission superseded, waiting for newer decision");
            let mut rx = self.state.subscribe();
            let woke = rx
                .wait_for(|state| state.published > generation || !state.newer_alive(generation))
                .await
                .is_ok();
            // The sender lives as long as the guard.
            if !woke {
                return Settled {
                    decision,
                    current: false,
                };
            }
        }
    }
}

/// Guards keyed by uid. A guard is dropped again once nothing is using it.
#[derive(Debug, Default)]
pub struct GuardRegistry {
    guards: RwLock<HashMap<String, Arc<AuthGuard>>>,
}

impl GuardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn guard_for(&self, uid: &str) -> Arc<AuthGuard> {
        if let Some(guard) = self.guards.read().await.get(uid) {
            return guard.clone();
        }
        self.guards
            .write()
            .await
            .entry(uid.to_string())
            .or_default()
            .clone()
    }

    /// Run one admission attempt for `uid` through its guard.
    pub async fn admit<Fut>(&self, uid: &str, evaluation: Fut) -> Settled
    where
        Fut: Future<Output = Decision>,
    {
        let guard = self.guard_for(uid).await;
        let settled = guard.admit(evaluation).await;
        drop(guard);
        self.release(uid).await;
        settled
    }

    /// Forget the guard of `uid` unless another request still holds it.
    async fn release(&self, uid: &str) {
        let mut guards = self.guards.write().await;
        let idle = guards
            .get(uid)
            .is_some_and(|guard| Arc::strong_count(guard) == 1 && !guard.is_busy());
        if idle {
            guards.remove(uid);
        }
    }

    pub async fn len(&self) -> usize {
        self.guards.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    async fn wait_for_attempts(guard: &AuthGuard, n: u64) {
        while guard.generation.load(Ordering::SeqCst) < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_single_evaluation_publishes() {
        let guard = AuthGuard::new();
        assert_eq!(guard.settled(), Decision::Pending);

        let settled = guard.admit(async { Decision::Granted }).await;
        assert_eq!(
            settled,
            Settled {
                decision: Decision::Granted,
                current: true
            }
        );
        assert_eq!(guard.settled(), Decision::Granted);
        assert!(!guard.is_busy());
    }

    #[tokio::test]
    async fn test_superseded_evaluation_adopts_newer_decision() {
        let guard = Arc::new(AuthGuard::new());
        let (release_old, old_gate) = oneshot::channel::<()>();

        // The older evaluation would deny, but finishes after a newer grant.
        let old = tokio::spawn({
            let guard = guard.clone();
            async move {
                guard
                    .admit(async move {
                        let _ = old_gate.await;
                        Decision::Denied
                    })
                    .await
            }
        });
        wait_for_attempts(&guard, 1).await;

        let newer = guard.admit(async { Decision::Granted }).await;
        assert!(newer.current);
        release_old.send(()).unwrap();

        let old = old.await.unwrap();
        assert_eq!(
            old,
            Settled {
                decision: Decision::Granted,
                current: false
            }
        );
        assert_eq!(guard.settled(), Decision::Granted);
    }

    #[tokio::test]
    async fn test_newest_attempt_does_not_wait_for_older_ones() {
        let guard = Arc::new(AuthGuard::new());
        let (release_old, old_gate) = oneshot::channel::<()>();

        let old = tokio::spawn({
            let guard = guard.clone();
            async move {
                guard
                    .admit(async move {
                        let _ = old_gate.await;
                        Decision::Granted
                    })
                    .await
            }
        });
        wait_for_attempts(&guard, 1).await;

        let newest = guard.admit(async { Decision::Denied }).await;
        assert!(newest.current);

        release_old.send(()).unwrap();
        let old = old.await.unwrap();
        assert_eq!(old.decision, Decision::Denied);
        assert!(!old.current);
    }

    #[tokio::test]
    async fn test_superseded_evaluation_publishes_when_newer_is_cancelled() {
        let guard = Arc::new(AuthGuard::new());
        let (release_old, old_gate) = oneshot::channel::<()>();

        let old = tokio::spawn({
            let guard = guard.clone();
            async move {
                guard
                    .admit(async move {
                        let _ = old_gate.await;
                        Decision::Denied
                    })
                    .await
            }
        });
        wait_for_attempts(&guard, 1).await;

        // A newer attempt that never finishes, then goes away with its client
        let abandoned = tokio::spawn({
            let guard = guard.clone();
            async move { guard.admit(std::future::pending::<Decision>()).await }
        });
        wait_for_attempts(&guard, 2).await;
        release_old.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        abandoned.abort();

        let old = tokio::time::timeout(Duration::from_secs(3), old)
            .await
            .expect("older admission must not hang")
            .unwrap();
        assert_eq!(
            old,
            Settled {
                decision: Decision::Denied,
                current: true
            }
        );
        assert_eq!(guard.settled(), Decision::Denied);
        assert!(!guard.is_busy());
    }

    #[tokio::test]
    async fn test_registry_reuses_guards() {
        let registry = GuardRegistry::new();
        let a = registry.guard_for("u1").await;
        let b = registry.guard_for("u1").await;
        let c = registry.guard_for("u2").await;
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_registry_forgets_idle_guards() {
        let registry = GuardRegistry::new();
        let settled = registry.admit("u1", async { Decision::Granted }).await;
        assert!(settled.current);
        assert_eq!(registry.len().await, 0);

        // Held elsewhere, so it stays
        let held = registry.guard_for("u2").await;
        registry.admit("u2", async { Decision::Granted }).await;
        assert_eq!(registry.len().await, 1);
        drop(held);
    }
}
