use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    async_trait::async_trait,
    chrono::Utc,
    serde::{Deserialize, Serialize},
    tokio::sync::Mutex,
    tracing::info,
};

use drover_common::fs as dfs;

use crate::{
    Error, Result,
    types::{HumanRequest, NewRequest, RequestState, transition_allowed},
};

/// Receives best-effort notifications about new requests. The Telegram
/// bridge (out of process) registers one of these; so can tests.
#[async_trait]
pub trait RequestListener: Send + Sync {
    async fn created(&self, request: &HumanRequest);
}

/// Default listener: surfaces new requests as structured log events.
pub struct TracingListener;

#[async_trait]
impl RequestListener for TracingListener {
    async fn created(&self, request: &HumanRequest) {
        info!(
            request_id = request.request_id,
            kind = ?request.kind,
            priority = request.priority,
            title = %request.title,
            "human request created"
        );
    }
}

#[derive(Default, Serialize, Deserialize)]
struct StoreDocument {
    counter: u64,
    requests: Vec<HumanRequest>,
}

struct StoreInner {
    counter: u64,
    requests: BTreeMap<u64, HumanRequest>,
}

/// Durable single-writer store for human requests.
pub struct HumanRequestStore {
    path: PathBuf,
    inner: Mutex<StoreInner>,
    listeners: Mutex<Vec<Arc<dyn RequestListener>>>,
}

impl HumanRequestStore {
    /// Load the store from `<data_dir>/human_requests/requests.json`,
    /// starting empty when the file does not exist.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join("human_requests").join("requests.json");
        let doc = dfs::read_json::<StoreDocument>(&path)
            .await?
            .unwrap_or_default();

        let mut requests = BTreeMap::new();
        for request in doc.requests {
            requests.insert(request.request_id, request);
        }

        Ok(Self {
            path,
            inner: Mutex::new(StoreInner {
                counter: doc.counter,
                requests,
            }),
            listeners: Mutex::new(Vec::new()),
        })
    }

    pub async fn add_listener(&self, listener: Arc<dyn RequestListener>) {
        self.listeners.lock().await.push(listener);
    }

    /// Create a request in `pending` state and notify listeners.
    pub async fn create(&self, new: NewRequest) -> Result<HumanRequest> {
        let request = {
            let mut inner = self.inner.lock().await;
            inner.counter += 1;
            let request = HumanRequest {
                request_id: inner.counter,
                kind: new.kind,
                title: new.title,
                description: new.description,
                estimated_cost: new.estimated_cost,
                priority: new.priority.clamp(1, 10),
                state: RequestState::Pending,
                created_at: Utc::now(),
                created_by: new.created_by,
                approved_at: None,
                completed_at: None,
                actual_cost: None,
                notes: String::new(),
            };
            inner.requests.insert(request.request_id, request.clone());
            self.persist(&inner).await?;
            request
        };

        // Best-effort: listener trouble never fails the create.
        for listener in self.listeners.lock().await.iter() {
            listener.created(&request).await;
        }
        Ok(request)
    }

    pub async fn approve(&self, request_id: u64) -> Result<HumanRequest> {
        self.transition(request_id, RequestState::Approved, |request| {
            request.approved_at = Some(Utc::now());
        })
        .await
    }

    pub async fn reject(&self, request_id: u64) -> Result<HumanRequest> {
        self.transition(request_id, RequestState::Rejected, |_| {}).await
    }

    /// Mark an approved request done, recording what it actually cost.
    pub async fn complete(
        &self,
        request_id: u64,
        actual_cost: Option<f64>,
        notes: Option<String>,
    ) -> Result<HumanRequest> {
        self.transition(request_id, RequestState::Completed, |request| {
            request.completed_at = Some(Utc::now());
            request.actual_cost = actual_cost;
            if let Some(notes) = notes {
                request.notes = notes;
            }
        })
        .await
    }

    pub async fn cancel(&self, request_id: u64) -> Result<HumanRequest> {
        self.transition(request_id, RequestState::Cancelled, |_| {}).await
    }

    pub async fn get(&self, request_id: u64) -> Option<HumanRequest> {
        self.inner.lock().await.requests.get(&request_id).cloned()
    }

    /// Pending requests, highest priority first, oldest first within a
    /// priority.
    pub async fn list_pending(&self) -> Vec<HumanRequest> {
        self.list_filtered(|r| r.state == RequestState::Pending).await
    }

    pub async fn list_all(&self) -> Vec<HumanRequest> {
        self.list_filtered(|_| true).await
    }

    pub async fn pending_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .requests
            .values()
            .filter(|r| r.state == RequestState::Pending)
            .count()
    }

    async fn list_filtered(&self, keep: impl Fn(&HumanRequest) -> bool) -> Vec<HumanRequest> {
        let inner = self.inner.lock().await;
        let mut requests: Vec<HumanRequest> =
            inner.requests.values().filter(|r| keep(r)).cloned().collect();
        requests.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        requests
    }

    async fn transition(
        &self,
        request_id: u64,
        to: RequestState,
        apply: impl FnOnce(&mut HumanRequest),
    ) -> Result<HumanRequest> {
        let mut inner = self.inner.lock().await;
        let request = inner
            .requests
            .get_mut(&request_id)
            .ok_or(Error::NotFound(request_id))?;

        if !transition_allowed(request.state, to) {
            return Err(Error::InvalidStateTransition {
                request_id,
                from: request.state,
                to,
            });
        }

        request.state = to;
        apply(request);
        info!(request_id, state = ?to, "human request transitioned");
        let updated = request.clone();
        self.persist(&inner).await?;
        Ok(updated)
    }

    async fn persist(&self, inner: &StoreInner) -> Result<()> {
        let doc = StoreDocument {
            counter: inner.counter,
            requests: inner.requests.values().cloned().collect(),
        };
        dfs::atomic_write_json(&self.path, &doc).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::RequestKind;

    fn payment(priority: u8) -> NewRequest {
        NewRequest {
            kind: RequestKind::Payment,
            title: "Renew domain".into(),
            description: "drover.example expires next week".into(),
            estimated_cost: Some(15.0),
            priority,
            created_by: "installer".into(),
        }
    }

    async fn store() -> (HumanRequestStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = HumanRequestStore::load(dir.path()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn full_payment_lifecycle() {
        let (store, _dir) = store().await;

        let created = store.create(payment(8)).await.unwrap();
        assert_eq!(created.state, RequestState::Pending);
        assert_eq!(created.estimated_cost, Some(15.0));

        let approved = store.approve(created.request_id).await.unwrap();
        assert_eq!(approved.state, RequestState::Approved);
        assert!(approved.approved_at.is_some());

        let completed = store
            .complete(created.request_id, Some(14.88), None)
            .await
            .unwrap();
        assert_eq!(completed.state, RequestState::Completed);
        assert_eq!(completed.actual_cost, Some(14.88));
        assert_eq!(completed.estimated_cost, Some(15.0));
        assert!(completed.completed_at.is_some());

        // Rejecting a completed request is illegal.
        let err = store.reject(created.request_id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn complete_requires_prior_approval() {
        let (store, _dir) = store().await;
        let created = store.create(payment(5)).await.unwrap();

        let err = store
            .complete(created.request_id, Some(1.0), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn cancel_is_legal_from_pending_and_approved_only() {
        let (store, _dir) = store().await;

        let a = store.create(payment(5)).await.unwrap();
        store.cancel(a.request_id).await.unwrap();

        let b = store.create(payment(5)).await.unwrap();
        store.approve(b.request_id).await.unwrap();
        store.cancel(b.request_id).await.unwrap();

        let c = store.create(payment(5)).await.unwrap();
        store.reject(c.request_id).await.unwrap();
        assert!(matches!(
            store.cancel(c.request_id).await,
            Err(Error::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let (store, _dir) = store().await;
        assert!(matches!(store.approve(42).await, Err(Error::NotFound(42))));
    }

    #[tokio::test]
    async fn pending_list_orders_by_priority_then_age() {
        let (store, _dir) = store().await;
        let low = store.create(payment(3)).await.unwrap();
        let high = store.create(payment(9)).await.unwrap();
        let mid_old = store.create(payment(5)).await.unwrap();
        let mid_new = store.create(payment(5)).await.unwrap();

        let pending: Vec<u64> = store
            .list_pending()
            .await
            .into_iter()
            .map(|r| r.request_id)
            .collect();
        assert_eq!(pending, vec![
            high.request_id,
            mid_old.request_id,
            mid_new.request_id,
            low.request_id
        ]);
    }

    #[tokio::test]
    async fn ids_stay_monotonic_across_reload() {
        let dir = tempfile::tempdir().unwrap();

        let first_id = {
            let store = HumanRequestStore::load(dir.path()).await.unwrap();
            store.create(payment(5)).await.unwrap().request_id
        };

        let store = HumanRequestStore::load(dir.path()).await.unwrap();
        let next = store.create(payment(5)).await.unwrap();
        assert_eq!(next.request_id, first_id + 1);

        // The reloaded store still has the original request.
        assert!(store.get(first_id).await.is_some());
    }

    #[tokio::test]
    async fn listener_sees_created_requests() {
        struct Recorder(Mutex<Vec<u64>>);

        #[async_trait]
        impl RequestListener for Recorder {
            async fn created(&self, request: &HumanRequest) {
                self.0.lock().await.push(request.request_id);
            }
        }

        let (store, _dir) = store().await;
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        store.add_listener(recorder.clone()).await;

        let created = store.create(payment(5)).await.unwrap();
        assert_eq!(*recorder.0.lock().await, vec![created.request_id]);
    }

    #[tokio::test]
    async fn priority_is_clamped_to_range() {
        let (store, _dir) = store().await;
        let request = store
            .create(NewRequest {
                priority: 99,
                ..payment(5)
            })
            .await
            .unwrap();
        assert_eq!(request.priority, 10);
    }
}
