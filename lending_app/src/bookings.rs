use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lending_client::api::{Booking, BookingId, BookingStatus};

use crate::backend::LendingBackend;
use crate::query::{keys, QueryCache, QueryError};
use crate::refresh::RefreshSubscription;

/// The current user's own booking requests.
pub struct MyBookingsView {
    backend: Arc<dyn LendingBackend>,
    cache: Arc<QueryCache>,
}

impl MyBookingsView {
    pub fn new(backend: Arc<dyn LendingBackend>, cache: Arc<QueryCache>) -> Self {
        Self { backend, cache }
    }

    pub async fn load(&self) -> Result<Vec<Booking>, QueryError> {
        self.cache
            .fetch(&keys::my_bookings(), || async {
                self.backend.my_bookings().await
            })
            .await
    }

    pub async fn refresh(&self) -> Result<Vec<Booking>, QueryError> {
        self.cache
            .refetch(&keys::my_bookings(), || async {
                self.backend.my_bookings().await
            })
            .await
    }

    /// Re-polls on every tick until the publisher goes away. Failures are
    /// logged and polling continues; there is no automatic retry beyond the
    /// next tick.
    pub async fn run(&self, mut ticks: RefreshSubscription) {
        while ticks.tick().await.is_some() {
            if let Err(err) = self.refresh().await {
                tracing::warn!("Failed to refresh my bookings: {}", err);
            }
        }
    }
}

enum BookingAction {
    Approve,
    Reject,
}

/// Admin view over pending bookings with approve/reject actions.
///
/// Actions apply only to bookings that were PENDING in the last loaded
/// snapshot; anything else is a no-op, mirroring rows whose buttons are
/// disabled. The backend remains the authority on the actual transition.
pub struct PendingBookingsView {
    backend: Arc<dyn LendingBackend>,
    cache: Arc<QueryCache>,
    snapshot: parking_lot::RwLock<Vec<Booking>>,
    action_in_flight: AtomicBool,
}

impl PendingBookingsView {
    pub fn new(backend: Arc<dyn LendingBackend>, cache: Arc<QueryCache>) -> Self {
        Self {
            backend,
            cache,
            snapshot: parking_lot::RwLock::new(Vec::new()),
            action_in_flight: AtomicBool::new(false),
        }
    }

    pub async fn load(&self) -> Result<Vec<Booking>, QueryError> {
        let rows = self
            .cache
            .fetch(&keys::pending_bookings(), || async {
                self.backend.pending_bookings().await
            })
            .await?;
        *self.snapshot.write() = rows.clone();
        Ok(rows)
    }

    pub async fn refresh(&self) -> Result<Vec<Booking>, QueryError> {
        let rows = self
            .cache
            .refetch(&keys::pending_bookings(), || async {
                self.backend.pending_bookings().await
            })
            .await?;
        *self.snapshot.write() = rows.clone();
        Ok(rows)
    }

    /// Whether the approve/reject controls are enabled for this booking.
    pub fn can_action(&self, id: BookingId) -> bool {
        self.snapshot
            .read()
            .iter()
            .any(|booking| booking.id == id && booking.status == BookingStatus::Pending)
    }

    /// Approves a pending booking. Returns `Ok(false)` when the action was
    /// skipped (row not pending, or another action still outstanding).
    pub async fn approve(&self, id: BookingId) -> Result<bool, QueryError> {
        self.action(id, BookingAction::Approve).await
    }

    /// Rejects a pending booking; same no-op semantics as [`Self::approve`].
    pub async fn reject(&self, id: BookingId) -> Result<bool, QueryError> {
        self.action(id, BookingAction::Reject).await
    }

    async fn action(&self, id: BookingId, action: BookingAction) -> Result<bool, QueryError> {
        if !self.can_action(id) {
            return Ok(false);
        }
        // One outstanding mutation at a time; a second click is ignored
        // while the first is in flight.
        if self.action_in_flight.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        // The guard also clears the flag when this future is dropped
        // mid-request, so an abandoned action cannot wedge the view.
        let _guard = ActionGuard {
            flag: &self.action_in_flight,
        };
        let result = match action {
            BookingAction::Approve => self.backend.approve_booking(id).await,
            BookingAction::Reject => self.backend.reject_booking(id).await,
        };
        result?;
        // Approval changes availability and the requester's own list, so all
        // three views must re-read the backend.
        self.cache.invalidate(&keys::pending_bookings());
        self.cache.invalidate(&keys::equipments());
        self.cache.invalidate(&keys::my_bookings());
        Ok(true)
    }
}

struct ActionGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for ActionGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::NaiveDateTime;

    use lending_client::api::{
        Condition, Equipment, EquipmentId, EquipmentPayload, EquipmentQuery, Loan, LoanId,
        NewBooking,
    };
    use lending_client::error::ApiError;

    use crate::backend::InMemoryLendingBackend;

    use super::*;

    fn datetime(s: &str) -> NaiveDateTime {
        s.parse().unwrap()
    }

    async fn backend_with_pending(quantity: u32, requested: u32) -> (Arc<InMemoryLendingBackend>, BookingId) {
        let backend = Arc::new(InMemoryLendingBackend::default());
        let equipment_id = backend.seed_equipment(&EquipmentPayload {
            name: "Projector".to_string(),
            category: "AV".to_string(),
            condition: Some(Condition::New),
            quantity,
            available: true,
        });
        let booking = backend
            .create_booking(&NewBooking {
                equipment_id,
                quantity_requested: requested,
                start_at: datetime("2030-01-01T10:00:00"),
                end_at: datetime("2030-01-02T10:00:00"),
            })
            .await
            .unwrap();
        (backend, booking.id)
    }

    #[tokio::test]
    async fn approve_invalidates_the_related_views() {
        let (backend, booking_id) = backend_with_pending(3, 2).await;
        let cache = Arc::new(QueryCache::default());
        let view = PendingBookingsView::new(backend.clone(), cache.clone());

        // warm all three related cache entries
        view.load().await.unwrap();
        cache
            .fetch(&keys::equipments(), || async {
                backend.list_equipments().await
            })
            .await
            .unwrap();
        cache
            .fetch(&keys::my_bookings(), || async {
                backend.my_bookings().await
            })
            .await
            .unwrap();

        assert!(view.can_action(booking_id));
        assert!(view.approve(booking_id).await.unwrap());

        assert!(!cache.contains(&keys::pending_bookings()));
        assert!(!cache.contains(&keys::equipments()));
        assert!(!cache.contains(&keys::my_bookings()));

        // next fetch reflects the transition: gone from pending, units committed
        let pending = view.refresh().await.unwrap();
        assert!(pending.is_empty());
        let rows = backend.list_equipments().await.unwrap();
        assert_eq!(rows[0].available_units, Some(1));
    }

    #[tokio::test]
    async fn actions_are_noops_once_not_pending() {
        let (backend, booking_id) = backend_with_pending(3, 1).await;
        let cache = Arc::new(QueryCache::default());
        let view = PendingBookingsView::new(backend.clone(), cache.clone());
        view.load().await.unwrap();

        assert!(view.reject(booking_id).await.unwrap());
        view.refresh().await.unwrap();

        // the booking left the snapshot, so both actions are disabled
        assert!(!view.can_action(booking_id));
        assert!(!view.approve(booking_id).await.unwrap());
        assert!(!view.reject(booking_id).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_rows_are_not_actionable() {
        let (backend, _) = backend_with_pending(1, 1).await;
        let view = PendingBookingsView::new(backend, Arc::new(QueryCache::default()));
        view.load().await.unwrap();
        assert!(!view.approve(999).await.unwrap());
    }

    #[tokio::test]
    async fn backend_refusal_surfaces_as_request_failure() {
        let (backend, booking_id) = backend_with_pending(3, 2).await;
        let cache = Arc::new(QueryCache::default());
        let view = PendingBookingsView::new(backend.clone(), cache);
        view.load().await.unwrap();

        // the booking is resolved behind the view's back
        backend.approve_booking(booking_id).await.unwrap();

        // the stale snapshot still enables the button; the backend refuses
        let result = view.approve(booking_id).await;
        assert!(matches!(
            result,
            Err(QueryError::Api(ApiError::RequestFailed { status: 409, .. }))
        ));
    }

    /// Delegates to the in-memory backend but makes approvals take a while,
    /// so tests can observe the in-flight window.
    struct DelayedApprovals {
        inner: Arc<InMemoryLendingBackend>,
        delay: Duration,
        approve_calls: AtomicUsize,
    }

    impl DelayedApprovals {
        fn new(inner: Arc<InMemoryLendingBackend>, delay: Duration) -> Self {
            Self {
                inner,
                delay,
                approve_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LendingBackend for DelayedApprovals {
        async fn list_equipments(&self) -> Result<Vec<Equipment>, ApiError> {
            self.inner.list_equipments().await
        }

        async fn search_equipments(
            &self,
            query: &EquipmentQuery,
        ) -> Result<Vec<Equipment>, ApiError> {
            self.inner.search_equipments(query).await
        }

        async fn create_equipment(
            &self,
            payload: &EquipmentPayload,
        ) -> Result<Equipment, ApiError> {
            self.inner.create_equipment(payload).await
        }

        async fn update_equipment(
            &self,
            id: EquipmentId,
            payload: &EquipmentPayload,
        ) -> Result<Equipment, ApiError> {
            self.inner.update_equipment(id, payload).await
        }

        async fn delete_equipment(&self, id: EquipmentId) -> Result<(), ApiError> {
            self.inner.delete_equipment(id).await
        }

        async fn create_booking(&self, booking: &NewBooking) -> Result<Booking, ApiError> {
            self.inner.create_booking(booking).await
        }

        async fn my_bookings(&self) -> Result<Vec<Booking>, ApiError> {
            self.inner.my_bookings().await
        }

        async fn pending_bookings(&self) -> Result<Vec<Booking>, ApiError> {
            self.inner.pending_bookings().await
        }

        async fn approve_booking(&self, id: BookingId) -> Result<(), ApiError> {
            self.approve_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.inner.approve_booking(id).await
        }

        async fn reject_booking(&self, id: BookingId) -> Result<(), ApiError> {
            self.inner.reject_booking(id).await
        }

        async fn my_loans(&self) -> Result<Vec<Loan>, ApiError> {
            self.inner.my_loans().await
        }

        async fn return_loan(&self, id: LoanId) -> Result<(), ApiError> {
            self.inner.return_loan(id).await
        }
    }

    #[tokio::test]
    async fn concurrent_clicks_send_one_request() {
        let (inner, booking_id) = backend_with_pending(3, 1).await;
        let backend = Arc::new(DelayedApprovals::new(inner, Duration::from_millis(50)));
        let view = PendingBookingsView::new(backend.clone(), Arc::new(QueryCache::default()));
        view.load().await.unwrap();

        let (first, second) = tokio::join!(view.approve(booking_id), view.approve(booking_id));
        let outcomes = (first.unwrap(), second.unwrap());
        // exactly one of the clicks went through
        assert!(outcomes == (true, false) || outcomes == (false, true));
        assert_eq!(backend.approve_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abandoned_action_does_not_wedge_the_view() {
        let (inner, booking_id) = backend_with_pending(3, 1).await;
        let backend = Arc::new(DelayedApprovals::new(inner, Duration::from_millis(50)));
        let view = PendingBookingsView::new(backend.clone(), Arc::new(QueryCache::default()));
        view.load().await.unwrap();

        // the first attempt is dropped mid-request
        let abandoned =
            tokio::time::timeout(Duration::from_millis(5), view.approve(booking_id)).await;
        assert!(abandoned.is_err());

        // the view accepts the next action instead of ignoring it forever
        assert!(view.approve(booking_id).await.unwrap());
        assert!(view.refresh().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_polls_on_ticks_until_the_publisher_stops() {
        use crate::refresh::AutoRefresh;

        let (backend, _) = backend_with_pending(3, 1).await;
        let cache = Arc::new(QueryCache::default());
        let view = Arc::new(MyBookingsView::new(backend, cache.clone()));

        let refresh = AutoRefresh::start(Duration::from_millis(5));
        let task = tokio::spawn({
            let view = view.clone();
            let ticks = refresh.subscribe();
            async move { view.run(ticks).await }
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.contains(&keys::my_bookings()));

        // dropping the publisher ends the polling loop
        drop(refresh);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn my_bookings_view_caches_between_loads() {
        let (backend, _) = backend_with_pending(3, 1).await;
        let cache = Arc::new(QueryCache::default());
        let view = MyBookingsView::new(backend.clone(), cache.clone());

        let first = view.load().await.unwrap();
        assert_eq!(first.len(), 1);

        // a second booking appears only after a refresh, not a cached load
        backend
            .create_booking(&NewBooking {
                equipment_id: first[0].equipment_id,
                quantity_requested: 1,
                start_at: datetime("2030-02-01T10:00:00"),
                end_at: datetime("2030-02-02T10:00:00"),
            })
            .await
            .unwrap();

        assert_eq!(view.load().await.unwrap().len(), 1);
        assert_eq!(view.refresh().await.unwrap().len(), 2);
    }
}
