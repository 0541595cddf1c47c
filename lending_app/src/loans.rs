use std::sync::Arc;

use lending_client::api::{Loan, LoanId, LoanStatus};

use crate::backend::LendingBackend;
use crate::query::{keys, QueryCache, QueryError};
use crate::refresh::RefreshSubscription;

/// The current user's loans, with the return action.
pub struct MyLoansView {
    backend: Arc<dyn LendingBackend>,
    cache: Arc<QueryCache>,
    snapshot: parking_lot::RwLock<Vec<Loan>>,
}

impl MyLoansView {
    pub fn new(backend: Arc<dyn LendingBackend>, cache: Arc<QueryCache>) -> Self {
        Self {
            backend,
            cache,
            snapshot: parking_lot::RwLock::new(Vec::new()),
        }
    }

    pub async fn load(&self) -> Result<Vec<Loan>, QueryError> {
        let rows = self
            .cache
            .fetch(&keys::my_loans(), || async { self.backend.my_loans().await })
            .await?;
        *self.snapshot.write() = rows.clone();
        Ok(rows)
    }

    pub async fn refresh(&self) -> Result<Vec<Loan>, QueryError> {
        let rows = self
            .cache
            .refetch(&keys::my_loans(), || async { self.backend.my_loans().await })
            .await?;
        *self.snapshot.write() = rows.clone();
        Ok(rows)
    }

    /// Only loans still out can be returned; RETURNED and OVERDUE-returned
    /// rows are inert.
    pub fn can_return(&self, id: LoanId) -> bool {
        self.snapshot
            .read()
            .iter()
            .any(|loan| loan.id == id && loan.status == LoanStatus::Borrowed)
    }

    /// Returns a borrowed loan. `Ok(false)` means the row was not
    /// actionable and nothing was sent. A return frees units, so equipment
    /// availability is re-read as well.
    pub async fn return_loan(&self, id: LoanId) -> Result<bool, QueryError> {
        if !self.can_return(id) {
            return Ok(false);
        }
        self.backend.return_loan(id).await?;
        self.cache.invalidate(&keys::loans());
        self.cache.invalidate(&keys::equipments());
        Ok(true)
    }

    pub async fn run(&self, mut ticks: RefreshSubscription) {
        while ticks.tick().await.is_some() {
            if let Err(err) = self.refresh().await {
                tracing::warn!("Failed to refresh my loans: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;

    use lending_client::api::{Condition, EquipmentPayload, NewBooking};

    use crate::backend::{InMemoryLendingBackend, LendingBackend};

    use super::*;

    fn datetime(s: &str) -> NaiveDateTime {
        s.parse().unwrap()
    }

    async fn backend_with_loan() -> (Arc<InMemoryLendingBackend>, LoanId) {
        let backend = Arc::new(InMemoryLendingBackend::default());
        let equipment_id = backend.seed_equipment(&EquipmentPayload {
            name: "Microscope".to_string(),
            category: "Lab".to_string(),
            condition: Some(Condition::Good),
            quantity: 2,
            available: true,
        });
        let booking = backend
            .create_booking(&NewBooking {
                equipment_id,
                quantity_requested: 1,
                start_at: datetime("2030-01-01T10:00:00"),
                end_at: datetime("2030-01-02T10:00:00"),
            })
            .await
            .unwrap();
        backend.approve_booking(booking.id).await.unwrap();
        let loans = backend.my_loans().await.unwrap();
        (backend, loans[0].id)
    }

    #[tokio::test]
    async fn return_flow_updates_status_and_invalidates() {
        let (backend, loan_id) = backend_with_loan().await;
        let cache = Arc::new(QueryCache::default());
        let view = MyLoansView::new(backend.clone(), cache.clone());

        view.load().await.unwrap();
        cache
            .fetch(&keys::equipments(), || async {
                backend.list_equipments().await
            })
            .await
            .unwrap();

        assert!(view.can_return(loan_id));
        assert!(view.return_loan(loan_id).await.unwrap());

        assert!(!cache.contains(&keys::my_loans()));
        assert!(!cache.contains(&keys::equipments()));

        // next fetch shows RETURNED and the row is no longer actionable
        let rows = view.refresh().await.unwrap();
        assert_eq!(rows[0].status, LoanStatus::Returned);
        assert!(!view.can_return(loan_id));
        assert!(!view.return_loan(loan_id).await.unwrap());

        // the freed units are visible on the next equipment read
        let equipments = backend.list_equipments().await.unwrap();
        assert_eq!(equipments[0].available_units, Some(2));
    }

    #[tokio::test]
    async fn unknown_loans_are_not_actionable() {
        let (backend, _) = backend_with_loan().await;
        let view = MyLoansView::new(backend, Arc::new(QueryCache::default()));
        view.load().await.unwrap();
        assert!(!view.return_loan(42).await.unwrap());
    }
}
