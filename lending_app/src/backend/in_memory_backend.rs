use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::NaiveDateTime;

use lending_client::api::{
    Booking, BookingId, BookingStatus, Equipment, EquipmentId, EquipmentPayload, EquipmentQuery,
    Loan, LoanId, LoanStatus, NewBooking,
};
use lending_client::error::ApiError;

use crate::backend::LendingBackend;

/// In-process stand-in for the REST backend, enforcing the same rules the
/// server does: capacity at commit time, status transitions only from the
/// states they are valid in. Used for local runs and tests.
pub struct InMemoryLendingBackend {
    equipments: parking_lot::RwLock<HashMap<EquipmentId, Equipment>>,
    bookings: parking_lot::RwLock<HashMap<BookingId, Booking>>,
    loans: parking_lot::RwLock<HashMap<LoanId, Loan>>,
    id_sequence: AtomicI64,
}

impl Default for InMemoryLendingBackend {
    fn default() -> Self {
        Self {
            equipments: Default::default(),
            bookings: Default::default(),
            loans: Default::default(),
            id_sequence: AtomicI64::new(1),
        }
    }
}

fn conflict(message: String) -> ApiError {
    ApiError::RequestFailed {
        status: 409,
        message,
    }
}

fn not_found(message: String) -> ApiError {
    ApiError::RequestFailed {
        status: 404,
        message,
    }
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

impl InMemoryLendingBackend {
    pub fn seed_equipment(&self, payload: &EquipmentPayload) -> EquipmentId {
        let id = self.next_id();
        self.equipments.write().insert(
            id,
            Equipment {
                id,
                name: payload.name.clone(),
                category: Some(payload.category.clone()),
                condition: payload.condition,
                quantity: payload.quantity,
                available: payload.available,
                available_units: Some(payload.quantity),
                created_at: Some(now()),
            },
        );
        id
    }

    fn next_id(&self) -> i64 {
        self.id_sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Units of an equipment committed to borrowers right now.
    fn committed_units(loans: &HashMap<LoanId, Loan>, equipment_id: EquipmentId) -> u32 {
        loans
            .values()
            .filter(|loan| loan.equipment_id == equipment_id && loan.status == LoanStatus::Borrowed)
            .map(|loan| loan.quantity)
            .sum()
    }

    fn with_availability(&self, mut equipment: Equipment) -> Equipment {
        let committed = Self::committed_units(&self.loans.read(), equipment.id);
        let units = equipment.quantity.saturating_sub(committed);
        equipment.available_units = Some(units);
        equipment.available = units > 0;
        equipment
    }

    fn available_units(&self, equipment_id: EquipmentId) -> Result<u32, ApiError> {
        let equipment = self
            .equipments
            .read()
            .get(&equipment_id)
            .cloned()
            .ok_or_else(|| not_found(format!("Equipment {} not found", equipment_id)))?;
        Ok(self.with_availability(equipment).units_on_hand())
    }
}

#[async_trait]
impl LendingBackend for InMemoryLendingBackend {
    async fn list_equipments(&self) -> Result<Vec<Equipment>, ApiError> {
        let mut rows: Vec<Equipment> = self
            .equipments
            .read()
            .values()
            .cloned()
            .map(|equipment| self.with_availability(equipment))
            .collect();
        rows.sort_by_key(|equipment| equipment.id);
        Ok(rows)
    }

    async fn search_equipments(&self, query: &EquipmentQuery) -> Result<Vec<Equipment>, ApiError> {
        let needle = query
            .q
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(str::to_lowercase);
        let category = query
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_lowercase);

        Ok(self
            .list_equipments()
            .await?
            .into_iter()
            .filter(|equipment| {
                needle
                    .as_deref()
                    .is_none_or(|q| equipment.name.to_lowercase().contains(q))
            })
            .filter(|equipment| {
                category.as_deref().is_none_or(|c| {
                    equipment
                        .category
                        .as_deref()
                        .is_some_and(|ec| ec.to_lowercase() == c)
                })
            })
            .filter(|equipment| {
                query
                    .available
                    .is_none_or(|wanted| equipment.available == wanted)
            })
            .collect())
    }

    async fn create_equipment(&self, payload: &EquipmentPayload) -> Result<Equipment, ApiError> {
        let id = self.seed_equipment(payload);
        let equipment = self
            .equipments
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(format!("Equipment {} not found", id)))?;
        Ok(self.with_availability(equipment))
    }

    async fn update_equipment(
        &self,
        id: EquipmentId,
        payload: &EquipmentPayload,
    ) -> Result<Equipment, ApiError> {
        let mut equipments = self.equipments.write();
        let equipment = equipments
            .get_mut(&id)
            .ok_or_else(|| not_found(format!("Equipment {} not found", id)))?;
        equipment.name = payload.name.clone();
        equipment.category = Some(payload.category.clone());
        equipment.condition = payload.condition;
        equipment.quantity = payload.quantity;
        equipment.available = payload.available;
        let updated = equipment.clone();
        drop(equipments);
        Ok(self.with_availability(updated))
    }

    async fn delete_equipment(&self, id: EquipmentId) -> Result<(), ApiError> {
        self.equipments
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| not_found(format!("Equipment {} not found", id)))
    }

    async fn create_booking(&self, booking: &NewBooking) -> Result<Booking, ApiError> {
        let available = self.available_units(booking.equipment_id)?;
        if booking.quantity_requested > available {
            return Err(conflict(format!(
                "only {} items available for this equipment",
                available
            )));
        }

        let equipment_name = self
            .equipments
            .read()
            .get(&booking.equipment_id)
            .map(|equipment| equipment.name.clone());
        let id = self.next_id();
        let record = Booking {
            id,
            equipment_id: booking.equipment_id,
            equipment_name,
            quantity_requested: booking.quantity_requested,
            start_at: booking.start_at,
            end_at: booking.end_at,
            status: BookingStatus::Pending,
            requester_username: None,
            admin_note: None,
            created_at: Some(now()),
            updated_at: None,
        };
        self.bookings.write().insert(id, record.clone());
        Ok(record)
    }

    async fn my_bookings(&self) -> Result<Vec<Booking>, ApiError> {
        let mut rows: Vec<Booking> = self.bookings.read().values().cloned().collect();
        rows.sort_by_key(|booking| booking.id);
        Ok(rows)
    }

    async fn pending_bookings(&self) -> Result<Vec<Booking>, ApiError> {
        let mut rows: Vec<Booking> = self
            .bookings
            .read()
            .values()
            .filter(|booking| booking.status == BookingStatus::Pending)
            .cloned()
            .collect();
        rows.sort_by_key(|booking| booking.id);
        Ok(rows)
    }

    async fn approve_booking(&self, id: BookingId) -> Result<(), ApiError> {
        let booking = {
            let bookings = self.bookings.read();
            bookings
                .get(&id)
                .cloned()
                .ok_or_else(|| not_found(format!("Booking {} not found", id)))?
        };
        if booking.status != BookingStatus::Pending {
            return Err(conflict(format!("Booking {} is not pending", id)));
        }
        // Capacity is re-checked at commit time; a passing client-side check
        // does not reserve anything.
        let available = self.available_units(booking.equipment_id)?;
        if booking.quantity_requested > available {
            return Err(conflict(format!(
                "only {} items available for this equipment",
                available
            )));
        }

        let loan_id = self.next_id();
        self.loans.write().insert(
            loan_id,
            Loan {
                id: loan_id,
                equipment_id: booking.equipment_id,
                equipment_name: booking.equipment_name.clone(),
                quantity: booking.quantity_requested,
                borrowed_at: now(),
                due_at: booking.end_at,
                returned_at: None,
                status: LoanStatus::Borrowed,
            },
        );

        let mut bookings = self.bookings.write();
        if let Some(record) = bookings.get_mut(&id) {
            record.status = BookingStatus::Approved;
            record.updated_at = Some(now());
        }
        Ok(())
    }

    async fn reject_booking(&self, id: BookingId) -> Result<(), ApiError> {
        let mut bookings = self.bookings.write();
        let booking = bookings
            .get_mut(&id)
            .ok_or_else(|| not_found(format!("Booking {} not found", id)))?;
        if booking.status != BookingStatus::Pending {
            return Err(conflict(format!("Booking {} is not pending", id)));
        }
        booking.status = BookingStatus::Rejected;
        booking.updated_at = Some(now());
        Ok(())
    }

    async fn my_loans(&self) -> Result<Vec<Loan>, ApiError> {
        let mut rows: Vec<Loan> = self.loans.read().values().cloned().collect();
        rows.sort_by_key(|loan| loan.id);
        Ok(rows)
    }

    async fn return_loan(&self, id: LoanId) -> Result<(), ApiError> {
        let mut loans = self.loans.write();
        let loan = loans
            .get_mut(&id)
            .ok_or_else(|| not_found(format!("Loan {} not found", id)))?;
        if loan.status != LoanStatus::Borrowed {
            return Err(conflict(format!("Loan {} is not borrowed", id)));
        }
        loan.status = LoanStatus::Returned;
        loan.returned_at = Some(now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use lending_client::api::Condition;

    use super::*;

    fn payload(name: &str, category: &str, quantity: u32) -> EquipmentPayload {
        EquipmentPayload {
            name: name.to_string(),
            category: category.to_string(),
            condition: Some(Condition::Good),
            quantity,
            available: true,
        }
    }

    fn booking(equipment_id: EquipmentId, quantity: u32) -> NewBooking {
        let start = chrono::NaiveDate::from_ymd_opt(2030, 1, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        NewBooking {
            equipment_id,
            quantity_requested: quantity,
            start_at: start,
            end_at: start + chrono::Duration::days(1),
        }
    }

    #[tokio::test]
    async fn booking_lifecycle_commits_and_frees_units() {
        let backend = InMemoryLendingBackend::default();
        let projector = backend.seed_equipment(&payload("Projector", "AV", 3));

        // request 2 of 3 units
        let requested = backend.create_booking(&booking(projector, 2)).await.unwrap();
        assert_eq!(requested.status, BookingStatus::Pending);

        let pending = backend.pending_bookings().await.unwrap();
        assert_eq!(pending.len(), 1);

        backend.approve_booking(requested.id).await.unwrap();

        // approval drops it from pending and commits the units
        assert!(backend.pending_bookings().await.unwrap().is_empty());
        let rows = backend.list_equipments().await.unwrap();
        assert_eq!(rows[0].available_units, Some(1));
        assert!(rows[0].available);

        let loans = backend.my_loans().await.unwrap();
        assert_eq!(loans.len(), 1);
        assert_eq!(loans[0].status, LoanStatus::Borrowed);
        assert_eq!(loans[0].quantity, 2);

        // a second approval is rejected, the transition is terminal
        let again = backend.approve_booking(requested.id).await;
        assert!(matches!(
            again,
            Err(ApiError::RequestFailed { status: 409, .. })
        ));

        // returning frees the units
        backend.return_loan(loans[0].id).await.unwrap();
        let loans = backend.my_loans().await.unwrap();
        assert_eq!(loans[0].status, LoanStatus::Returned);
        assert!(loans[0].returned_at.is_some());
        let rows = backend.list_equipments().await.unwrap();
        assert_eq!(rows[0].available_units, Some(3));

        let return_again = backend.return_loan(loans[0].id).await;
        assert!(matches!(
            return_again,
            Err(ApiError::RequestFailed { status: 409, .. })
        ));
    }

    #[tokio::test]
    async fn capacity_is_enforced_at_request_and_commit_time() {
        let backend = InMemoryLendingBackend::default();
        let camera = backend.seed_equipment(&payload("Camera", "AV", 2));

        let too_many = backend.create_booking(&booking(camera, 3)).await;
        assert!(matches!(
            too_many,
            Err(ApiError::RequestFailed { status: 409, ref message }) if message.contains("only 2 items")
        ));

        // two pending bookings that both fit individually
        let first = backend.create_booking(&booking(camera, 2)).await.unwrap();
        let second = backend.create_booking(&booking(camera, 2)).await.unwrap();

        backend.approve_booking(first.id).await.unwrap();
        // the second no longer fits at commit time
        let lost_race = backend.approve_booking(second.id).await;
        assert!(matches!(
            lost_race,
            Err(ApiError::RequestFailed { status: 409, .. })
        ));
    }

    #[tokio::test]
    async fn reject_is_terminal() {
        let backend = InMemoryLendingBackend::default();
        let tripod = backend.seed_equipment(&payload("Tripod", "AV", 1));
        let requested = backend.create_booking(&booking(tripod, 1)).await.unwrap();

        backend.reject_booking(requested.id).await.unwrap();
        let rows = backend.my_bookings().await.unwrap();
        assert_eq!(rows[0].status, BookingStatus::Rejected);

        let approve_after = backend.approve_booking(requested.id).await;
        assert!(matches!(
            approve_after,
            Err(ApiError::RequestFailed { status: 409, .. })
        ));

        // nothing was committed
        let rows = backend.list_equipments().await.unwrap();
        assert_eq!(rows[0].available_units, Some(1));
    }

    #[tokio::test]
    async fn search_filters_by_text_category_and_availability() {
        let backend = InMemoryLendingBackend::default();
        backend.seed_equipment(&payload("Projector", "AV", 2));
        backend.seed_equipment(&payload("Microscope", "Lab", 1));
        let drained = backend.seed_equipment(&payload("Camera", "AV", 1));

        let requested = backend.create_booking(&booking(drained, 1)).await.unwrap();
        backend.approve_booking(requested.id).await.unwrap();

        let by_text = backend
            .search_equipments(&EquipmentQuery {
                q: Some("micro".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_text.len(), 1);
        assert_eq!(by_text[0].name, "Microscope");

        let by_category = backend
            .search_equipments(&EquipmentQuery {
                category: Some("av".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_category.len(), 2);

        let available_only = backend
            .search_equipments(&EquipmentQuery {
                available: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(available_only.iter().all(|equipment| equipment.name != "Camera"));
    }

    #[tokio::test]
    async fn equipment_crud() {
        let backend = InMemoryLendingBackend::default();
        let created = backend
            .create_equipment(&payload("Laptop", "IT", 5))
            .await
            .unwrap();
        assert_eq!(created.available_units, Some(5));

        let updated = backend
            .update_equipment(created.id, &payload("Laptop 2", "IT", 8))
            .await
            .unwrap();
        assert_eq!(updated.name, "Laptop 2");
        assert_eq!(updated.available_units, Some(8));

        backend.delete_equipment(created.id).await.unwrap();
        let missing = backend.delete_equipment(created.id).await;
        assert!(matches!(
            missing,
            Err(ApiError::RequestFailed { status: 404, .. })
        ));
    }
}
