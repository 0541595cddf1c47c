use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDateTime;

use lending_client::api::{Booking, Equipment, EquipmentId, NewBooking};
use lending_client::error::ApiError;

use crate::backend::LendingBackend;
use crate::query::{keys, QueryCache, QueryError};

/// Pre-submission failures. These never produce a network request.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum ValidationError {
    #[error("no equipment selected")]
    NoEquipmentSelected,

    #[error("quantity must be a positive integer")]
    NonPositiveQuantity,

    #[error("only {available} items available for this equipment")]
    InsufficientUnits { available: u32 },

    #[error("end must be strictly after start")]
    EndNotAfterStart,

    #[error("start must not be in the past")]
    StartInPast,
}

#[derive(thiserror::Error, Debug)]
pub enum BookingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Query(#[from] QueryError),
}

/// What the user has filled in so far.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingDraft {
    pub equipment_id: Option<EquipmentId>,
    pub quantity: i64,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
}

impl BookingDraft {
    /// Validates the draft against the latest known availability and turns
    /// it into the canonical create payload.
    ///
    /// The availability check is advisory: it fast-fails obviously oversized
    /// requests, but the backend re-checks capacity at commit time and may
    /// still reject a draft that passed here.
    pub fn validate(
        &self,
        available_units: &HashMap<EquipmentId, u32>,
        now: NaiveDateTime,
    ) -> Result<NewBooking, ValidationError> {
        let equipment_id = self
            .equipment_id
            .ok_or(ValidationError::NoEquipmentSelected)?;
        if self.quantity <= 0 {
            return Err(ValidationError::NonPositiveQuantity);
        }
        let available = available_units.get(&equipment_id).copied().unwrap_or(0);
        // Anything that does not fit in u32 exceeds availability by definition.
        let quantity = u32::try_from(self.quantity)
            .map_err(|_| ValidationError::InsufficientUnits { available })?;
        if quantity > available {
            return Err(ValidationError::InsufficientUnits { available });
        }
        if self.end_at <= self.start_at {
            return Err(ValidationError::EndNotAfterStart);
        }
        if self.start_at < now {
            return Err(ValidationError::StartInPast);
        }
        Ok(NewBooking {
            equipment_id,
            quantity_requested: quantity,
            start_at: self.start_at,
            end_at: self.end_at,
        })
    }
}

/// Booking request form: local validation, then submission with cache
/// invalidation so every view re-reads the backend's authoritative state.
/// Available units are never decremented locally.
pub struct BookingForm {
    backend: Arc<dyn LendingBackend>,
    cache: Arc<QueryCache>,
}

impl BookingForm {
    pub fn new(backend: Arc<dyn LendingBackend>, cache: Arc<QueryCache>) -> Self {
        Self { backend, cache }
    }

    pub async fn submit(&self, draft: &BookingDraft) -> Result<Booking, BookingError> {
        self.submit_at(draft, chrono::Local::now().naive_local())
            .await
    }

    pub async fn submit_at(
        &self,
        draft: &BookingDraft,
        now: NaiveDateTime,
    ) -> Result<Booking, BookingError> {
        let equipments: Vec<Equipment> = self
            .cache
            .fetch(&keys::equipments(), || async {
                self.backend.list_equipments().await
            })
            .await?;
        let available_units: HashMap<EquipmentId, u32> = equipments
            .iter()
            .map(|equipment| (equipment.id, equipment.units_on_hand()))
            .collect();

        let payload = draft.validate(&available_units, now)?;

        let booking = self.backend.create_booking(&payload).await?;
        tracing::info!(
            "Requested booking {} for equipment {}",
            booking.id,
            booking.equipment_id
        );
        self.cache.invalidate(&keys::equipments());
        self.cache.invalidate(&keys::bookings());
        Ok(booking)
    }
}
