pub use in_memory_backend::InMemoryLendingBackend;

use async_trait::async_trait;

use lending_client::api::{
    Booking, BookingId, Equipment, EquipmentId, EquipmentPayload, EquipmentQuery, Loan, LoanId,
    NewBooking,
};
use lending_client::client::LendingApiClient;
use lending_client::error::ApiError;

mod in_memory_backend;

/// Data-plane operations the views run against. Implemented over HTTP by
/// [`LendingApiClient`] and in-process by [`InMemoryLendingBackend`].
#[async_trait]
pub trait LendingBackend: Send + Sync {
    async fn list_equipments(&self) -> Result<Vec<Equipment>, ApiError>;
    async fn search_equipments(&self, query: &EquipmentQuery) -> Result<Vec<Equipment>, ApiError>;
    async fn create_equipment(&self, payload: &EquipmentPayload) -> Result<Equipment, ApiError>;
    async fn update_equipment(
        &self,
        id: EquipmentId,
        payload: &EquipmentPayload,
    ) -> Result<Equipment, ApiError>;
    async fn delete_equipment(&self, id: EquipmentId) -> Result<(), ApiError>;

    async fn create_booking(&self, booking: &NewBooking) -> Result<Booking, ApiError>;
    async fn my_bookings(&self) -> Result<Vec<Booking>, ApiError>;
    async fn pending_bookings(&self) -> Result<Vec<Booking>, ApiError>;
    async fn approve_booking(&self, id: BookingId) -> Result<(), ApiError>;
    async fn reject_booking(&self, id: BookingId) -> Result<(), ApiError>;

    async fn my_loans(&self) -> Result<Vec<Loan>, ApiError>;
    async fn return_loan(&self, id: LoanId) -> Result<(), ApiError>;
}

#[async_trait]
impl LendingBackend for LendingApiClient {
    async fn list_equipments(&self) -> Result<Vec<Equipment>, ApiError> {
        LendingApiClient::list_equipments(self).await
    }

    async fn search_equipments(&self, query: &EquipmentQuery) -> Result<Vec<Equipment>, ApiError> {
        LendingApiClient::search_equipments(self, query).await
    }

    async fn create_equipment(&self, payload: &EquipmentPayload) -> Result<Equipment, ApiError> {
        LendingApiClient::create_equipment(self, payload).await
    }

    async fn update_equipment(
        &self,
        id: EquipmentId,
        payload: &EquipmentPayload,
    ) -> Result<Equipment, ApiError> {
        LendingApiClient::update_equipment(self, id, payload).await
    }

    async fn delete_equipment(&self, id: EquipmentId) -> Result<(), ApiError> {
        LendingApiClient::delete_equipment(self, id).await
    }

    async fn create_booking(&self, booking: &NewBooking) -> Result<Booking, ApiError> {
        LendingApiClient::create_booking(self, booking).await
    }

    async fn my_bookings(&self) -> Result<Vec<Booking>, ApiError> {
        LendingApiClient::my_bookings(self).await
    }

    async fn pending_bookings(&self) -> Result<Vec<Booking>, ApiError> {
        LendingApiClient::pending_bookings(self).await
    }

    async fn approve_booking(&self, id: BookingId) -> Result<(), ApiError> {
        LendingApiClient::approve_booking(self, id).await
    }

    async fn reject_booking(&self, id: BookingId) -> Result<(), ApiError> {
        LendingApiClient::reject_booking(self, id).await
    }

    async fn my_loans(&self) -> Result<Vec<Loan>, ApiError> {
        LendingApiClient::my_loans(self).await
    }

    async fn return_loan(&self, id: LoanId) -> Result<(), ApiError> {
        LendingApiClient::return_loan(self, id).await
    }
}
