use anyhow::Context;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_tracing::TracingMiddleware;

use crate::api::{
    Booking, BookingId, Credentials, Equipment, EquipmentId, EquipmentPayload, EquipmentQuery,
    Loan, LoanId, LoginResponse, NewBooking, User,
};
use crate::error::{error_from_response, ApiError};

/// Typed client for the equipment lending REST API.
///
/// Holds the session bearer token; once set it is attached to every
/// outbound request as `Authorization: Bearer <token>`.
pub struct LendingApiClient {
    url: String,
    client: ClientWithMiddleware,
    bearer_token: parking_lot::RwLock<Option<String>>,
}

impl LendingApiClient {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .build()
            .context("Failed to build reqwest client")?;
        let client = ClientBuilder::new(reqwest_client)
            // Insert the tracing middleware
            .with(TracingMiddleware::default())
            .build();

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            client,
            bearer_token: parking_lot::RwLock::new(None),
        })
    }

    pub fn set_bearer_token(&self, token: &str) {
        *self.bearer_token.write() = Some(token.to_string());
    }

    pub fn clear_bearer_token(&self) {
        *self.bearer_token.write() = None;
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.bearer_token.read().as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Calls POST /auth/login endpoint
    pub async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, ApiError> {
        let response = self
            .client
            .post(format!("{}/auth/login", self.url))
            .json(credentials)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Calls POST /auth/signup endpoint
    pub async fn signup(&self, credentials: &Credentials) -> Result<(), ApiError> {
        let response = self
            .client
            .post(format!("{}/auth/signup", self.url))
            .json(credentials)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Calls GET /auth/me endpoint
    /// Returns the profile of the currently authenticated user
    pub async fn me(&self) -> Result<User, ApiError> {
        let response = self
            .authorized(self.client.get(format!("{}/auth/me", self.url)))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Calls GET /equipments endpoint
    pub async fn list_equipments(&self) -> Result<Vec<Equipment>, ApiError> {
        let response = self
            .authorized(self.client.get(format!("{}/equipments", self.url)))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Calls GET /equipments/search endpoint with q/category/available params
    pub async fn search_equipments(
        &self,
        query: &EquipmentQuery,
    ) -> Result<Vec<Equipment>, ApiError> {
        let response = self
            .authorized(
                self.client
                    .get(format!("{}/equipments/search", self.url))
                    .query(&query.to_query_pairs()),
            )
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Calls POST /equipments endpoint (admin)
    pub async fn create_equipment(
        &self,
        payload: &EquipmentPayload,
    ) -> Result<Equipment, ApiError> {
        let response = self
            .authorized(self.client.post(format!("{}/equipments", self.url)))
            .json(payload)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Calls PUT /equipments/{id} endpoint (admin)
    pub async fn update_equipment(
        &self,
        id: EquipmentId,
        payload: &EquipmentPayload,
    ) -> Result<Equipment, ApiError> {
        let response = self
            .authorized(self.client.put(format!("{}/equipments/{}", self.url, id)))
            .json(payload)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Calls DELETE /equipments/{id} endpoint (admin)
    pub async fn delete_equipment(&self, id: EquipmentId) -> Result<(), ApiError> {
        let response = self
            .authorized(
                self.client
                    .delete(format!("{}/equipments/{}", self.url, id)),
            )
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Calls POST /bookings endpoint
    pub async fn create_booking(&self, booking: &NewBooking) -> Result<Booking, ApiError> {
        let response = self
            .authorized(self.client.post(format!("{}/bookings", self.url)))
            .json(booking)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Calls GET /bookings/my endpoint
    pub async fn my_bookings(&self) -> Result<Vec<Booking>, ApiError> {
        let response = self
            .authorized(self.client.get(format!("{}/bookings/my", self.url)))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Calls GET /bookings/pending endpoint (admin)
    pub async fn pending_bookings(&self) -> Result<Vec<Booking>, ApiError> {
        let response = self
            .authorized(self.client.get(format!("{}/bookings/pending", self.url)))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Calls POST /bookings/{id}/approve endpoint (admin)
    /// Only valid while the booking is still PENDING; the backend rejects
    /// the transition otherwise.
    pub async fn approve_booking(&self, id: BookingId) -> Result<(), ApiError> {
        let response = self
            .authorized(
                self.client
                    .post(format!("{}/bookings/{}/approve", self.url, id)),
            )
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Calls POST /bookings/{id}/reject endpoint (admin)
    pub async fn reject_booking(&self, id: BookingId) -> Result<(), ApiError> {
        let response = self
            .authorized(
                self.client
                    .post(format!("{}/bookings/{}/reject", self.url, id)),
            )
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Calls GET /loans/my endpoint
    pub async fn my_loans(&self) -> Result<Vec<Loan>, ApiError> {
        let response = self
            .authorized(self.client.get(format!("{}/loans/my", self.url)))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(error_from_response(response).await)
        }
    }

    /// Calls POST /loans/{id}/return endpoint
    pub async fn return_loan(&self, id: LoanId) -> Result<(), ApiError> {
        let response = self
            .authorized(self.client.post(format!("{}/loans/{}/return", self.url, id)))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }
}
