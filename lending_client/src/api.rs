use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub type EquipmentId = i64;
pub type BookingId = i64;
pub type LoanId = i64;
pub type UserId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Condition {
    New,
    Good,
    Fair,
    Poor,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Equipment {
    pub id: EquipmentId,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub condition: Option<Condition>,
    pub quantity: u32,
    #[serde(default)]
    pub available: bool,
    /// Derived by the backend: quantity minus units on approved/borrowed bookings.
    #[serde(default)]
    pub available_units: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDateTime>,
}

impl Equipment {
    /// Units currently bookable. Older backends omit `availableUnits`
    /// and only report the raw inventory quantity.
    pub fn units_on_hand(&self) -> u32 {
        self.available_units.unwrap_or(self.quantity)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
}

impl BookingStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, BookingStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: BookingId,
    pub equipment_id: EquipmentId,
    #[serde(default)]
    pub equipment_name: Option<String>,
    pub quantity_requested: u32,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
    pub status: BookingStatus,
    #[serde(default)]
    pub requester_username: Option<String>,
    #[serde(default)]
    pub admin_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<NaiveDateTime>,
}

/// Body of POST /bookings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewBooking {
    pub equipment_id: EquipmentId,
    pub quantity_requested: u32,
    pub start_at: NaiveDateTime,
    pub end_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    Borrowed,
    Returned,
    /// Derived server-side once the due date passes without a return.
    Overdue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: LoanId,
    pub equipment_id: EquipmentId,
    #[serde(default)]
    pub equipment_name: Option<String>,
    pub quantity: u32,
    pub borrowed_at: NaiveDateTime,
    pub due_at: NaiveDateTime,
    #[serde(default)]
    pub returned_at: Option<NaiveDateTime>,
    pub status: LoanStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    RoleUser,
    RoleAdmin,
    RoleStaff,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: Option<UserId>,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<Role>,
}

/// Body of POST /auth/login and POST /auth/signup.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Login responses are not uniform across backend deployments: the token
/// arrives as `accessToken`, `token` or `jwt`, and the profile may be missing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub jwt: Option<String>,
    #[serde(default)]
    pub user: Option<User>,
}

impl LoginResponse {
    /// Picks the first usable token field and the optional profile.
    pub fn into_parts(self) -> (Option<String>, Option<User>) {
        let token = self
            .access_token
            .or(self.token)
            .or(self.jwt)
            .filter(|t| !t.trim().is_empty() && t != "undefined");
        (token, self.user)
    }
}

/// Body of POST /equipments and PUT /equipments/{id} (admin only).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentPayload {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub condition: Option<Condition>,
    pub quantity: u32,
    pub available: bool,
}

/// Filter for GET /equipments/search. An inactive filter means the plain
/// GET /equipments listing should be used instead.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct EquipmentQuery {
    pub q: Option<String>,
    pub category: Option<String>,
    pub available: Option<bool>,
}

impl EquipmentQuery {
    pub fn is_active(&self) -> bool {
        self.q.as_deref().is_some_and(|q| !q.trim().is_empty())
            || self.category.as_deref().is_some_and(|c| !c.trim().is_empty())
            || self.available.is_some()
    }

    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(q) = self.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            pairs.push(("q", q.to_string()));
        }
        if let Some(category) = self
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
        {
            pairs.push(("category", category.to_string()));
        }
        if let Some(available) = self.available {
            pairs.push(("available", available.to_string()));
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn booking_uses_canonical_wire_names() {
        let booking: Booking = serde_json::from_str(
            r#"{
                "id": 42,
                "equipmentId": 5,
                "equipmentName": "Projector",
                "quantityRequested": 2,
                "startAt": "2024-01-01T10:00:00",
                "endAt": "2024-01-02T10:00:00",
                "status": "PENDING",
                "requesterUsername": "alice"
            }"#,
        )
        .unwrap();
        assert_eq!(booking.quantity_requested, 2);
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.requester_username.as_deref(), Some("alice"));

        let payload = serde_json::to_value(NewBooking {
            equipment_id: 5,
            quantity_requested: 2,
            start_at: booking.start_at,
            end_at: booking.end_at,
        })
        .unwrap();
        assert_eq!(payload["quantityRequested"], 2);
        assert_eq!(payload["startAt"], "2024-01-01T10:00:00");
    }

    #[test]
    fn login_response_token_fallback_order() {
        let response: LoginResponse =
            serde_json::from_str(r#"{"jwt": "j", "token": "t"}"#).unwrap();
        let (token, user) = response.into_parts();
        assert_eq!(token.as_deref(), Some("t"));
        assert!(user.is_none());

        let response: LoginResponse =
            serde_json::from_str(r#"{"accessToken": "a", "jwt": "j"}"#).unwrap();
        assert_eq!(response.into_parts().0.as_deref(), Some("a"));

        let response: LoginResponse = serde_json::from_str(r#"{"token": "undefined"}"#).unwrap();
        assert_eq!(response.into_parts().0, None);
    }

    #[test]
    fn roles_and_condition_wire_names() {
        assert_eq!(
            serde_json::from_str::<Role>(r#""ROLE_ADMIN""#).unwrap(),
            Role::RoleAdmin
        );
        assert_eq!(serde_json::to_value(Role::RoleStaff).unwrap(), "ROLE_STAFF");
        assert_eq!(
            serde_json::from_str::<Condition>(r#""FAIR""#).unwrap(),
            Condition::Fair
        );
    }

    #[test]
    fn units_on_hand_falls_back_to_quantity() {
        let mut equipment: Equipment = serde_json::from_str(
            r#"{"id": 1, "name": "Camera", "quantity": 7, "available": true}"#,
        )
        .unwrap();
        assert_eq!(equipment.units_on_hand(), 7);
        equipment.available_units = Some(3);
        assert_eq!(equipment.units_on_hand(), 3);
    }

    #[test]
    fn filter_is_active_only_with_meaningful_values() {
        assert!(!EquipmentQuery::default().is_active());
        assert!(!EquipmentQuery {
            q: Some("   ".to_string()),
            ..Default::default()
        }
        .is_active());
        let filter = EquipmentQuery {
            q: Some("cam".to_string()),
            category: None,
            available: Some(true),
        };
        assert!(filter.is_active());
        assert_eq!(
            filter.to_query_pairs(),
            vec![("q", "cam".to_string()), ("available", "true".to_string())]
        );
    }
}
