use std::sync::Arc;

use itertools::Itertools;

use lending_client::api::{Equipment, EquipmentId, EquipmentPayload, EquipmentQuery};

use crate::backend::LendingBackend;
use crate::query::{keys, QueryCache, QueryError};

/// Equipment directory: the full list, or the backend-side search when any
/// filter is active. Filtered results cache under their own key, so changing
/// the filter never clobbers the unfiltered listing.
pub struct EquipmentDirectory {
    backend: Arc<dyn LendingBackend>,
    cache: Arc<QueryCache>,
    filter: parking_lot::RwLock<EquipmentQuery>,
}

impl EquipmentDirectory {
    pub fn new(backend: Arc<dyn LendingBackend>, cache: Arc<QueryCache>) -> Self {
        Self {
            backend,
            cache,
            filter: parking_lot::RwLock::new(EquipmentQuery::default()),
        }
    }

    pub fn set_filter(&self, filter: EquipmentQuery) {
        *self.filter.write() = filter;
    }

    pub fn filter(&self) -> EquipmentQuery {
        self.filter.read().clone()
    }

    pub async fn load(&self) -> Result<Vec<Equipment>, QueryError> {
        let filter = self.filter();
        if filter.is_active() {
            self.cache
                .fetch(&keys::equipments_search(&filter), || async {
                    self.backend.search_equipments(&filter).await
                })
                .await
        } else {
            self.cache
                .fetch(&keys::equipments(), || async {
                    self.backend.list_equipments().await
                })
                .await
        }
    }

    pub async fn refresh(&self) -> Result<Vec<Equipment>, QueryError> {
        let filter = self.filter();
        if filter.is_active() {
            self.cache
                .refetch(&keys::equipments_search(&filter), || async {
                    self.backend.search_equipments(&filter).await
                })
                .await
        } else {
            self.cache
                .refetch(&keys::equipments(), || async {
                    self.backend.list_equipments().await
                })
                .await
        }
    }

    /// Distinct categories for the filter dropdown.
    pub fn categories(rows: &[Equipment]) -> Vec<String> {
        rows.iter()
            .filter_map(|equipment| equipment.category.clone())
            .sorted()
            .dedup()
            .collect()
    }
}

/// Admin-only create/update/delete over equipment records. Every successful
/// mutation invalidates the equipment listings; role gating happens at the
/// session level before this is even wired up.
pub struct AdminEquipmentEditor {
    backend: Arc<dyn LendingBackend>,
    cache: Arc<QueryCache>,
}

impl AdminEquipmentEditor {
    pub fn new(backend: Arc<dyn LendingBackend>, cache: Arc<QueryCache>) -> Self {
        Self { backend, cache }
    }

    pub async fn create(&self, payload: &EquipmentPayload) -> Result<Equipment, QueryError> {
        let equipment = self.backend.create_equipment(payload).await?;
        self.cache.invalidate(&keys::equipments());
        Ok(equipment)
    }

    pub async fn update(
        &self,
        id: EquipmentId,
        payload: &EquipmentPayload,
    ) -> Result<Equipment, QueryError> {
        let equipment = self.backend.update_equipment(id, payload).await?;
        self.cache.invalidate(&keys::equipments());
        Ok(equipment)
    }

    pub async fn delete(&self, id: EquipmentId) -> Result<(), QueryError> {
        self.backend.delete_equipment(id).await?;
        self.cache.invalidate(&keys::equipments());
        Ok(())
    }
}
