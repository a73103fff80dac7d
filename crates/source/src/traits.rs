//! DataSource trait definition.

use std::sync::Arc;

use vaccibot_core::{Facility, Region, ServiceSlot};

use crate::error::SourceError;

/// The upstream hierarchy of regions, facilities and service slots.
///
/// Implementations return children exactly as upstream lists them; linking a
/// child to its parent is left to the caller.
#[async_trait::async_trait]
pub trait DataSource: Send + Sync {
    /// All top-level regions.
    async fn list_regions(&self) -> Result<Vec<Region>, SourceError>;

    /// Facilities within `region`.
    async fn list_facilities(&self, region: &Region) -> Result<Vec<Facility>, SourceError>;

    /// Service slots offered by `facility`.
    async fn list_service_slots(&self, facility: &Facility)
        -> Result<Vec<ServiceSlot>, SourceError>;
}

#[async_trait::async_trait]
impl<T: DataSource + ?Sized> DataSource for Arc<T> {
    async fn list_regions(&self) -> Result<Vec<Region>, SourceError> {
        (**self).list_regions().await
    }

    async fn list_facilities(&self, region: &Region) -> Result<Vec<Facility>, SourceError> {
        (**self).list_facilities(region).await
    }

    async fn list_service_slots(
        &self,
        facility: &Facility,
    ) -> Result<Vec<ServiceSlot>, SourceError> {
        (**self).list_service_slots(facility).await
    }
}
