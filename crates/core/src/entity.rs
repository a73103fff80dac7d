use serde::{Deserialize, Deserializer, Serialize};

/// Upstream region identifier (e.g. `"78"`).
pub type RegionId = String;

/// Upstream facility identifier.
pub type FacilityId = i64;

/// Upstream service slot identifier.
pub type SlotId = String;

/// Upstream sends `null` where it means "empty"; read it as the default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Top-level record: an administrative region that owns facilities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub okato: Option<i64>,
}

/// A medical facility inside a region.
///
/// `region` is not part of the upstream payload; the fan-out stage stamps it
/// after the facility list for a region has been fetched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Facility {
    pub id: FacilityId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub lpu_short_name: String,
    #[serde(default)]
    pub lpu_full_name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub longitude: Option<String>,
    /// Upstream spells this field `latitide`.
    #[serde(default, rename = "latitide")]
    pub latitude: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub covid_vaccination: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_active: bool,
    #[serde(skip)]
    pub region: Region,
}

/// A bookable service at a facility with its availability counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSlot {
    pub id: SlotId,
    #[serde(default)]
    pub fer_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub count_free_ticket: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub count_free_participant: i64,
    #[serde(default)]
    pub nearest_date: Option<String>,
    #[serde(default)]
    pub last_date: Option<String>,
    #[serde(skip)]
    pub facility: Facility,
}

/// A parsed latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    /// Parse upstream coordinate strings. Returns `None` when either side is
    /// missing, blank, not a number, or out of range.
    pub fn parse(latitude: &str, longitude: &str) -> Option<Self> {
        let latitude: f64 = latitude.trim().parse().ok()?;
        let longitude: f64 = longitude.trim().parse().ok()?;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return None;
        }
        Some(Self { latitude, longitude })
    }
}

impl Facility {
    /// Geographic position of the facility, if upstream supplied a usable one.
    pub fn location(&self) -> Option<GeoPoint> {
        GeoPoint::parse(self.latitude.as_deref()?, self.longitude.as_deref()?)
    }
}

impl ServiceSlot {
    /// Concatenated identity used as a hashtag in alerts (`78182s1`).
    pub fn tag(&self) -> String {
        format!("{}{}{}", self.facility.region.id, self.facility.id, self.id)
    }
}

// ── Attribution ───────────────────────────────────────────────

/// Stamps a child record with a copy of its parent for attribution.
///
/// The copy is plain data; children never own or manage their parents.
pub trait Attribute<P> {
    fn attribute(&mut self, parent: &P);
}

impl Attribute<Region> for Facility {
    fn attribute(&mut self, parent: &Region) {
        self.region = parent.clone();
    }
}

impl Attribute<Facility> for ServiceSlot {
    fn attribute(&mut self, parent: &Facility) {
        self.facility = parent.clone();
    }
}

/// Identity chain used to correlate log lines across stages.
pub trait Lineage {
    fn lineage(&self) -> String;
}

impl Lineage for Region {
    fn lineage(&self) -> String {
        format!("region={}", self.id)
    }
}

impl Lineage for Facility {
    fn lineage(&self) -> String {
        format!("{}/facility={}", self.region.lineage(), self.id)
    }
}

impl Lineage for ServiceSlot {
    fn lineage(&self) -> String {
        format!("{}/slot={}", self.facility.lineage(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Region {
        Region {
            id: "78".to_string(),
            name: "SPb".to_string(),
            okato: None,
        }
    }

    #[test]
    fn facility_deserializes_upstream_spelling() {
        let json = r#"{
            "id": 182,
            "lpuShortName": "Поликлиника 1",
            "address": "Невский пр., 1",
            "phone": null,
            "email": "p1@example.org",
            "longitude": "30.31",
            "latitide": "59.93",
            "covidVaccination": true,
            "isActive": true,
            "districtId": 1
        }"#;
        let facility: Facility = serde_json::from_str(json).unwrap();
        assert_eq!(facility.id, 182);
        assert_eq!(facility.latitude.as_deref(), Some("59.93"));
        assert!(facility.phone.is_none());
        assert!(facility.covid_vaccination);
        assert_eq!(facility.region, Region::default());
    }

    #[test]
    fn slot_deserializes_counters_and_optional_dates() {
        let json = r#"{
            "id": "s1",
            "ferId": "fer",
            "name": "COVID vaccination",
            "countFreeParticipant": 3,
            "countFreeTicket": 5,
            "lastDate": null,
            "nearestDate": "2021-06-01T00:00:00"
        }"#;
        let slot: ServiceSlot = serde_json::from_str(json).unwrap();
        assert_eq!(slot.count_free_ticket, 5);
        assert_eq!(slot.count_free_participant, 3);
        assert!(slot.last_date.is_none());
        assert_eq!(slot.nearest_date.as_deref(), Some("2021-06-01T00:00:00"));
    }

    #[test]
    fn null_fields_read_as_empty() {
        let json = r#"[
            {"id": "s1", "name": null, "countFreeTicket": null, "countFreeParticipant": 2},
            {"id": "s2", "name": "COVID vaccination", "countFreeTicket": 4}
        ]"#;
        let slots: Vec<ServiceSlot> = serde_json::from_str(json).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].name, "");
        assert_eq!(slots[0].count_free_ticket, 0);
        assert_eq!(slots[0].count_free_participant, 2);
        assert_eq!(slots[1].count_free_ticket, 4);

        let region: Region = serde_json::from_str(r#"{"id": "78", "name": null}"#).unwrap();
        assert_eq!(region.name, "");
        let facility: Facility =
            serde_json::from_str(r#"{"id": 1, "lpuShortName": null, "isActive": null}"#).unwrap();
        assert!(facility.lpu_short_name.is_empty());
        assert!(!facility.is_active);
    }

    #[test]
    fn attribution_builds_lineage_chain() {
        let mut facility = Facility {
            id: 7,
            ..Default::default()
        };
        facility.attribute(&region());
        let mut slot = ServiceSlot {
            id: "s1".to_string(),
            name: "COVID".to_string(),
            ..Default::default()
        };
        slot.attribute(&facility);

        assert_eq!(slot.lineage(), "region=78/facility=7/slot=s1");
        assert_eq!(slot.tag(), "787s1");
    }

    #[test]
    fn geo_point_rejects_garbage() {
        assert_eq!(
            GeoPoint::parse("59.93", " 30.31 "),
            Some(GeoPoint {
                latitude: 59.93,
                longitude: 30.31
            })
        );
        assert!(GeoPoint::parse("", "30.31").is_none());
        assert!(GeoPoint::parse("north", "30.31").is_none());
        assert!(GeoPoint::parse("95.0", "30.31").is_none());
    }

    #[test]
    fn facility_location_requires_both_coordinates() {
        let facility = Facility {
            latitude: Some("59.93".to_string()),
            longitude: None,
            ..Default::default()
        };
        assert!(facility.location().is_none());
    }
}
