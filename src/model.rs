//! Equipment records, photos and the criteria used to select them

use crate::InventoryError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Encoded image bytes attached to a record.
///
/// A photo has no identity beyond its position in the owning record. It is
/// stored in snapshots as a `data:` URI.
#[derive(Clone, PartialEq, Eq)]
pub struct Photo(Vec<u8>);

impl Photo {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Best guess at the encoded format, from the leading magic bytes
    pub fn format(&self) -> Option<image::ImageFormat> {
        image::guess_format(&self.0).ok()
    }

    pub fn mime_type(&self) -> &'static str {
        match self.format() {
            Some(image::ImageFormat::Jpeg) => "image/jpeg",
            Some(image::ImageFormat::Png) => "image/png",
            Some(image::ImageFormat::WebP) => "image/webp",
            Some(image::ImageFormat::Gif) => "image/gif",
            Some(image::ImageFormat::Bmp) => "image/bmp",
            _ => "application/octet-stream",
        }
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), STANDARD.encode(&self.0))
    }

    /// Parses a `data:<mime>;base64,<payload>` URI, or a bare base64 payload.
    pub fn from_data_uri(uri: &str) -> Result<Self, InventoryError> {
        let payload = match uri.strip_prefix("data:") {
            Some(rest) => {
                let (header, payload) = rest.split_once(',').ok_or_else(|| {
                    InventoryError::ImageDecode("data URI has no payload".to_string())
                })?;
                if !header.ends_with(";base64") {
                    return Err(InventoryError::ImageDecode(format!(
                        "unsupported data URI encoding '{header}'"
                    )));
                }
                payload
            }
            None => uri,
        };

        STANDARD
            .decode(payload.trim())
            .map(Self)
            .map_err(|e| InventoryError::ImageDecode(e.to_string()))
    }
}

impl fmt::Debug for Photo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Photo")
            .field("mime", &self.mime_type())
            .field("bytes", &self.0.len())
            .finish()
    }
}

impl Serialize for Photo {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_data_uri())
    }
}

impl<'de> Deserialize<'de> for Photo {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let uri = String::deserialize(deserializer)?;
        Photo::from_data_uri(&uri).map_err(serde::de::Error::custom)
    }
}

/// Operational status of a piece of equipment.
///
/// Older snapshots spell these in Portuguese; those spellings are still
/// accepted when reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[serde(alias = "funcionando")]
    Functioning,
    #[serde(alias = "manutencao")]
    Maintenance,
    #[serde(alias = "defeito")]
    Broken,
}

impl Default for Status {
    fn default() -> Self {
        Self::Functioning
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Functioning => "functioning",
            Status::Maintenance => "maintenance",
            Status::Broken => "broken",
        };
        f.write_str(label)
    }
}

impl FromStr for Status {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "functioning" | "funcionando" => Ok(Status::Functioning),
            "maintenance" | "manutencao" => Ok(Status::Maintenance),
            "broken" | "defeito" => Ok(Status::Broken),
            other => Err(InventoryError::Validation(format!("unknown status '{other}'"))),
        }
    }
}

/// One tracked equipment item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentRecord {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub checked: bool,
    /// ISO-8601 instant of the last check, kept verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub photos: Vec<Photo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Photo>, D::Error> {
    Ok(Option::<Vec<Photo>>::deserialize(deserializer)?.unwrap_or_default())
}

impl EquipmentRecord {
    /// The last check as an instant, if present and parsable
    pub fn last_check_at(&self) -> Option<DateTime<Utc>> {
        self.last_check
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
            .map(|at| at.with_timezone(&Utc))
    }

    pub fn has_photos(&self) -> bool {
        !self.photos.is_empty()
    }

    /// Key for the default most-recent-first ordering.
    ///
    /// Identifiers are millisecond timestamps, so they stand in for a
    /// missing or unparsable last check on the same scale.
    pub fn recency_key(&self) -> i64 {
        self.last_check_at()
            .map(|at| at.timestamp_millis())
            .unwrap_or(self.id as i64)
    }

    pub fn matches(&self, criteria: &FilterCriteria) -> bool {
        let term = criteria.search.trim().to_lowercase();
        let matches_search = term.is_empty()
            || self.name.to_lowercase().contains(&term)
            || self.kind.to_lowercase().contains(&term)
            || self.location.to_lowercase().contains(&term);

        matches_search
            && criteria.status.admits(&self.status)
            && criteria.kind.admits(&self.kind)
            && criteria.location.admits(&self.location)
    }
}

/// Timestamp format used for `lastCheck`, matching `Date.toISOString()`.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Fields supplied when adding equipment; the store assigns the rest.
#[derive(Debug, Clone, Default)]
pub struct NewEquipment {
    pub name: String,
    pub kind: String,
    pub location: String,
    pub status: Status,
    pub notes: Option<String>,
    pub checked: bool,
    pub user_id: Option<String>,
}

impl NewEquipment {
    pub fn validate(&self) -> Result<(), InventoryError> {
        require_text("name", &self.name)?;
        require_text("location", &self.location)
    }
}

/// Field edits applied by `EquipmentStore::update`. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct EquipmentPatch {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub location: Option<String>,
    pub status: Option<Status>,
    /// `Some(None)` clears the notes
    pub notes: Option<Option<String>>,
    pub checked: Option<bool>,
}

impl EquipmentPatch {
    pub fn validate(&self) -> Result<(), InventoryError> {
        if let Some(name) = &self.name {
            require_text("name", name)?;
        }
        if let Some(location) = &self.location {
            require_text("location", location)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.kind.is_none()
            && self.location.is_none()
            && self.status.is_none()
            && self.notes.is_none()
            && self.checked.is_none()
    }
}

fn require_text(field: &str, value: &str) -> Result<(), InventoryError> {
    if value.trim().is_empty() {
        return Err(InventoryError::Validation(format!("{field} is required")));
    }
    Ok(())
}

/// Either no restriction, or exactly one accepted value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection<T> {
    All,
    Only(T),
}

impl<T> Default for Selection<T> {
    fn default() -> Self {
        Self::All
    }
}

impl<T: PartialEq> Selection<T> {
    pub fn admits(&self, value: &T) -> bool {
        match self {
            Selection::All => true,
            Selection::Only(expected) => expected == value,
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Selection::All)
    }
}

impl<T: FromStr> FromStr for Selection<T> {
    type Err = T::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            Ok(Selection::All)
        } else {
            s.parse().map(Selection::Only)
        }
    }
}

/// Criteria for the store's filtered view; the default admits everything.
#[derive(Debug, Clone, Default)]
pub struct FilterCriteria {
    pub search: String,
    pub status: Selection<Status>,
    pub kind: Selection<String>,
    pub location: Selection<String>,
}

/// Date and location restriction for report generation. Both dates are
/// inclusive calendar days.
#[derive(Debug, Clone, Default)]
pub struct ReportRequest {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub location: Selection<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: usize,
    pub functioning: usize,
    pub maintenance: usize,
    pub broken: usize,
}
