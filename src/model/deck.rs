//! Concrete deck record kinds.
//!
//! Positions are stored in tenths of a degree (north and east positive),
//! winds in knots, pressures in millibars and distances in nautical miles,
//! so every record is plain integer data with exact equality.

use deckmerge_store::DeckType;
use serde::{Deserialize, Serialize};

use crate::model::record::{RecordContent, RecordIdentity};
use crate::model::types::Dtg;

fn opt<T: ToString>(v: Option<T>) -> String {
    v.map_or_else(|| "-".to_owned(), |v| v.to_string())
}

// ---------------------------------------------------------------------------
// A deck: objective aids
// ---------------------------------------------------------------------------

/// One objective aid or forecast line of an A deck.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ADeckRecord {
    /// Forecast initial time.
    pub dtg: Dtg,
    /// Technique (model) name, e.g. `OFCL`, `HWRF`.
    pub technique: String,
    /// Forecast hour (tau).
    pub forecast_hour: i16,
    /// Wind radius threshold in knots (0, 34, 50 or 64).
    pub wind_radius_threshold: u16,
    /// Latitude, tenths of a degree.
    pub lat_tenths: i32,
    /// Longitude, tenths of a degree.
    pub lon_tenths: i32,
    /// Maximum sustained wind.
    #[serde(default)]
    pub max_wind_kt: Option<u16>,
    /// Minimum sea-level pressure.
    #[serde(default)]
    pub min_pressure_mb: Option<u16>,
}

impl RecordIdentity for ADeckRecord {
    type Key = (Dtg, String, i16, u16);

    fn natural_key(&self) -> Self::Key {
        (
            self.dtg.clone(),
            self.technique.to_ascii_uppercase(),
            self.forecast_hour,
            self.wind_radius_threshold,
        )
    }

    fn deck_types() -> &'static [DeckType] {
        &[DeckType::A]
    }

    fn dtg(&self) -> &Dtg {
        &self.dtg
    }

    fn technique(&self) -> Option<&str> {
        Some(&self.technique)
    }
}

impl RecordContent for ADeckRecord {
    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("dtg", self.dtg.to_string()),
            ("technique", self.technique.clone()),
            ("forecast_hour", self.forecast_hour.to_string()),
            ("wind_radius_threshold", self.wind_radius_threshold.to_string()),
            ("lat_tenths", self.lat_tenths.to_string()),
            ("lon_tenths", self.lon_tenths.to_string()),
            ("max_wind_kt", opt(self.max_wind_kt)),
            ("min_pressure_mb", opt(self.min_pressure_mb)),
        ]
    }
}

// ---------------------------------------------------------------------------
// B deck: best track
// ---------------------------------------------------------------------------

/// One best-track fix. Also used for genesis B decks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BDeckRecord {
    /// Valid time.
    pub dtg: Dtg,
    /// Wind radius threshold in knots (0, 34, 50 or 64).
    pub wind_radius_threshold: u16,
    /// Latitude, tenths of a degree.
    pub lat_tenths: i32,
    /// Longitude, tenths of a degree.
    pub lon_tenths: i32,
    /// Maximum sustained wind.
    pub max_wind_kt: u16,
    /// Minimum sea-level pressure.
    #[serde(default)]
    pub min_pressure_mb: Option<u16>,
    /// Storm classification, e.g. `TS`, `HU`, `EX`.
    #[serde(default)]
    pub storm_type: String,
    /// Wind radii in nm for NE, SE, SW, NW quadrants.
    #[serde(default)]
    pub radii_nm: [u16; 4],
}

impl RecordIdentity for BDeckRecord {
    type Key = (Dtg, u16);

    fn natural_key(&self) -> Self::Key {
        (self.dtg.clone(), self.wind_radius_threshold)
    }

    fn deck_types() -> &'static [DeckType] {
        &[DeckType::B, DeckType::GenesisB]
    }

    fn dtg(&self) -> &Dtg {
        &self.dtg
    }
}

impl RecordContent for BDeckRecord {
    fn fields(&self) -> Vec<(&'static str, String)> {
        let [ne, se, sw, nw] = self.radii_nm;
        vec![
            ("dtg", self.dtg.to_string()),
            ("wind_radius_threshold", self.wind_radius_threshold.to_string()),
            ("lat_tenths", self.lat_tenths.to_string()),
            ("lon_tenths", self.lon_tenths.to_string()),
            ("max_wind_kt", self.max_wind_kt.to_string()),
            ("min_pressure_mb", opt(self.min_pressure_mb)),
            ("storm_type", self.storm_type.clone()),
            ("radius_ne_nm", ne.to_string()),
            ("radius_se_nm", se.to_string()),
            ("radius_sw_nm", sw.to_string()),
            ("radius_nw_nm", nw.to_string()),
        ]
    }
}

// ---------------------------------------------------------------------------
// E deck: probabilities
// ---------------------------------------------------------------------------

/// One probability line of an E deck. Also used for genesis E decks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EDeckRecord {
    /// Forecast initial time.
    pub dtg: Dtg,
    /// Technique producing the probability.
    pub technique: String,
    /// Forecast hour (tau).
    pub forecast_hour: i16,
    /// Probability type, e.g. `TR` (track), `IN` (intensity), `RI`, `GN`.
    pub probability_type: String,
    /// Probability in percent.
    pub probability_pct: u8,
    /// Latitude, tenths of a degree.
    pub lat_tenths: i32,
    /// Longitude, tenths of a degree.
    pub lon_tenths: i32,
}

impl RecordIdentity for EDeckRecord {
    type Key = (Dtg, String, i16, String);

    fn natural_key(&self) -> Self::Key {
        (
            self.dtg.clone(),
            self.technique.to_ascii_uppercase(),
            self.forecast_hour,
            self.probability_type.to_ascii_uppercase(),
        )
    }

    fn deck_types() -> &'static [DeckType] {
        &[DeckType::E, DeckType::GenesisE]
    }

    fn dtg(&self) -> &Dtg {
        &self.dtg
    }

    fn technique(&self) -> Option<&str> {
        Some(&self.technique)
    }
}

impl RecordContent for EDeckRecord {
    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("dtg", self.dtg.to_string()),
            ("technique", self.technique.clone()),
            ("forecast_hour", self.forecast_hour.to_string()),
            ("probability_type", self.probability_type.clone()),
            ("probability_pct", self.probability_pct.to_string()),
            ("lat_tenths", self.lat_tenths.to_string()),
            ("lon_tenths", self.lon_tenths.to_string()),
        ]
    }
}

// ---------------------------------------------------------------------------
// F deck: fixes
// ---------------------------------------------------------------------------

/// One fix (satellite, aircraft, radar, ...) of an F deck.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FDeckRecord {
    /// Fix time.
    pub dtg: Dtg,
    /// Fix format number (10 subjective Dvorak, 20 objective Dvorak, ...).
    pub fix_format: u16,
    /// Fix type, e.g. `DVTS`, `AIRC`, `RDRD`.
    pub fix_type: String,
    /// Fix site or agency.
    pub fix_site: String,
    /// Wind radius threshold in knots.
    pub wind_radius_threshold: u16,
    /// Latitude, tenths of a degree.
    pub lat_tenths: i32,
    /// Longitude, tenths of a degree.
    pub lon_tenths: i32,
    /// Estimated maximum wind.
    #[serde(default)]
    pub max_wind_kt: Option<u16>,
    /// Estimated minimum pressure.
    #[serde(default)]
    pub min_pressure_mb: Option<u16>,
}

impl RecordIdentity for FDeckRecord {
    type Key = (Dtg, u16, String, String, u16);

    fn natural_key(&self) -> Self::Key {
        (
            self.dtg.clone(),
            self.fix_format,
            self.fix_type.to_ascii_uppercase(),
            self.fix_site.to_ascii_uppercase(),
            self.wind_radius_threshold,
        )
    }

    fn deck_types() -> &'static [DeckType] {
        &[DeckType::F]
    }

    fn dtg(&self) -> &Dtg {
        &self.dtg
    }
}

impl RecordContent for FDeckRecord {
    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("dtg", self.dtg.to_string()),
            ("fix_format", self.fix_format.to_string()),
            ("fix_type", self.fix_type.clone()),
            ("fix_site", self.fix_site.clone()),
            ("wind_radius_threshold", self.wind_radius_threshold.to_string()),
            ("lat_tenths", self.lat_tenths.to_string()),
            ("lon_tenths", self.lon_tenths.to_string()),
            ("max_wind_kt", opt(self.max_wind_kt)),
            ("min_pressure_mb", opt(self.min_pressure_mb)),
        ]
    }
}

// ---------------------------------------------------------------------------
// Forecast track
// ---------------------------------------------------------------------------

/// One point of the official forecast track.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForecastTrackRecord {
    /// Forecast initial time.
    pub dtg: Dtg,
    /// Forecast hour (tau).
    pub forecast_hour: i16,
    /// Wind radius threshold in knots.
    pub wind_radius_threshold: u16,
    /// Latitude, tenths of a degree.
    pub lat_tenths: i32,
    /// Longitude, tenths of a degree.
    pub lon_tenths: i32,
    /// Forecast maximum wind.
    pub max_wind_kt: u16,
    /// Forecast gusts.
    #[serde(default)]
    pub gusts_kt: Option<u16>,
}

impl RecordIdentity for ForecastTrackRecord {
    type Key = (Dtg, i16, u16);

    fn natural_key(&self) -> Self::Key {
        (self.dtg.clone(), self.forecast_hour, self.wind_radius_threshold)
    }

    fn deck_types() -> &'static [DeckType] {
        &[DeckType::ForecastTrack]
    }

    fn dtg(&self) -> &Dtg {
        &self.dtg
    }
}

impl RecordContent for ForecastTrackRecord {
    fn fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("dtg", self.dtg.to_string()),
            ("forecast_hour", self.forecast_hour.to_string()),
            ("wind_radius_threshold", self.wind_radius_threshold.to_string()),
            ("lat_tenths", self.lat_tenths.to_string()),
            ("lon_tenths", self.lon_tenths.to_string()),
            ("max_wind_kt", self.max_wind_kt.to_string()),
            ("gusts_kt", opt(self.gusts_kt)),
        ]
    }
}
