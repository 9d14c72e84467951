//! Experiment metadata written alongside images.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Label of the free-form choice in every preset list.
pub const OTHER_CHOICE: &str = "Other:";

/// Tube lens magnification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TubeMagnification {
    /// No extra magnification
    #[default]
    #[serde(rename = "1.0X")]
    X1_0,
    /// 1.5x tube lens in the beam path
    #[serde(rename = "1.5X")]
    X1_5,
}

impl TubeMagnification {
    /// Multiplier applied to the objective power.
    pub fn factor(self) -> f64 {
        match self {
            TubeMagnification::X1_0 => 1.0,
            TubeMagnification::X1_5 => 1.5,
        }
    }

    /// Label used in files and the UI.
    pub fn label(self) -> &'static str {
        match self {
            TubeMagnification::X1_0 => "1.0X",
            TubeMagnification::X1_5 => "1.5X",
        }
    }
}

/// Description of how an image was taken.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(into = "MetadataRecord", from = "MetadataRecord")]
pub struct Metadata {
    /// Microscope name
    pub microscope: String,
    /// Illumination
    pub light: String,
    /// Objective description, e.g. "Nikon 60x Water Immersion"
    pub objective: String,
    /// Tube lens magnification
    pub tube_magnification: TubeMagnification,
    /// Free-form notes
    pub notes: String,
}

/// On-disk form of [`Metadata`], including the derived total magnification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    microscope: String,
    light: String,
    objective: String,
    notes: String,
    #[serde(rename = "tube-magnification")]
    tube_magnification: TubeMagnification,
    #[serde(default)]
    magnification: Option<f64>,
}

impl From<Metadata> for MetadataRecord {
    fn from(m: Metadata) -> Self {
        let magnification = m.magnification();
        Self {
            microscope: m.microscope,
            light: m.light,
            objective: m.objective,
            notes: m.notes,
            tube_magnification: m.tube_magnification,
            magnification,
        }
    }
}

impl From<MetadataRecord> for Metadata {
    fn from(r: MetadataRecord) -> Self {
        Self {
            microscope: r.microscope,
            light: r.light,
            objective: r.objective,
            tube_magnification: r.tube_magnification,
            notes: r.notes,
        }
    }
}

impl Metadata {
    /// Objective power times tube factor, when the objective names its power ("60x").
    pub fn magnification(&self) -> Option<f64> {
        objective_power(&self.objective).map(|p| p * self.tube_magnification.factor())
    }

    /// JSON for the TIFF description tag.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse the TIFF description tag.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// YAML sidecar contents.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

static OBJECTIVE_POWER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d*\.?\d+)\s*[xX]").expect("Invalid objective power regex"));

/// Power of an objective as written in its name: the first number followed by `x` or `X`.
pub fn objective_power(objective: &str) -> Option<f64> {
    OBJECTIVE_POWER
        .captures(objective)
        .and_then(|caps| caps[1].parse().ok())
}

/// Resolve a preset choice and its detail text into the recorded value.
///
/// The "Other:" choice is replaced by the detail; other choices ending in ':' (such as
/// an objective with a correction collar) get the detail appended.
pub fn compose_choice(choice: &str, detail: &str) -> String {
    if choice == OTHER_CHOICE {
        detail.to_string()
    } else if choice.ends_with(':') {
        format!("{choice}{detail}")
    } else {
        choice.to_string()
    }
}

/// A builder for constructing `Metadata` instances.
#[derive(Default)]
pub struct MetadataBuilder {
    inner: Metadata,
}

impl MetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn microscope(mut self, name: &str) -> Self {
        self.inner.microscope = name.to_string();
        self
    }

    pub fn light(mut self, light: &str) -> Self {
        self.inner.light = light.to_string();
        self
    }

    pub fn objective(mut self, objective: &str) -> Self {
        self.inner.objective = objective.to_string();
        self
    }

    pub fn tube_magnification(mut self, tube: TubeMagnification) -> Self {
        self.inner.tube_magnification = tube;
        self
    }

    pub fn notes(mut self, notes: &str) -> Self {
        self.inner.notes = notes.to_string();
        self
    }

    pub fn build(self) -> Metadata {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Metadata {
        MetadataBuilder::new()
            .microscope("Superscope")
            .light("Red laser, 660 nm")
            .objective("Nikon 60x Water Immersion, Correction Collar:0.17")
            .tube_magnification(TubeMagnification::X1_5)
            .notes("beads in glycerol")
            .build()
    }

    #[test]
    fn magnification_is_derived() {
        assert_eq!(sample().magnification(), Some(90.0));
        let other = MetadataBuilder::new().objective("custom lens").build();
        assert_eq!(other.magnification(), None);
    }

    #[test]
    fn json_uses_hyphenated_keys() {
        let json: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        assert_eq!(json["tube-magnification"], "1.5X");
        assert_eq!(json["magnification"], 90.0);
        assert_eq!(json["microscope"], "Superscope");
    }

    #[test]
    fn json_round_trip() {
        let m = sample();
        assert_eq!(Metadata::from_json(&m.to_json().unwrap()).unwrap(), m);
    }

    #[test]
    fn yaml_has_the_same_keys() {
        let yaml = sample().to_yaml().unwrap();
        for key in ["microscope", "light", "objective", "notes", "tube-magnification", "magnification"] {
            assert!(yaml.contains(&format!("{key}:")), "missing {key} in {yaml}");
        }
    }

    #[test]
    fn objective_power_parsing() {
        assert_eq!(objective_power("Nikon 100x Oil Immersion"), Some(100.0));
        assert_eq!(objective_power("Nikon 10x, air"), Some(10.0));
        assert_eq!(objective_power("Olympus 1.25X"), Some(1.25));
        assert_eq!(objective_power("N.A. 1.4"), None);
        assert_eq!(objective_power("Zeiss 63 x"), Some(63.0));
        assert_eq!(objective_power("Leica .5x relay"), Some(0.5));
        assert_eq!(objective_power("Plan Apo 60x/1.40"), Some(60.0));
    }

    #[test]
    fn choices_compose_with_detail() {
        assert_eq!(compose_choice("Other:", "Homebuilt"), "Homebuilt");
        assert_eq!(
            compose_choice("Nikon 60x Water Immersion, Correction Collar:", "0.17"),
            "Nikon 60x Water Immersion, Correction Collar:0.17"
        );
        assert_eq!(compose_choice("George", "ignored"), "George");
    }
}
