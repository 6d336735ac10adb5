//! Static droid knowledge: code-to-name tables and beacon presets.
//!
//! The codes come from community reverse-engineering of droid firmware, not
//! from any vendor document, so the tables are treated as versioned data: the
//! compiled-in defaults can be extended or corrected from a JSON overlay
//! without touching code. Unknown codes always render as a placeholder.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which table a lookup goes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogKind {
    Faction,
    Personality,
    Affiliation,
    AudioGroup,
    Location,
}

/// A park location a beacon can emulate, with the audio group droids route
/// reactions through and the cooldown byte observed from real emitters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationPreset {
    pub name: String,
    pub audio_group: u8,
    /// Multiples of 5 seconds; 0xFF overrides the firmware minimum
    pub cooldown_ticks: u8,
}

/// Partial catalog loaded from JSON; present tables are merged over the
/// built-in defaults entry by entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogOverlay {
    #[serde(default)]
    pub factions: HashMap<u8, String>,
    #[serde(default)]
    pub personalities: HashMap<u8, String>,
    #[serde(default)]
    pub affiliations: HashMap<u8, String>,
    #[serde(default)]
    pub audio_groups: HashMap<u8, String>,
    #[serde(default)]
    pub locations: HashMap<u8, LocationPreset>,
}

/// Immutable lookup tables, built once at engine start.
#[derive(Debug, Clone)]
pub struct Catalog {
    factions: HashMap<u8, String>,
    personalities: HashMap<u8, String>,
    affiliations: HashMap<u8, String>,
    audio_groups: HashMap<u8, String>,
    locations: HashMap<u8, LocationPreset>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Catalog {
    /// The community-documented tables as of the 2025 droid wave.
    pub fn builtin() -> Self {
        let factions: HashMap<u8, String> = [
            (0x01, "Scoundrel"),
            (0x05, "Resistance"),
            (0x09, "First Order"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect();

        // Droids share one personality-chip id space across factions
        let personalities: HashMap<u8, String> = [
            (0x01, "R-Series (Default)"),
            (0x02, "BB-Series (Default)"),
            (0x03, "Blue (R5-D8)"),
            (0x04, "Gray (U9-C4)"),
            (0x05, "Red (0-0-0)"),
            (0x06, "Orange (R4-P17)"),
            (0x07, "Purple (M5-BZ)"),
            (0x08, "Black (BB-9E)"),
            (0x09, "Cyan/Red (CB-23)"),
            (0x0A, "Yellow (CH-33P)"),
            (0x0B, "C-Series (Default)"),
            (0x0C, "D-Unit (Default)"),
            (0x0D, "Blue (R5-D4)"),
            (0x0E, "BD-Unit (Default)"),
            (0x0F, "A-LT Series (Default)"),
            (0x10, "White (Drum Kit)"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect();

        let audio_groups: HashMap<u8, String> = [
            (0, "Generic"),
            (1, "Droid Depot"),
            (2, "Resistance"),
            (3, "Unknown"),
            (4, "Droid Detector"),
            (5, "Dok-Ondar's"),
            (6, "First Order"),
            (7, "Activation"),
            (8, "Motor / Internal"),
            (9, "Empty"),
            (10, "Accessory: Blaster"),
            (11, "Accessory: Thruster"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect();

        let locations: HashMap<u8, LocationPreset> = [
            (1, ("Ronto Roasters", 0x01, 0x02)),
            (2, ("Oil Baths", 0x02, 0x02)),
            (3, ("Resistance Base", 0x03, 0x02)),
            (4, ("Unknown", 0x04, 0x02)),
            (5, ("Droid Depot", 0x05, 0x02)),
            (6, ("Den of Antiquities", 0x06, 0x02)),
            (7, ("First Order Base", 0x07, 0x02)),
            (8, ("Oga's Droid Detector", 0x05, 0xFF)),
            (9, ("First Order Alert", 0x07, 0xFF)),
        ]
        .into_iter()
        .map(|(id, (name, audio_group, cooldown_ticks))| {
            (
                id,
                LocationPreset {
                    name: name.to_string(),
                    audio_group,
                    cooldown_ticks,
                },
            )
        })
        .collect();

        Self {
            // Affiliation shares the faction code space on the wire
            affiliations: factions.clone(),
            factions,
            personalities,
            audio_groups,
            locations,
        }
    }

    /// Built-in tables with a JSON overlay merged on top.
    pub fn with_overlay_json(json: &str) -> serde_json::Result<Self> {
        let overlay: CatalogOverlay = serde_json::from_str(json)?;
        let mut catalog = Self::builtin();
        catalog.apply_overlay(overlay);
        Ok(catalog)
    }

    pub fn apply_overlay(&mut self, overlay: CatalogOverlay) {
        self.factions.extend(overlay.factions);
        self.personalities.extend(overlay.personalities);
        self.affiliations.extend(overlay.affiliations);
        self.audio_groups.extend(overlay.audio_groups);
        self.locations.extend(overlay.locations);
    }

    /// Display name for a code. Unrecognized codes yield a placeholder
    /// instead of failing; undocumented firmware revisions keep appearing.
    pub fn name_of(&self, kind: CatalogKind, code: u8) -> String {
        let table = match kind {
            CatalogKind::Faction => &self.factions,
            CatalogKind::Personality => &self.personalities,
            CatalogKind::Affiliation => &self.affiliations,
            CatalogKind::AudioGroup => &self.audio_groups,
            CatalogKind::Location => {
                return self
                    .locations
                    .get(&code)
                    .map(|preset| preset.name.clone())
                    .unwrap_or_else(|| Self::placeholder(code));
            }
        };
        table
            .get(&code)
            .cloned()
            .unwrap_or_else(|| Self::placeholder(code))
    }

    pub fn location(&self, id: u8) -> Option<&LocationPreset> {
        self.locations.get(&id)
    }

    /// "Faction: Personality" label for a scanned droid, mirroring how the
    /// depot staff describe them.
    pub fn describe(&self, faction_code: u8, personality_code: u8) -> String {
        format!(
            "{} ({})",
            self.name_of(CatalogKind::Personality, personality_code),
            self.name_of(CatalogKind::Faction, faction_code)
        )
    }

    fn placeholder(code: u8) -> String {
        format!("Unknown (0x{code:02X})")
    }
}
