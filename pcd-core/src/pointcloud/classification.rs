use std::fmt;

use serde::{Deserialize, Serialize};

/// Point classes, encoded with the ASPRS LAS 1.4 class codes.
///
/// Code 8 and every code from 23 upward decode to [`Classification::Reserved`],
/// so `from_code(c.code()) == c` holds for every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Classification {
    /// Created, never classified.
    #[default]
    Raw = 0,
    /// Not ground, not otherwise resolved.
    NonGround = 1,
    Ground = 2,
    LowVegetation = 3,
    MediumVegetation = 4,
    HighVegetation = 5,
    Building = 6,
    LowNoise = 7,
    Reserved = 8,
    Water = 9,
    Rail = 10,
    Road = 11,
    Overlap = 12,
    WireGuard = 13,
    WireConductor = 14,
    Tower = 15,
    /// Wire-structure connector.
    Insulator = 16,
    Bridge = 17,
    HighNoise = 18,
    Overhead = 19,
    IgnoredGround = 20,
    Snow = 21,
    Temporal = 22,
}

impl Classification {
    pub const ALL: [Classification; 23] = [
        Classification::Raw,
        Classification::NonGround,
        Classification::Ground,
        Classification::LowVegetation,
        Classification::MediumVegetation,
        Classification::HighVegetation,
        Classification::Building,
        Classification::LowNoise,
        Classification::Reserved,
        Classification::Water,
        Classification::Rail,
        Classification::Road,
        Classification::Overlap,
        Classification::WireGuard,
        Classification::WireConductor,
        Classification::Tower,
        Classification::Insulator,
        Classification::Bridge,
        Classification::HighNoise,
        Classification::Overhead,
        Classification::IgnoredGround,
        Classification::Snow,
        Classification::Temporal,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Classification::Raw,
            1 => Classification::NonGround,
            2 => Classification::Ground,
            3 => Classification::LowVegetation,
            4 => Classification::MediumVegetation,
            5 => Classification::HighVegetation,
            6 => Classification::Building,
            7 => Classification::LowNoise,
            9 => Classification::Water,
            10 => Classification::Rail,
            11 => Classification::Road,
            12 => Classification::Overlap,
            13 => Classification::WireGuard,
            14 => Classification::WireConductor,
            15 => Classification::Tower,
            16 => Classification::Insulator,
            17 => Classification::Bridge,
            18 => Classification::HighNoise,
            19 => Classification::Overhead,
            20 => Classification::IgnoredGround,
            21 => Classification::Snow,
            22 => Classification::Temporal,
            _ => Classification::Reserved,
        }
    }

    /// Short name without spaces; it becomes part of output file names.
    pub fn name(self) -> &'static str {
        match self {
            Classification::Raw => "raw",
            Classification::NonGround => "nonground",
            Classification::Ground => "ground",
            Classification::LowVegetation => "lowveg",
            Classification::MediumVegetation => "medveg",
            Classification::HighVegetation => "highveg",
            Classification::Building => "building",
            Classification::LowNoise => "lownoise",
            Classification::Reserved => "reserved",
            Classification::Water => "water",
            Classification::Rail => "rail",
            Classification::Road => "road",
            Classification::Overlap => "overlap",
            Classification::WireGuard => "wireguard",
            Classification::WireConductor => "conductor",
            Classification::Tower => "tower",
            Classification::Insulator => "insulator",
            Classification::Bridge => "bridge",
            Classification::HighNoise => "highnoise",
            Classification::Overhead => "overhead",
            Classification::IgnoredGround => "ignoredground",
            Classification::Snow => "snow",
            Classification::Temporal => "temporal",
        }
    }

    pub fn is_ground(self) -> bool {
        self == Classification::Ground
    }

    /// Collapses every sub-class onto the ground/nonground split.
    pub fn collapsed(self) -> Self {
        match self {
            Classification::Raw | Classification::Ground => self,
            _ => Classification::NonGround,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Classification> for u8 {
    fn from(value: Classification) -> Self {
        value.code()
    }
}

impl From<u8> for Classification {
    fn from(code: u8) -> Self {
        Classification::from_code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        for class in Classification::ALL {
            assert_eq!(Classification::from_code(class.code()), class);
        }
    }

    #[test]
    fn unknown_codes_are_reserved() {
        assert_eq!(Classification::from_code(8), Classification::Reserved);
        assert_eq!(Classification::from_code(23), Classification::Reserved);
        assert_eq!(Classification::from_code(200), Classification::Reserved);
    }

    #[test]
    fn names_have_no_spaces() {
        for class in Classification::ALL {
            assert!(!class.name().contains(' '));
        }
        assert_eq!(Classification::LowNoise.to_string(), "lownoise");
    }

    #[test]
    fn collapse_keeps_ground_split() {
        assert_eq!(Classification::Building.collapsed(), Classification::NonGround);
        assert_eq!(Classification::Ground.collapsed(), Classification::Ground);
        assert_eq!(Classification::Raw.collapsed(), Classification::Raw);
    }
}
