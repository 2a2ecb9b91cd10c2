use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Eq, thiserror::Error, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidVlanError {
    #[error("VLAN id {0} is outside the valid range 1-4094")]
    OutOfRange(u16),
    #[error("'{0}' is not a valid VLAN id")]
    NotANumber(String),
    #[error("'{0}' is not a valid VLAN range")]
    MalformedRange(String),
    #[error("VLAN range '{0}' is inverted")]
    InvertedRange(String),
}

/// A validated 802.1Q VLAN id in 1..=4094.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct VlanId(u16);

impl VlanId {
    pub fn new(id: u16) -> Result<Self, InvalidVlanError> {
        if (1..=4094).contains(&id) {
            Ok(Self(id))
        } else {
            Err(InvalidVlanError::OutOfRange(id))
        }
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

impl Display for VlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for VlanId {
    type Err = InvalidVlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .trim()
            .parse::<u16>()
            .map_err(|_| InvalidVlanError::NotANumber(s.to_string()))?;
        Self::new(id)
    }
}

impl<'de> Deserialize<'de> for VlanId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u16::deserialize(deserializer)?;
        VlanId::new(raw).map_err(serde::de::Error::custom)
    }
}

/// An inclusive VLAN id range.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct VlanRange {
    pub start: VlanId,
    pub end: VlanId,
}

impl VlanRange {
    pub fn contains(&self, vlan: VlanId) -> bool {
        (self.start..=self.end).contains(&vlan)
    }
}

impl FromStr for VlanRange {
    type Err = InvalidVlanError;

    /// Parses `"100-199"` or a single id `"251"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (start, end) = match s.split_once('-') {
            Some((a, b)) => (a.parse::<VlanId>()?, b.parse::<VlanId>()?),
            None => {
                let single = s.parse::<VlanId>()?;
                (single, single)
            }
        };
        if start > end {
            return Err(InvalidVlanError::InvertedRange(s.to_string()));
        }
        Ok(Self { start, end })
    }
}

impl Display for VlanRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// A set of VLAN ranges in the comma-separated notation used by the settings
/// file and `DNAAS_GLOBAL_VLAN_RANGE`, e.g. `"100-199,250-299,4000"`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VlanRangeSet(Vec<VlanRange>);

impl VlanRangeSet {
    pub fn contains(&self, vlan: VlanId) -> bool {
        self.0.iter().any(|r| r.contains(vlan))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ranges(&self) -> &[VlanRange] {
        &self.0
    }
}

impl FromStr for VlanRangeSet {
    type Err = InvalidVlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }
        let ranges = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(VlanRange::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(ranges))
    }
}

impl Display for VlanRangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

impl Serialize for VlanRangeSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for VlanRangeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vlan_id_bounds() {
        assert_eq!(VlanId::new(1).unwrap().get(), 1);
        assert_eq!(VlanId::new(4094).unwrap().get(), 4094);
        assert_eq!(VlanId::new(0), Err(InvalidVlanError::OutOfRange(0)));
        assert_eq!(VlanId::new(4095), Err(InvalidVlanError::OutOfRange(4095)));
        assert_eq!(
            "abc".parse::<VlanId>(),
            Err(InvalidVlanError::NotANumber("abc".into()))
        );
    }

    #[test]
    fn test_range_set_parsing() {
        let set: VlanRangeSet = "100-199,250-299,4000".parse().unwrap();
        assert!(set.contains(VlanId::new(100).unwrap()));
        assert!(set.contains(VlanId::new(253).unwrap()));
        assert!(set.contains(VlanId::new(4000).unwrap()));
        assert!(!set.contains(VlanId::new(300).unwrap()));
        assert_eq!(set.to_string(), "100-199,250-299,4000");

        assert!("".parse::<VlanRangeSet>().unwrap().is_empty());
        assert_eq!(
            "300-200".parse::<VlanRangeSet>(),
            Err(InvalidVlanError::InvertedRange("300-200".into()))
        );
    }

    #[test]
    fn test_range_set_yaml_round_trip() {
        let set: VlanRangeSet = serde_yaml::from_str("\"100-199,251\"").unwrap();
        assert!(set.contains(VlanId::new(251).unwrap()));
        assert_eq!(serde_yaml::to_string(&set).unwrap().trim(), "100-199,251");
    }
}
