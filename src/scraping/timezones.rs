use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::{OffsetName, Tz, TZ_VARIANTS};

/// Maps abbreviations such as `PDT` to a zone, probed at a single instant.
///
/// Abbreviations are ambiguous (`CST` is used by several unrelated zones) and
/// only the abbreviations in effect at `at` are known. When several zones share
/// an abbreviation the last one in `TZ_VARIANTS` order wins.
#[derive(Debug, Clone)]
pub struct AbbreviationTable {
    zones: HashMap<String, Tz>,
}

impl AbbreviationTable {
    pub fn build(at: DateTime<Utc>) -> Self {
        let instant = at.naive_utc();
        let mut zones = HashMap::new();
        for tz in TZ_VARIANTS.iter() {
            let offset = tz.offset_from_utc_datetime(&instant);
            zones.insert(offset.abbreviation().to_string(), *tz);
        }
        Self { zones }
    }

    pub fn resolve(&self, abbreviation: &str) -> Option<Tz> {
        self.zones.get(abbreviation.trim()).copied()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_daylight_abbreviations_during_dst() {
        let at = Utc.with_ymd_and_hms(2024, 3, 18, 0, 0, 0).unwrap();
        let table = AbbreviationTable::build(at);
        assert!(!table.is_empty());

        let pacific = table.resolve("PDT").expect("PDT known in March");
        assert_eq!(
            pacific.offset_from_utc_datetime(&at.naive_utc()).abbreviation(),
            "PDT"
        );
        assert!(table.resolve("ZZZ").is_none());
    }

    #[test]
    fn standard_abbreviations_only_exist_outside_dst() {
        let winter = AbbreviationTable::build(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap());
        assert!(winter.resolve("PST").is_some());
        assert!(winter.resolve("PDT").is_none());
    }
}
