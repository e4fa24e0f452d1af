//! Known abbreviations and variant spellings of place names.

use crate::resolver::coverage::GeoLevel;
use lazy_static::lazy_static;
use std::collections::HashMap;

lazy_static! {
    /// Lowercased alias -> (canonical name, level the alias implies).
    static ref ALIASES: HashMap<&'static str, (&'static str, Option<GeoLevel>)> = {
        use GeoLevel::*;
        let entries: &[(&str, &str, Option<GeoLevel>)] = &[
            // Countries
            ("usa", "United States", Some(Country)),
            ("us", "United States", Some(Country)),
            ("u.s.", "United States", Some(Country)),
            ("u.s.a.", "United States", Some(Country)),
            ("america", "United States", Some(Country)),
            ("united states of america", "United States", Some(Country)),
            ("uk", "United Kingdom", Some(Country)),
            ("u.k.", "United Kingdom", Some(Country)),
            ("gbr", "United Kingdom", Some(Country)),
            ("great britain", "United Kingdom", Some(Country)),
            ("britain", "United Kingdom", Some(Country)),
            ("uae", "United Arab Emirates", Some(Country)),
            ("drc", "Democratic Republic of the Congo", Some(Country)),
            ("dr congo", "Democratic Republic of the Congo", Some(Country)),
            ("south korea", "Korea, Republic of", Some(Country)),
            ("korea", "Korea, Republic of", Some(Country)),
            ("russia", "Russian Federation", Some(Country)),
            ("iran", "Iran, Islamic Republic of", Some(Country)),
            ("vietnam", "Viet Nam", Some(Country)),
            ("deu", "Germany", Some(Country)),
            ("fra", "France", Some(Country)),
            ("chn", "China", Some(Country)),
            ("prc", "China", Some(Country)),
            ("ind", "India", Some(Country)),
            ("jpn", "Japan", Some(Country)),
            ("bra", "Brazil", Some(Country)),
            ("can", "Canada", Some(Country)),
            ("aus", "Australia", Some(Country)),
            ("rus", "Russian Federation", Some(Country)),
            ("mex", "Mexico", Some(Country)),
            ("idn", "Indonesia", Some(Country)),
            ("zaf", "South Africa", Some(Country)),
            ("kor", "Korea, Republic of", Some(Country)),
            // US states
            ("ca", "California", Some(Admin1)),
            ("calif", "California", Some(Admin1)),
            ("tx", "Texas", Some(Admin1)),
            ("ny", "New York", Some(Admin1)),
            ("fl", "Florida", Some(Admin1)),
            ("wa", "Washington", Some(Admin1)),
            ("il", "Illinois", Some(Admin1)),
            ("pa", "Pennsylvania", Some(Admin1)),
            ("oh", "Ohio", Some(Admin1)),
            ("ga", "Georgia", Some(Admin1)),
            ("nc", "North Carolina", Some(Admin1)),
            ("mi", "Michigan", Some(Admin1)),
            ("nj", "New Jersey", Some(Admin1)),
            ("va", "Virginia", Some(Admin1)),
            ("az", "Arizona", Some(Admin1)),
            ("ma", "Massachusetts", Some(Admin1)),
            // Cities
            ("nyc", "New York City", Some(City)),
            ("new york city", "New York City", Some(City)),
            ("la", "Los Angeles", Some(City)),
            ("sf", "San Francisco", Some(City)),
            ("dc", "Washington", Some(City)),
            ("washington dc", "Washington", Some(City)),
            ("washington d.c.", "Washington", Some(City)),
        ];
        entries.iter().map(|(alias, canonical, level)| (*alias, (*canonical, *level))).collect()
    };
}

/// Case-insensitive exact alias lookup.
pub fn lookup(name: &str) -> Option<(&'static str, Option<GeoLevel>)> {
    ALIASES.get(name.trim().to_lowercase().as_str()).copied()
}
