use database::SubscriptionRecord;

/// Place value that selects every subscriber, in filters and in records.
pub const ALL_PLACES: &str = "ALL";

/// Which subscribers a batch should reach.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchFilter {
    pub place: String,
    pub hour: Option<u8>,
}

fn all_places() -> String {
    ALL_PLACES.to_owned()
}

impl Default for DispatchFilter {
    fn default() -> Self {
        DispatchFilter {
            place: all_places(),
            hour: None,
        }
    }
}

impl DispatchFilter {
    pub fn new(place: Option<String>, hour: Option<u8>) -> Self {
        DispatchFilter {
            place: place
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(all_places),
            hour,
        }
    }

    /// A record without places, or listing `ALL`, follows every place.
    /// An unset hour matches any record hour.
    pub fn matches(&self, record: &SubscriptionRecord) -> bool {
        let place_matches = self.place == ALL_PLACES
            || record.places.is_empty()
            || record
                .places
                .iter()
                .any(|place| place == ALL_PLACES || *place == self.place);

        let hour_matches = match self.hour {
            None => true,
            Some(hour) => record.hour == Some(hour),
        };

        place_matches && hour_matches
    }
}
