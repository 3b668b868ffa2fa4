//! Millisecond (de)serialization for `Duration` fields, used as
//! `#[serde(with = "serde_duration")]` on `*_ms` keys.

use core::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

pub mod option {
    use core::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => super::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<u64>::deserialize(deserializer).map(|millis| millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Deserialize, Serialize)]
    struct Timeouts {
        #[serde(with = "super")]
        interval: Duration,
        #[serde(default, with = "super::option")]
        limit: Option<Duration>,
    }

    #[test]
    fn test_millis_and_missing_option() {
        let timeouts: Timeouts = toml::from_str("interval = 1500").expect("valid toml");

        assert_eq!(
            timeouts,
            Timeouts {
                interval: Duration::from_millis(1500),
                limit: None,
            },
            "milliseconds in, no limit when the key is absent"
        );
    }

    #[test]
    fn test_oversized_durations_saturate() {
        let timeouts = Timeouts {
            interval: Duration::MAX,
            limit: Some(Duration::from_secs(2)),
        };

        assert_eq!(
            serde_json::to_value(&timeouts).expect("serializes"),
            serde_json::json!({ "interval": u64::MAX, "limit": 2000 }),
            "an unrepresentable duration is clamped and the option is written in millis"
        );
    }
}
