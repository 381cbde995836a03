use serde::ser::SerializeSeq;
use serde::{Deserialize, Serializer};
use url::Url;

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

pub fn serialize<S>(urls: &[Url], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut seq = serializer.serialize_seq(Some(urls.len()))?;
    for url in urls {
        seq.serialize_element(url.as_str())?;
    }
    seq.end()
}

/// Accepts either a list of URLs or a single comma separated string, the
/// latter being the only form an environment variable can express
pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Url>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        OneOrMany::Many(v) => v,
    };

    raw.iter()
        .map(|s| Url::parse(s).map_err(serde::de::Error::custom))
        .collect()
}
