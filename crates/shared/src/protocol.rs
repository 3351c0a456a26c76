use std::collections::BTreeMap;

use serde::{
    de::{DeserializeOwned, Error as _},
    Deserialize, Deserializer, Serialize,
};
use serde_json::Value;

/// Caller-supplied query parameters merged into every page request (filters, search, ordering).
pub type ExtraParams = BTreeMap<String, Value>;

const RESERVED_KEYS: [&str; 2] = ["page", "page_size"];

/// Number of pages needed to hold `total_count` records.
pub fn total_pages(total_count: u64, page_size: u32) -> u32 {
    if page_size == 0 {
        return 0;
    }
    let pages = total_count.div_ceil(u64::from(page_size));
    u32::try_from(pages).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchRequest {
    pub page: u32,
    pub page_size: u32,
    #[serde(flatten)]
    pub extra: ExtraParams,
}

impl FetchRequest {
    pub fn new(page: u32, page_size: u32, extra: ExtraParams) -> Self {
        Self {
            page,
            page_size,
            extra,
        }
    }

    /// Flattens the request into URL query pairs.
    ///
    /// `page` and `page_size` always come first; extra keys that collide with them are
    /// ignored. Arrays repeat their key once per element and `null` values are omitted.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_string(), self.page.to_string()),
            ("page_size".to_string(), self.page_size.to_string()),
        ];
        for (key, value) in &self.extra {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            match value {
                Value::Null => {}
                Value::Array(values) => {
                    for value in values {
                        if let Some(text) = query_value(value) {
                            pairs.push((key.clone(), text));
                        }
                    }
                }
                other => {
                    if let Some(text) = query_value(other) {
                        pairs.push((key.clone(), text));
                    }
                }
            }
        }
        pairs
    }
}

fn query_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// A list response in any of the shapes the backend is known to produce.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FetchResponse<T> {
    /// `[item, ...]`
    Bare(Vec<T>),
    /// `{"results": [...], "count": n}`, optionally nested under `data`.
    Envelope(ResponseEnvelope<T>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ResponseEnvelope<T> {
    #[serde(default, deserialize_with = "lenient_list")]
    pub results: Option<Vec<T>>,
    pub count: Option<u64>,
    pub data: Option<ResponseData<T>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged, bound(deserialize = "T: Deserialize<'de>"))]
pub enum ResponseData<T> {
    List(Vec<T>),
    Envelope {
        #[serde(default, deserialize_with = "lenient_list")]
        results: Option<Vec<T>>,
        count: Option<u64>,
    },
}

/// `results` that is present but not a list reads as an empty page, so `count` survives.
/// `null` reads as absent and falls through to the nested `data` fields.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Option<Vec<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Array(items) => Vec::<T>::deserialize(Value::Array(items))
            .map(Some)
            .map_err(D::Error::custom),
        _ => Ok(Some(Vec::new())),
    }
}

impl<T> FetchResponse<T> {
    pub fn empty() -> Self {
        FetchResponse::Bare(Vec::new())
    }

    pub fn envelope(results: Vec<T>, count: u64) -> Self {
        FetchResponse::Envelope(ResponseEnvelope {
            results: Some(results),
            count: Some(count),
            data: None,
        })
    }

    pub fn wrapped(results: Vec<T>, count: u64) -> Self {
        FetchResponse::Envelope(ResponseEnvelope {
            results: None,
            count: None,
            data: Some(ResponseData::Envelope {
                results: Some(results),
                count: Some(count),
            }),
        })
    }

    /// Decodes a raw JSON body. Bodies matching none of the known shapes, or carrying items
    /// that don't decode as `T`, are an error.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(value)
    }

    /// Collapses the response into `(items, total_count)`.
    ///
    /// Top-level `results`/`count` take precedence over the nested `data` fields; a missing
    /// count falls back to the number of items.
    pub fn normalize(self) -> (Vec<T>, u64) {
        match self {
            FetchResponse::Bare(items) => {
                let total = items.len() as u64;
                (items, total)
            }
            FetchResponse::Envelope(envelope) => envelope.normalize(),
        }
    }
}

impl<T> ResponseEnvelope<T> {
    fn normalize(self) -> (Vec<T>, u64) {
        let (nested_results, nested_count) = match self.data {
            Some(ResponseData::List(items)) => (Some(items), None),
            Some(ResponseData::Envelope { results, count }) => (results, count),
            None => (None, None),
        };
        let items = self.results.or(nested_results).unwrap_or_default();
        let total = self
            .count
            .or(nested_count)
            .unwrap_or(items.len() as u64);
        (items, total)
    }
}

/// One committed page of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub page: u32,
}
