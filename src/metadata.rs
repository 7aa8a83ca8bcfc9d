use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::domain::{SampleCode, SampleTree};
use crate::error::KiraError;
use crate::rpc::RpcClient;
use crate::session::SessionProvider;

pub const METADATA_SERVICE_PATH: &str = "openbis/openbis/rmi-application-server-v3.json";

pub trait MetadataClient: Send + Sync {
    /// Exact-code search returning every match with its full descendant
    /// subtree and the datasets each node owns.
    fn search_samples_by_code(&self, code: &SampleCode) -> Result<SampleTree, KiraError>;
}

pub struct MetadataHttpClient {
    rpc: RpcClient,
    session: Arc<dyn SessionProvider>,
}

impl MetadataHttpClient {
    pub fn new(rpc: RpcClient, session: Arc<dyn SessionProvider>) -> Self {
        Self { rpc, session }
    }
}

impl MetadataClient for MetadataHttpClient {
    fn search_samples_by_code(&self, code: &SampleCode) -> Result<SampleTree, KiraError> {
        let criteria = code_criteria(code);
        let fetch_options = sample_fetch_options();
        let result = self
            .rpc
            .call_with_session(self.session.as_ref(), "searchSamples", |token| {
                json!([token, criteria, fetch_options])
            })?;
        decode_samples(&result)
    }
}

pub fn code_criteria(code: &SampleCode) -> Value {
    json!({
        "@type": "as.dto.sample.search.SampleSearchCriteria",
        "operator": "AND",
        "criteria": [{
            "@type": "as.dto.common.search.CodeSearchCriteria",
            "fieldValue": {
                "@type": "as.dto.common.search.StringEqualToValue",
                "value": code.as_str(),
            }
        }]
    })
}

/// Fetch options whose `children` point back at themselves (`@id` 1), so the
/// service expands the whole descendant tree in one round trip.
pub fn sample_fetch_options() -> Value {
    json!({
        "@type": "as.dto.sample.fetchoptions.SampleFetchOptions",
        "@id": 1,
        "type": { "@type": "as.dto.sample.fetchoptions.SampleTypeFetchOptions" },
        "dataSets": { "@type": "as.dto.dataset.fetchoptions.DataSetFetchOptions" },
        "children": 1
    })
}

/// Builds a [`SampleTree`] from a `searchSamples` result.
///
/// Objects already serialized earlier in the response are replaced by their
/// integer `@id`, so every identified object is indexed before the tree is
/// assembled. Shared descendants and cycles end up as a single arena node.
pub fn decode_samples(result: &Value) -> Result<SampleTree, KiraError> {
    let objects = result
        .get("objects")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            KiraError::ServiceContract("searchSamples result has no objects list".to_string())
        })?;

    let mut index = HashMap::new();
    index_identified(result, &mut index);

    let mut decoder = Decoder {
        index,
        tree: SampleTree::new(),
        by_id: HashMap::new(),
        by_code: HashMap::new(),
    };

    let mut pending: Vec<(Option<usize>, &Value)> =
        objects.iter().rev().map(|value| (None, value)).collect();
    while let Some((parent, value)) = pending.pop() {
        let (node, fresh) = decoder.intern(value)?;
        match parent {
            Some(parent) => decoder.tree.add_child(parent, node),
            None => decoder.tree.add_root(node),
        }
        if !fresh {
            continue;
        }
        let sample = decoder.resolve(value)?;
        if let Some(children) = sample.get("children").and_then(Value::as_array) {
            pending.extend(children.iter().rev().map(|child| (Some(node), child)));
        }
    }

    Ok(decoder.tree)
}

struct Decoder<'a> {
    index: HashMap<i64, &'a Value>,
    tree: SampleTree,
    by_id: HashMap<i64, usize>,
    by_code: HashMap<String, usize>,
}

impl<'a> Decoder<'a> {
    fn resolve(&self, value: &'a Value) -> Result<&'a Value, KiraError> {
        match value {
            Value::Object(_) => Ok(value),
            Value::Number(number) => number
                .as_i64()
                .and_then(|id| self.index.get(&id).copied())
                .ok_or_else(|| {
                    KiraError::ServiceContract(format!("unresolved object reference {number}"))
                }),
            other => Err(KiraError::ServiceContract(format!(
                "unexpected sample entry: {other}"
            ))),
        }
    }

    /// Returns the arena index for `value` and whether it was created now.
    fn intern(&mut self, value: &'a Value) -> Result<(usize, bool), KiraError> {
        let sample = self.resolve(value)?;
        let object_id = sample.get("@id").and_then(Value::as_i64);
        if let Some(existing) = object_id.and_then(|id| self.by_id.get(&id)) {
            return Ok((*existing, false));
        }

        let code = sample
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| KiraError::ServiceContract("sample without code".to_string()))?;
        if let Some(existing) = self.by_code.get(code).copied() {
            if let Some(id) = object_id {
                self.by_id.insert(id, existing);
            }
            return Ok((existing, false));
        }

        let type_code = sample
            .get("type")
            .and_then(|value| self.resolve(value).ok())
            .and_then(|value| value.get("code"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let node = self.tree.push(code, type_code);
        if let Some(id) = object_id {
            self.by_id.insert(id, node);
        }
        self.by_code.insert(code.to_string(), node);

        if let Some(datasets) = sample.get("dataSets").and_then(Value::as_array) {
            for entry in datasets {
                let dataset = self.resolve(entry)?;
                let perm_id = dataset
                    .get("permId")
                    .and_then(|value| value.get("permId"))
                    .and_then(Value::as_str)
                    .or_else(|| dataset.get("code").and_then(Value::as_str))
                    .ok_or_else(|| {
                        KiraError::ServiceContract(format!("dataset of {code} without permId"))
                    })?;
                let registered_at = dataset
                    .get("registrationDate")
                    .and_then(parse_timestamp)
                    .ok_or_else(|| {
                        KiraError::ServiceContract(format!(
                            "dataset {perm_id} without registration date"
                        ))
                    })?;
                self.tree.add_dataset(node, perm_id, registered_at);
            }
        }

        Ok((node, true))
    }
}

fn index_identified<'a>(value: &'a Value, index: &mut HashMap<i64, &'a Value>) {
    let mut stack = vec![value];
    while let Some(value) = stack.pop() {
        match value {
            Value::Object(map) => {
                if let Some(id) = map.get("@id").and_then(Value::as_i64) {
                    index.entry(id).or_insert(value);
                }
                stack.extend(map.values());
            }
            Value::Array(items) => stack.extend(items.iter()),
            _ => {}
        }
    }
}

/// Registration dates arrive as epoch milliseconds or RFC 3339 strings.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(number) => number.as_i64().and_then(DateTime::from_timestamp_millis),
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|date| date.with_timezone(&Utc)),
        _ => None,
    }
}
