use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::Client;
use serde_json::{Value, json};

use crate::domain::{FilePermId, RemoteFile};
use crate::error::KiraError;
use crate::rpc::{self, RpcClient, Service};
use crate::session::SessionProvider;

pub const DATASTORE_SERVICE_PATH: &str = "datastore_server/rmi-data-store-server-v3.json";

pub trait FileStoreClient: Send + Sync {
    fn name(&self) -> &str;
    /// Every entry (directories included) belonging to the dataset.
    fn list_files(&self, dataset_perm_id: &str) -> Result<Vec<RemoteFile>, KiraError>;
    /// Opens a byte stream over one file.
    fn download_file(&self, file: &FilePermId) -> Result<Box<dyn Read + Send>, KiraError>;
}

pub struct DataStoreHttpClient {
    name: String,
    base_url: Url,
    rpc: RpcClient,
    client: Client,
    session: Arc<dyn SessionProvider>,
}

impl DataStoreHttpClient {
    pub fn new(
        name: &str,
        base_url: Url,
        timeout: Duration,
        session: Arc<dyn SessionProvider>,
    ) -> Result<Self, KiraError> {
        let endpoint = rpc::service_url(&base_url, DATASTORE_SERVICE_PATH)?;
        let rpc = RpcClient::new(endpoint, timeout, Service::DataStore)?;
        // The blocking response applies `timeout` to every body read, so a
        // stalled stream fails the attempt without capping the file size.
        let client = rpc::http_client(timeout, Some(timeout), Service::DataStore)?;
        Ok(Self {
            name: name.to_string(),
            base_url,
            rpc,
            client,
            session,
        })
    }

    pub fn download_url(&self, file: &FilePermId, token: &str) -> Result<Url, KiraError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                KiraError::InvalidConfig(format!("data store URL cannot be a base: {}", self.base_url))
            })?
            .pop_if_empty()
            .push("datastore_server")
            .push(&file.dataset)
            .extend(file.path.split('/').filter(|segment| !segment.is_empty()));
        url.query_pairs_mut().append_pair("sessionID", token);
        Ok(url)
    }

    fn open(&self, file: &FilePermId, token: &str) -> Result<reqwest::blocking::Response, KiraError> {
        let url = self.download_url(file, token)?;
        self.client
            .get(url)
            .send()
            .map_err(|err| KiraError::DataStoreHttp(err.to_string()))
    }
}

impl FileStoreClient for DataStoreHttpClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_files(&self, dataset_perm_id: &str) -> Result<Vec<RemoteFile>, KiraError> {
        let criteria = file_criteria(dataset_perm_id);
        let fetch_options = json!({
            "@type": "dss.dto.datasetfile.fetchoptions.DataSetFileFetchOptions"
        });
        let result = self
            .rpc
            .call_with_session(self.session.as_ref(), "searchFiles", |token| {
                json!([token, criteria, fetch_options])
            })?;
        decode_files(&result)
    }

    fn download_file(&self, file: &FilePermId) -> Result<Box<dyn Read + Send>, KiraError> {
        let token = self.session.token()?;
        let mut response = self.open(file, &token)?;
        if matches!(response.status().as_u16(), 401 | 403) {
            tracing::info!(store = %self.name, "download rejected; logging in again");
            let token = self.session.refresh()?;
            response = self.open(file, &token)?;
        }
        let response = rpc::handle_status(response, Service::DataStore)?;
        Ok(Box::new(response))
    }
}

pub fn file_criteria(dataset_perm_id: &str) -> Value {
    json!({
        "@type": "dss.dto.datasetfile.search.DataSetFileSearchCriteria",
        "operator": "AND",
        "criteria": [{
            "@type": "as.dto.dataset.search.DataSetSearchCriteria",
            "relation": "DATASET",
            "operator": "OR",
            "criteria": [{
                "@type": "as.dto.common.search.PermIdSearchCriteria",
                "fieldValue": {
                    "@type": "as.dto.common.search.StringEqualToValue",
                    "value": dataset_perm_id,
                }
            }]
        }]
    })
}

pub fn decode_files(result: &Value) -> Result<Vec<RemoteFile>, KiraError> {
    let objects = result
        .get("objects")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            KiraError::ServiceContract("searchFiles result has no objects list".to_string())
        })?;

    objects.iter().map(decode_file).collect()
}

fn decode_file(value: &Value) -> Result<RemoteFile, KiraError> {
    let path = value
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| KiraError::ServiceContract("file entry without path".to_string()))?;
    let perm_id = value.get("permId");
    let dataset = perm_id
        .and_then(|id| id.get("dataSetId"))
        .and_then(|id| id.get("permId"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            KiraError::ServiceContract(format!("file {path} without owning dataset"))
        })?;
    let file_path = perm_id
        .and_then(|id| id.get("filePath"))
        .and_then(Value::as_str)
        .unwrap_or(path);
    let directory = value
        .get("directory")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let (length, crc32) = if directory {
        (0, 0)
    } else {
        let length = value
            .get("fileLength")
            .and_then(Value::as_u64)
            .ok_or_else(|| KiraError::ServiceContract(format!("file {path} without length")))?;
        let crc32 = value
            .get("checksumCRC32")
            .and_then(crc_from_json)
            .ok_or_else(|| KiraError::ServiceContract(format!("file {path} without CRC32")))?;
        (length, crc32)
    };

    Ok(RemoteFile {
        perm_id: FilePermId {
            dataset: dataset.to_string(),
            path: file_path.to_string(),
        },
        path: path.to_string(),
        length,
        crc32,
        directory,
    })
}

/// CRC32 values may arrive as signed 32-bit integers; the bit pattern is kept.
pub fn crc_from_json(value: &Value) -> Option<u32> {
    let number = value.as_i64()?;
    if number < 0 {
        i32::try_from(number).ok().map(|signed| signed as u32)
    } else {
        u32::try_from(number).ok()
    }
}
