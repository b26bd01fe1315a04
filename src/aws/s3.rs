//! Object store backed by Amazon S3

use super::interface_error;
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_s3::types::{StorageClass as S3StorageClass, Tag, Tagging, TaggingDirective};
use aws_sdk_s3::Client;
use cheyenne_core_interface::{
    CopyReceipt, CopyRequest, InterfaceError, ObjectRef, ObjectStore, Result, TagMap,
};
use tracing::debug;
use url::form_urlencoded;

#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: Client::new(sdk_config),
        }
    }
}

/// Narrow missing-object service codes down to [`InterfaceError::NotFound`]
fn for_object(error: InterfaceError, object: &ObjectRef) -> InterfaceError {
    match error {
        InterfaceError::Service { ref code, .. }
            if code == "NoSuchKey" || code == "NoSuchVersion" || code == "NotFound" =>
        {
            InterfaceError::NotFound {
                bucket: object.bucket.clone(),
                key: object.key.clone(),
            }
        }
        other => other,
    }
}

fn encode_segment(segment: &str) -> String {
    form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// `bucket/key[?versionId=...]`, percent-encoded, path separators kept
pub fn copy_source(object: &ObjectRef) -> String {
    let key = object
        .key
        .split('/')
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/");
    let mut source = format!("{}/{}", encode_segment(&object.bucket), key);
    if let Some(version) = &object.version_id {
        source.push_str("?versionId=");
        source.push_str(&encode_segment(version));
    }
    source
}

/// Tag set as the query-string encoded header a copy request carries
pub fn tagging_header(tags: &TagMap) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(tags.iter())
        .finish()
}

fn tag_set(tags: TagMap) -> Result<Tagging> {
    let tags = tags
        .into_iter()
        .map(|(key, value)| {
            Tag::builder()
                .key(key)
                .value(value)
                .build()
                .map_err(|e| InterfaceError::InvalidRequest(e.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    Tagging::builder()
        .set_tag_set(Some(tags))
        .build()
        .map_err(|e| InterfaceError::InvalidRequest(e.to_string()))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_tags(&self, object: &ObjectRef) -> Result<TagMap> {
        let output = self
            .client
            .get_object_tagging()
            .bucket(&object.bucket)
            .key(&object.key)
            .set_version_id(object.version_id.clone())
            .send()
            .await
            .map_err(|e| for_object(interface_error(e), object))?;

        Ok(output
            .tag_set()
            .iter()
            .map(|tag| (tag.key().to_string(), tag.value().to_string()))
            .collect())
    }

    async fn copy_object(&self, request: CopyRequest) -> Result<CopyReceipt> {
        let source = copy_source(&request.source);
        debug!(copy_source = %source, "issuing server-side copy");

        let output = self
            .client
            .copy_object()
            .copy_source(source)
            .bucket(&request.destination_bucket)
            .key(&request.destination_key)
            .storage_class(S3StorageClass::from(request.storage_class.as_str()))
            .tagging_directive(TaggingDirective::Replace)
            .tagging(tagging_header(&request.tags))
            .send()
            .await
            .map_err(|e| for_object(interface_error(e), &request.source))?;

        Ok(CopyReceipt {
            version_id: output.version_id().map(str::to_string),
            kms_key_id: output.ssekms_key_id().map(str::to_string),
        })
    }

    async fn put_tags(&self, object: &ObjectRef, tags: TagMap) -> Result<()> {
        self.client
            .put_object_tagging()
            .bucket(&object.bucket)
            .key(&object.key)
            .set_version_id(object.version_id.clone())
            .tagging(tag_set(tags)?)
            .send()
            .await
            .map_err(|e| for_object(interface_error(e), object))?;
        Ok(())
    }
}
