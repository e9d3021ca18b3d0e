use aws_sdk_s3::Client;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{
    BucketLocationConstraint, BucketVersioningStatus, CreateBucketConfiguration, Delete,
    ObjectIdentifier, Tag, Tagging, VersioningConfiguration,
};
use serde::{Deserialize, Serialize};
use stratus_engine::{BoxFuture, HandlerError, Live, OpContext, ResourceHandler, wait_for};

use crate::error::{build, remote};
use crate::ownership::{OWNER_TAG, owned_by};

const NO_SUCH_BUCKET: &str = "NoSuchBucket";
const NO_SUCH_TAG_SET: &str = "NoSuchTagSet";
const ACCESS_DENIED: &str = "AccessDenied";

/// DeleteObjects accepts at most this many keys per request.
const DELETE_BATCH: usize = 1000;

/// Buckets created without a location constraint land here.
const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BucketConfig {
    pub name: String,
    pub region: String,
    #[serde(default)]
    pub versioning: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketState {
    pub name: String,
    pub region: String,
    pub arn: String,
    pub versioning: bool,
}

impl BucketState {
    fn new(config: &BucketConfig, versioning: bool) -> Self {
        Self {
            name: config.name.clone(),
            region: config.region.clone(),
            arn: bucket_arn(&config.name),
            versioning,
        }
    }
}

pub fn bucket_arn(name: &str) -> String {
    format!("arn:aws:s3:::{name}")
}

fn service_code<E: ProvideErrorMetadata, R>(err: &SdkError<E, R>) -> Option<&str> {
    err.as_service_error().and_then(ProvideErrorMetadata::code)
}

pub struct S3BucketHandler {
    client: Client,
}

impl S3BucketHandler {
    pub const RESOURCE_TYPE: &'static str = "s3_bucket";

    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn versioning_enabled(&self, bucket: &str) -> Result<bool, HandlerError> {
        match self.client.get_bucket_versioning().bucket(bucket).send().await {
            Ok(resp) => Ok(resp.status() == Some(&BucketVersioningStatus::Enabled)),
            Err(e) if service_code(&e) == Some(NO_SUCH_BUCKET) => {
                Err(HandlerError::NotFound(bucket.to_string()))
            }
            Err(e) => Err(remote("GetBucketVersioning", &e)),
        }
    }

    async fn put_versioning(&self, bucket: &str, enabled: bool) -> Result<(), HandlerError> {
        let status = if enabled {
            BucketVersioningStatus::Enabled
        } else {
            BucketVersioningStatus::Suspended
        };
        self.client
            .put_bucket_versioning()
            .bucket(bucket)
            .versioning_configuration(VersioningConfiguration::builder().status(status).build())
            .send()
            .await
            .map_err(|e| {
                if service_code(&e) == Some(NO_SUCH_BUCKET) {
                    HandlerError::NotFound(bucket.to_string())
                } else {
                    remote("PutBucketVersioning", &e)
                }
            })?;
        tracing::info!(bucket, enabled, "S3 bucket versioning set");
        Ok(())
    }

    async fn tag_owner(&self, bucket: &str, owner: &str) -> Result<(), HandlerError> {
        let tag = Tag::builder()
            .key(OWNER_TAG)
            .value(owner)
            .build()
            .map_err(|e| build("bucket tag", &e))?;
        let tagging = Tagging::builder()
            .tag_set(tag)
            .build()
            .map_err(|e| build("bucket tagging", &e))?;
        self.client
            .put_bucket_tagging()
            .bucket(bucket)
            .tagging(tagging)
            .send()
            .await
            .map_err(|e| remote("PutBucketTagging", &e))?;
        Ok(())
    }

    /// Empty the bucket, old versions and delete markers included.
    /// Returns false if the bucket is already gone.
    async fn empty(&self, bucket: &str) -> Result<bool, HandlerError> {
        let mut key_marker: Option<String> = None;
        let mut version_id_marker: Option<String> = None;
        loop {
            let resp = match self
                .client
                .list_object_versions()
                .bucket(bucket)
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_id_marker.take())
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) if service_code(&e) == Some(NO_SUCH_BUCKET) => return Ok(false),
                Err(e) => return Err(remote("ListObjectVersions", &e)),
            };

            let versions = resp
                .versions()
                .iter()
                .map(|v| (v.key(), v.version_id()));
            let markers = resp
                .delete_markers()
                .iter()
                .map(|m| (m.key(), m.version_id()));
            let mut targets = Vec::new();
            for (key, version_id) in versions.chain(markers) {
                let Some(key) = key else { continue };
                targets.push(
                    ObjectIdentifier::builder()
                        .key(key)
                        .set_version_id(version_id.map(String::from))
                        .build()
                        .map_err(|e| build("object identifier", &e))?,
                );
            }

            for batch in targets.chunks(DELETE_BATCH) {
                self.delete_batch(bucket, batch.to_vec()).await?;
            }

            if resp.is_truncated() == Some(true) {
                key_marker = resp.next_key_marker().map(String::from);
                version_id_marker = resp.next_version_id_marker().map(String::from);
            } else {
                return Ok(true);
            }
        }
    }

    async fn delete_batch(
        &self,
        bucket: &str,
        objects: Vec<ObjectIdentifier>,
    ) -> Result<(), HandlerError> {
        let count = objects.len();
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| build("delete request", &e))?;
        let resp = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| remote("DeleteObjects", &e))?;

        if let Some(failed) = resp.errors().first() {
            return Err(HandlerError::Remote(format!(
                "DeleteObjects failed for {} of {count} objects, first {}: {}",
                resp.errors().len(),
                failed.key().unwrap_or("?"),
                failed.code().unwrap_or("unknown error"),
            )));
        }
        tracing::debug!(bucket, count, "deleted S3 object versions");
        Ok(())
    }
}

impl ResourceHandler for S3BucketHandler {
    type Config = BucketConfig;
    type State = BucketState;

    fn resource_type(&self) -> &str {
        Self::RESOURCE_TYPE
    }

    fn immutable_fields(&self) -> &[&str] {
        &["name", "region"]
    }

    fn describe<'a>(
        &'a self,
        _ctx: &'a OpContext,
        state: &'a BucketState,
    ) -> BoxFuture<'a, Result<Live<BucketConfig>, HandlerError>> {
        Box::pin(async move {
            let head = match self.client.head_bucket().bucket(&state.name).send().await {
                Ok(head) => head,
                Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => {
                    return Ok(Live::Absent);
                }
                Err(e) => return Err(remote("HeadBucket", &e)),
            };

            let versioning = match self.versioning_enabled(&state.name).await {
                Ok(enabled) => enabled,
                Err(HandlerError::NotFound(_)) => return Ok(Live::Absent),
                Err(e) => return Err(e),
            };

            Ok(Live::Present(BucketConfig {
                name: state.name.clone(),
                region: head
                    .bucket_region()
                    .map_or_else(|| state.region.clone(), String::from),
                versioning,
            }))
        })
    }

    fn create<'a>(
        &'a self,
        ctx: &'a OpContext,
        config: &'a BucketConfig,
    ) -> BoxFuture<'a, Result<BucketState, HandlerError>> {
        Box::pin(async move {
            // In us-east-1 CreateBucket answers 200 for a bucket this account
            // already owns. Any error here is left for CreateBucket to report.
            if self.client.head_bucket().bucket(&config.name).send().await.is_ok() {
                tracing::debug!(bucket = %config.name, "S3 bucket already exists");
                return Err(HandlerError::AlreadyExists(config.name.clone()));
            }

            let mut builder = self.client.create_bucket().bucket(&config.name);

            if config.region != DEFAULT_REGION {
                builder = builder.create_bucket_configuration(
                    CreateBucketConfiguration::builder()
                        .location_constraint(BucketLocationConstraint::from(
                            config.region.as_str(),
                        ))
                        .build(),
                );
            }

            if let Err(e) = builder.send().await {
                let conflict = e.as_service_error().is_some_and(|se| {
                    se.is_bucket_already_owned_by_you() || se.is_bucket_already_exists()
                });
                return Err(if conflict {
                    HandlerError::AlreadyExists(config.name.clone())
                } else {
                    remote("CreateBucket", &e)
                });
            }

            // Tag first so an interrupted create can still be adopted.
            self.tag_owner(&config.name, ctx.owner()).await?;

            let client = &self.client;
            let bucket = config.name.as_str();
            wait_for(ctx, "S3 bucket visible", move || async move {
                match client.head_bucket().bucket(bucket).send().await {
                    Ok(_) => Ok(Some(())),
                    Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(None),
                    Err(e) => Err(remote("HeadBucket", &e)),
                }
            })
            .await?;

            if config.versioning {
                self.put_versioning(&config.name, true).await?;
            }

            tracing::info!(bucket = %config.name, region = %config.region, "S3 bucket created");
            Ok(BucketState::new(config, config.versioning))
        })
    }

    fn adopt<'a>(
        &'a self,
        ctx: &'a OpContext,
        config: &'a BucketConfig,
    ) -> BoxFuture<'a, Result<Option<BucketState>, HandlerError>> {
        Box::pin(async move {
            let tagging = match self
                .client
                .get_bucket_tagging()
                .bucket(&config.name)
                .send()
                .await
            {
                Ok(resp) => resp,
                // Someone else's bucket, or one we never got to tag.
                Err(e) if matches!(service_code(&e), Some(NO_SUCH_TAG_SET | ACCESS_DENIED)) => {
                    return Ok(None);
                }
                Err(e) => return Err(remote("GetBucketTagging", &e)),
            };

            let tags = tagging.tag_set().iter().map(|t| (t.key(), Some(t.value())));
            if !owned_by(tags, ctx.owner()) {
                return Ok(None);
            }

            let versioning = self.versioning_enabled(&config.name).await?;
            tracing::info!(bucket = %config.name, "adopting existing S3 bucket");
            Ok(Some(BucketState::new(config, versioning)))
        })
    }

    fn update<'a>(
        &'a self,
        _ctx: &'a OpContext,
        config: &'a BucketConfig,
        state: &'a BucketState,
    ) -> BoxFuture<'a, Result<BucketState, HandlerError>> {
        Box::pin(async move {
            // Unconditional: the live status may have drifted from what
            // was recorded.
            self.put_versioning(&state.name, config.versioning).await?;
            Ok(BucketState {
                versioning: config.versioning,
                ..state.clone()
            })
        })
    }

    fn delete<'a>(
        &'a self,
        _ctx: &'a OpContext,
        state: &'a BucketState,
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            if !self.empty(&state.name).await? {
                tracing::debug!(bucket = %state.name, "S3 bucket already gone");
                return Ok(());
            }

            match self.client.delete_bucket().bucket(&state.name).send().await {
                Ok(_) => tracing::info!(bucket = %state.name, "S3 bucket deleted"),
                Err(e) if service_code(&e) == Some(NO_SUCH_BUCKET) => {
                    tracing::debug!(bucket = %state.name, "S3 bucket already gone");
                }
                Err(e) => return Err(remote("DeleteBucket", &e)),
            }
            Ok(())
        })
    }
}
