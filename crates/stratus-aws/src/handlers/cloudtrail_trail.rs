use aws_sdk_cloudtrail::Client;
use aws_sdk_cloudtrail::types::Tag;
use serde::{Deserialize, Serialize};
use stratus_engine::{BoxFuture, HandlerError, Live, OpContext, ResourceHandler};

use crate::error::{build, remote};
use crate::ownership::{OWNER_TAG, owned_by};

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrailConfig {
    pub name: String,
    pub s3_bucket: String,
    #[serde(default)]
    pub s3_key_prefix: Option<String>,
    #[serde(default)]
    pub multi_region: bool,
    /// Whether the trail should be recording.
    #[serde(default = "enabled")]
    pub logging: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailState {
    pub name: String,
    pub arn: String,
    pub s3_bucket: String,
    /// Required in recorded state; `null` when the trail has no prefix.
    #[serde(deserialize_with = "Option::deserialize")]
    pub s3_key_prefix: Option<String>,
    pub multi_region: bool,
    pub logging: bool,
}

impl TrailState {
    fn new(arn: String, config: &TrailConfig) -> Self {
        Self {
            name: config.name.clone(),
            arn,
            s3_bucket: config.s3_bucket.clone(),
            s3_key_prefix: config.s3_key_prefix.clone(),
            multi_region: config.multi_region,
            logging: config.logging,
        }
    }
}

pub struct CloudTrailTrailHandler {
    client: Client,
}

impl CloudTrailTrailHandler {
    pub const RESOURCE_TYPE: &'static str = "cloudtrail_trail";

    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// `name` may be the trail name or its ARN.
    async fn read(&self, name: &str) -> Result<Option<(String, TrailConfig)>, HandlerError> {
        let resp = match self.client.get_trail().name(name).send().await {
            Ok(resp) => resp,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_trail_not_found_exception()) =>
            {
                return Ok(None);
            }
            Err(e) => return Err(remote("cloudtrail:GetTrail", &e)),
        };
        let Some(trail) = resp.trail() else {
            return Ok(None);
        };

        let status = match self.client.get_trail_status().name(name).send().await {
            Ok(status) => status,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_trail_not_found_exception()) =>
            {
                return Ok(None);
            }
            Err(e) => return Err(remote("cloudtrail:GetTrailStatus", &e)),
        };

        let arn = trail.trail_arn().unwrap_or_default().to_string();
        let config = TrailConfig {
            name: trail.name().unwrap_or(name).to_string(),
            s3_bucket: trail.s3_bucket_name().unwrap_or_default().to_string(),
            s3_key_prefix: trail.s3_key_prefix().map(String::from),
            multi_region: trail.is_multi_region_trail().unwrap_or(false),
            logging: status.is_logging().unwrap_or(false),
        };
        Ok(Some((arn, config)))
    }

    async fn set_logging(&self, name: &str, on: bool) -> Result<(), HandlerError> {
        if on {
            match self.client.start_logging().name(name).send().await {
                Ok(_) => {}
                Err(e)
                    if e.as_service_error()
                        .is_some_and(|se| se.is_trail_not_found_exception()) =>
                {
                    return Err(HandlerError::NotFound(name.to_string()));
                }
                Err(e) => return Err(remote("cloudtrail:StartLogging", &e)),
            }
        } else {
            match self.client.stop_logging().name(name).send().await {
                Ok(_) => {}
                Err(e)
                    if e.as_service_error()
                        .is_some_and(|se| se.is_trail_not_found_exception()) =>
                {
                    return Err(HandlerError::NotFound(name.to_string()));
                }
                Err(e) => return Err(remote("cloudtrail:StopLogging", &e)),
            }
        }
        tracing::info!(trail = name, logging = on, "CloudTrail logging set");
        Ok(())
    }
}

impl ResourceHandler for CloudTrailTrailHandler {
    type Config = TrailConfig;
    type State = TrailState;

    fn resource_type(&self) -> &str {
        Self::RESOURCE_TYPE
    }

    fn immutable_fields(&self) -> &[&str] {
        &["name"]
    }

    fn describe<'a>(
        &'a self,
        _ctx: &'a OpContext,
        state: &'a TrailState,
    ) -> BoxFuture<'a, Result<Live<TrailConfig>, HandlerError>> {
        Box::pin(async move {
            Ok(match self.read(&state.arn).await? {
                Some((_, config)) => Live::Present(config),
                None => Live::Absent,
            })
        })
    }

    fn create<'a>(
        &'a self,
        ctx: &'a OpContext,
        config: &'a TrailConfig,
    ) -> BoxFuture<'a, Result<TrailState, HandlerError>> {
        Box::pin(async move {
            let tag = Tag::builder()
                .key(OWNER_TAG)
                .value(ctx.owner())
                .build()
                .map_err(|e| build("trail tag", &e))?;

            let result = self
                .client
                .create_trail()
                .name(&config.name)
                .s3_bucket_name(&config.s3_bucket)
                .set_s3_key_prefix(config.s3_key_prefix.clone())
                .is_multi_region_trail(config.multi_region)
                .tags_list(tag)
                .send()
                .await
                .map_err(|e| {
                    if e.as_service_error()
                        .is_some_and(|se| se.is_trail_already_exists_exception())
                    {
                        HandlerError::AlreadyExists(config.name.clone())
                    } else {
                        remote("cloudtrail:CreateTrail", &e)
                    }
                })?;

            let arn = result
                .trail_arn()
                .ok_or_else(|| HandlerError::Remote("CreateTrail returned no ARN".into()))?
                .to_string();
            tracing::info!(trail = %config.name, arn = %arn, "CloudTrail trail created");

            // New trails start out not logging.
            if config.logging {
                self.set_logging(&arn, true).await?;
            }
            Ok(TrailState::new(arn, config))
        })
    }

    fn adopt<'a>(
        &'a self,
        ctx: &'a OpContext,
        config: &'a TrailConfig,
    ) -> BoxFuture<'a, Result<Option<TrailState>, HandlerError>> {
        Box::pin(async move {
            let Some((arn, live)) = self.read(&config.name).await? else {
                return Ok(None);
            };

            let tags = self
                .client
                .list_tags()
                .resource_id_list(&arn)
                .send()
                .await
                .map_err(|e| remote("cloudtrail:ListTags", &e))?;
            let owned = owned_by(
                tags.resource_tag_list()
                    .iter()
                    .flat_map(|r| r.tags_list())
                    .map(|t| (t.key(), t.value())),
                ctx.owner(),
            );
            if !owned {
                return Ok(None);
            }

            tracing::info!(trail = %config.name, arn = %arn, "adopting existing CloudTrail trail");
            Ok(Some(TrailState::new(arn, &live)))
        })
    }

    fn update<'a>(
        &'a self,
        _ctx: &'a OpContext,
        config: &'a TrailConfig,
        state: &'a TrailState,
    ) -> BoxFuture<'a, Result<TrailState, HandlerError>> {
        Box::pin(async move {
            self.client
                .update_trail()
                .name(&state.arn)
                .s3_bucket_name(&config.s3_bucket)
                .set_s3_key_prefix(config.s3_key_prefix.clone())
                .is_multi_region_trail(config.multi_region)
                .send()
                .await
                .map_err(|e| {
                    if e.as_service_error()
                        .is_some_and(|se| se.is_trail_not_found_exception())
                    {
                        HandlerError::NotFound(state.name.clone())
                    } else {
                        remote("cloudtrail:UpdateTrail", &e)
                    }
                })?;
            tracing::info!(trail = %state.name, "CloudTrail trail updated");

            // Idempotent either way; the live status may have drifted.
            self.set_logging(&state.arn, config.logging).await?;
            Ok(TrailState::new(state.arn.clone(), config))
        })
    }

    fn delete<'a>(
        &'a self,
        _ctx: &'a OpContext,
        state: &'a TrailState,
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            match self.client.delete_trail().name(&state.arn).send().await {
                Ok(_) => tracing::info!(arn = %state.arn, "CloudTrail trail deleted"),
                Err(e)
                    if e.as_service_error()
                        .is_some_and(|se| se.is_trail_not_found_exception()) =>
                {
                    tracing::debug!(arn = %state.arn, "CloudTrail trail already gone");
                }
                Err(e) => return Err(remote("cloudtrail:DeleteTrail", &e)),
            }
            Ok(())
        })
    }
}
