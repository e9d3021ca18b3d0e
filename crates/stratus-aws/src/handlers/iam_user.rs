use std::collections::BTreeSet;

use aws_sdk_iam::Client;
use aws_sdk_iam::types::{Tag, User};
use serde::{Deserialize, Serialize};
use stratus_engine::{
    BoxFuture, FieldDrift, HandlerError, Live, OpContext, ResourceHandler, diff, wait_for,
};

use crate::error::{build, remote};
use crate::ownership::{OWNER_TAG, owned_by};

fn default_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserConfig {
    pub name: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Managed policies attached to the user. Order is not significant.
    #[serde(default)]
    pub managed_policy_arns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState {
    pub name: String,
    pub arn: String,
    pub user_id: String,
    pub path: String,
    pub managed_policy_arns: Vec<String>,
}

impl UserState {
    fn from_user(user: &User, managed_policy_arns: Vec<String>) -> Self {
        Self {
            name: user.user_name().to_string(),
            arn: user.arn().to_string(),
            user_id: user.user_id().to_string(),
            path: user.path().to_string(),
            managed_policy_arns,
        }
    }
}

pub struct IamUserHandler {
    client: Client,
}

impl IamUserHandler {
    pub const RESOURCE_TYPE: &'static str = "iam_user";

    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_user(&self, name: &str) -> Result<Option<User>, HandlerError> {
        match self.client.get_user().user_name(name).send().await {
            Ok(resp) => Ok(resp.user().cloned()),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_no_such_entity_exception()) =>
            {
                Ok(None)
            }
            Err(e) => Err(remote("iam:GetUser", &e)),
        }
    }

    async fn attached_policies(&self, name: &str) -> Result<Vec<String>, HandlerError> {
        let mut arns = Vec::new();
        let mut marker = None;
        loop {
            let mut req = self.client.list_attached_user_policies().user_name(name);
            if let Some(m) = &marker {
                req = req.marker(m);
            }
            let resp = req.send().await.map_err(|e| {
                if e.as_service_error()
                    .is_some_and(|se| se.is_no_such_entity_exception())
                {
                    HandlerError::NotFound(name.to_string())
                } else {
                    remote("iam:ListAttachedUserPolicies", &e)
                }
            })?;

            arns.extend(
                resp.attached_policies()
                    .iter()
                    .filter_map(|p| p.policy_arn().map(String::from)),
            );

            if resp.is_truncated() {
                marker = resp.marker().map(String::from);
            } else {
                break;
            }
        }
        arns.sort();
        Ok(arns)
    }

    async fn attach(&self, name: &str, policy_arn: &str) -> Result<(), HandlerError> {
        self.client
            .attach_user_policy()
            .user_name(name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .is_some_and(|se| se.is_no_such_entity_exception())
                {
                    HandlerError::NotFound(name.to_string())
                } else {
                    remote("iam:AttachUserPolicy", &e)
                }
            })?;
        tracing::info!(user = name, policy_arn, "attached IAM policy");
        Ok(())
    }

    async fn detach(&self, name: &str, policy_arn: &str) -> Result<(), HandlerError> {
        match self
            .client
            .detach_user_policy()
            .user_name(name)
            .policy_arn(policy_arn)
            .send()
            .await
        {
            Ok(_) => {
                tracing::info!(user = name, policy_arn, "detached IAM policy");
                Ok(())
            }
            // Either the user or the attachment is already gone.
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_no_such_entity_exception()) =>
            {
                Ok(())
            }
            Err(e) => Err(remote("iam:DetachUserPolicy", &e)),
        }
    }

    /// Bring attachments from `current` to `desired`. Returns the new set.
    async fn sync_policies(
        &self,
        name: &str,
        current: &[String],
        desired: &[String],
    ) -> Result<Vec<String>, HandlerError> {
        let current: BTreeSet<&str> = current.iter().map(String::as_str).collect();
        let desired: BTreeSet<&str> = desired.iter().map(String::as_str).collect();

        for arn in current.difference(&desired) {
            self.detach(name, arn).await?;
        }
        for arn in desired.difference(&current) {
            self.attach(name, arn).await?;
        }
        Ok(desired.into_iter().map(String::from).collect())
    }

    /// IAM refuses to delete a user with attached policies or access keys.
    async fn delete_dependents(&self, state: &UserState) -> Result<(), HandlerError> {
        let policies = match self.attached_policies(&state.name).await {
            Ok(arns) => arns,
            Err(HandlerError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        for arn in &policies {
            self.detach(&state.name, arn).await?;
        }

        let keys = match self
            .client
            .list_access_keys()
            .user_name(&state.name)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_no_such_entity_exception()) =>
            {
                return Ok(());
            }
            Err(e) => return Err(remote("iam:ListAccessKeys", &e)),
        };

        for key_id in keys
            .access_key_metadata()
            .iter()
            .filter_map(|k| k.access_key_id())
        {
            match self
                .client
                .delete_access_key()
                .user_name(&state.name)
                .access_key_id(key_id)
                .send()
                .await
            {
                Ok(_) => tracing::info!(user = %state.name, "deleted IAM access key"),
                Err(e)
                    if e.as_service_error()
                        .is_some_and(|se| se.is_no_such_entity_exception()) => {}
                Err(e) => return Err(remote("iam:DeleteAccessKey", &e)),
            }
        }
        Ok(())
    }
}

impl ResourceHandler for IamUserHandler {
    type Config = UserConfig;
    type State = UserState;

    fn resource_type(&self) -> &str {
        Self::RESOURCE_TYPE
    }

    fn immutable_fields(&self) -> &[&str] {
        &["name"]
    }

    fn describe<'a>(
        &'a self,
        _ctx: &'a OpContext,
        state: &'a UserState,
    ) -> BoxFuture<'a, Result<Live<UserConfig>, HandlerError>> {
        Box::pin(async move {
            let Some(user) = self.get_user(&state.name).await? else {
                return Ok(Live::Absent);
            };
            let managed_policy_arns = match self.attached_policies(&state.name).await {
                Ok(arns) => arns,
                Err(HandlerError::NotFound(_)) => return Ok(Live::Absent),
                Err(e) => return Err(e),
            };
            Ok(Live::Present(UserConfig {
                name: user.user_name().to_string(),
                path: user.path().to_string(),
                managed_policy_arns,
            }))
        })
    }

    fn diff(&self, desired: &UserConfig, live: &UserConfig) -> Result<Vec<FieldDrift>, HandlerError> {
        let mut desired = desired.clone();
        desired.managed_policy_arns.sort();
        desired.managed_policy_arns.dedup();
        let desired = serde_json::to_value(desired)?;
        let live = serde_json::to_value(live)?;
        Ok(diff::field_diff(&desired, &live, self.immutable_fields()))
    }

    fn create<'a>(
        &'a self,
        ctx: &'a OpContext,
        config: &'a UserConfig,
    ) -> BoxFuture<'a, Result<UserState, HandlerError>> {
        Box::pin(async move {
            let tag = Tag::builder()
                .key(OWNER_TAG)
                .value(ctx.owner())
                .build()
                .map_err(|e| build("user tag", &e))?;

            let resp = self
                .client
                .create_user()
                .user_name(&config.name)
                .path(&config.path)
                .tags(tag)
                .send()
                .await
                .map_err(|e| {
                    if e.as_service_error()
                        .is_some_and(|se| se.is_entity_already_exists_exception())
                    {
                        HandlerError::AlreadyExists(config.name.clone())
                    } else {
                        remote("iam:CreateUser", &e)
                    }
                })?;
            let created = resp
                .user()
                .cloned()
                .ok_or_else(|| HandlerError::Remote("CreateUser returned no user".into()))?;
            tracing::info!(user_arn = %created.arn(), "created IAM user");

            // IAM is eventually consistent; attaching right away can 404.
            wait_for(ctx, "IAM user visible", || self.get_user(&config.name)).await?;

            let policies = self
                .sync_policies(&config.name, &[], &config.managed_policy_arns)
                .await?;
            Ok(UserState::from_user(&created, policies))
        })
    }

    fn adopt<'a>(
        &'a self,
        ctx: &'a OpContext,
        config: &'a UserConfig,
    ) -> BoxFuture<'a, Result<Option<UserState>, HandlerError>> {
        Box::pin(async move {
            let resp = match self
                .client
                .list_user_tags()
                .user_name(&config.name)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e)
                    if e.as_service_error()
                        .is_some_and(|se| se.is_no_such_entity_exception()) =>
                {
                    return Ok(None);
                }
                Err(e) => return Err(remote("iam:ListUserTags", &e)),
            };

            let tags = resp.tags().iter().map(|t| (t.key(), Some(t.value())));
            if !owned_by(tags, ctx.owner()) {
                return Ok(None);
            }

            let Some(user) = self.get_user(&config.name).await? else {
                return Ok(None);
            };
            let policies = self.attached_policies(&config.name).await?;
            tracing::info!(user_arn = %user.arn(), "adopting existing IAM user");
            Ok(Some(UserState::from_user(&user, policies)))
        })
    }

    fn update<'a>(
        &'a self,
        _ctx: &'a OpContext,
        config: &'a UserConfig,
        state: &'a UserState,
    ) -> BoxFuture<'a, Result<UserState, HandlerError>> {
        Box::pin(async move {
            // Unconditional: the recorded path says nothing about where the
            // user lives now.
            self.client
                .update_user()
                .user_name(&state.name)
                .new_path(&config.path)
                .send()
                .await
                .map_err(|e| {
                    if e.as_service_error()
                        .is_some_and(|se| se.is_no_such_entity_exception())
                    {
                        HandlerError::NotFound(state.name.clone())
                    } else {
                        remote("iam:UpdateUser", &e)
                    }
                })?;
            tracing::info!(user = %state.name, path = %config.path, "set IAM user path");

            // Read attachments back rather than trusting the recorded list.
            let current = self.attached_policies(&state.name).await?;
            let managed_policy_arns = self
                .sync_policies(&state.name, &current, &config.managed_policy_arns)
                .await?;

            let user = self
                .get_user(&state.name)
                .await?
                .ok_or_else(|| HandlerError::NotFound(state.name.clone()))?;
            Ok(UserState::from_user(&user, managed_policy_arns))
        })
    }

    fn delete<'a>(
        &'a self,
        _ctx: &'a OpContext,
        state: &'a UserState,
    ) -> BoxFuture<'a, Result<(), HandlerError>> {
        Box::pin(async move {
            self.delete_dependents(state).await?;

            match self.client.delete_user().user_name(&state.name).send().await {
                Ok(_) => tracing::info!(user_arn = %state.arn, "deleted IAM user"),
                Err(e)
                    if e.as_service_error()
                        .is_some_and(|se| se.is_no_such_entity_exception()) =>
                {
                    tracing::debug!(user = %state.name, "IAM user already gone");
                }
                Err(e) => return Err(remote("iam:DeleteUser", &e)),
            }
            Ok(())
        })
    }
}
