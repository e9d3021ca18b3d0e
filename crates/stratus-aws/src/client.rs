use serde::{Deserialize, Serialize};

/// Where the SDK gets its credentials from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialSource {
    Inline {
        access_key_id: String,
        secret_access_key: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        session_token: Option<String>,
    },
    Profile {
        profile_name: String,
    },
    DefaultChain,
}

impl CredentialSource {
    /// Short label for logs. Never includes secrets.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Inline {
                session_token: Some(_),
                ..
            } => "temporary",
            Self::Inline { .. } => "inline",
            Self::Profile { .. } => "profile",
            Self::DefaultChain => "default_chain",
        }
    }
}

/// Build an `SdkConfig` from a region and credential source.
pub async fn build_aws_config(region: &str, creds: &CredentialSource) -> aws_config::SdkConfig {
    let mut builder = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()));

    match creds {
        CredentialSource::Inline {
            access_key_id,
            secret_access_key,
            session_token,
        } => {
            builder = builder.credentials_provider(aws_sdk_s3::config::Credentials::new(
                access_key_id,
                secret_access_key,
                session_token.clone(),
                None,
                "stratus-config",
            ));
        }
        CredentialSource::Profile { profile_name } => {
            builder = builder.profile_name(profile_name);
        }
        CredentialSource::DefaultChain => {}
    }

    tracing::debug!(region, credentials = creds.kind(), "loading aws config");
    builder.load().await
}
