//! stratus-aws
//!
//! AWS resource handlers for the stratus reconciliation engine, plus the
//! SDK config plumbing they need. Each handler owns one service client.

pub mod client;
mod error;
pub mod handlers;
pub mod ownership;

use aws_config::SdkConfig;
use stratus_engine::{EngineError, HandlerRegistry};

pub use crate::client::{CredentialSource, build_aws_config};
pub use crate::handlers::{CloudTrailTrailHandler, IamUserHandler, S3BucketHandler};

/// Register every AWS handler against clients built from `config`.
pub fn register_all(registry: &mut HandlerRegistry, config: &SdkConfig) -> Result<(), EngineError> {
    registry.register(S3BucketHandler::new(aws_sdk_s3::Client::new(config)))?;
    registry.register(IamUserHandler::new(aws_sdk_iam::Client::new(config)))?;
    registry.register(CloudTrailTrailHandler::new(aws_sdk_cloudtrail::Client::new(
        config,
    )))?;
    Ok(())
}

/// Resource types `register_all` provides.
pub const RESOURCE_TYPES: &[&str] = &[
    S3BucketHandler::RESOURCE_TYPE,
    IamUserHandler::RESOURCE_TYPE,
    CloudTrailTrailHandler::RESOURCE_TYPE,
];
