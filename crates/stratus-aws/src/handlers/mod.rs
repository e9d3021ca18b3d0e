pub mod cloudtrail_trail;
pub mod iam_user;
pub mod s3_bucket;

pub use cloudtrail_trail::CloudTrailTrailHandler;
pub use iam_user::IamUserHandler;
pub use s3_bucket::S3BucketHandler;
