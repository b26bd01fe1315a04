//! AWS-backed collaborators
//!
//! [`S3ObjectStore`] and [`SqsQueue`] implement the collaborator traits on top of
//! the AWS SDK. Both share one [`SdkConfig`] so region and credentials are resolved
//! once per process.

pub mod s3;
pub mod sqs;

pub use s3::S3ObjectStore;
pub use sqs::SqsQueue;

use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use cheyenne_core_interface::InterfaceError;
use std::fmt;

/// Resolve the shared SDK configuration
///
/// An explicit region wins; otherwise the default provider chain applies.
pub async fn load_sdk_config(region: Option<String>) -> SdkConfig {
    let region_provider = match region {
        Some(region) => RegionProviderChain::first_try(Region::new(region)),
        None => RegionProviderChain::default_provider(),
    };

    aws_config::defaults(BehaviorVersion::latest())
        .region(region_provider)
        .load()
        .await
}

/// Map an SDK failure onto the collaborator error type
pub(crate) fn interface_error<E, R>(error: SdkError<E, R>) -> InterfaceError
where
    E: ProvideErrorMetadata + fmt::Debug,
    R: fmt::Debug,
{
    match error {
        SdkError::DispatchFailure(e) => {
            InterfaceError::Network(format!("Network dispatch failure: {:?}", e))
        }
        SdkError::TimeoutError(e) => InterfaceError::Network(format!("Timed out: {:?}", e)),
        SdkError::ResponseError(e) => InterfaceError::Network(format!("Response error: {:?}", e)),
        SdkError::ServiceError(context) => {
            let err = context.err();
            let code = err.code().unwrap_or("Unknown").to_string();
            let message = err
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{:?}", err));
            service_error(code, message)
        }
        other => InterfaceError::Service {
            code: "Unknown".to_string(),
            message: format!("{:?}", other),
        },
    }
}

fn service_error(code: String, message: String) -> InterfaceError {
    match code.as_str() {
        "AccessDenied" | "AccessDeniedException" => InterfaceError::AccessDenied(message),
        _ => InterfaceError::Service { code, message },
    }
}
