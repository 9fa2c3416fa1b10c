//! Amazon Polly speech synthesis.
//!
//! # Authentication
//!
//! AWS credentials can be provided via:
//! 1. `aws_access_key_id` and `aws_secret_access_key` in config
//! 2. Environment variables: `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`
//! 3. AWS credentials file (`~/.aws/credentials`)
//! 4. IAM instance profile

mod config;
mod provider;

pub use config::{
    DEFAULT_POLLY_LANGUAGE, DEFAULT_POLLY_REGION, DEFAULT_POLLY_VOICE, MAX_TEXT_LENGTH,
    PollyEngine, PollyOutputFormat, PollyTtsConfig, region_from_env, resolve_region,
};
pub use provider::{AWS_POLLY_TTS_URL, PollySynthesizer};
