/// Environment variable naming the DynamoDB table backing resource records
pub const EXTENSION_TABLE_NAME: &str = "CF_EXTENSION_TABLE_NAME";
/// Environment variable overriding the per-invocation budget, in seconds
pub const EXTENSION_HANDLER_TIMEOUT_SECONDS: &str = "CF_EXTENSION_HANDLER_TIMEOUT_SECONDS";
/// Environment variable overriding the platform's hard invocation ceiling, in seconds
pub const EXTENSION_PLATFORM_TIMEOUT_SECONDS: &str = "CF_EXTENSION_PLATFORM_TIMEOUT_SECONDS";
