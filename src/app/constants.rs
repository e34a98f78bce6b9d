/// Server the SDK talks to unless a base URL is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.usergrid.com";
