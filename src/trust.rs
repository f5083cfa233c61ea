/// Only the local server's self-signed certificate is trusted.
pub const TRUSTED_ORIGIN_PREFIX: &str = "https://127.0.0.1";

/// Whether the viewport may load `url`. Loopback HTTPS is accepted without
/// chain validation; every other origin is rejected.
pub fn is_trusted_origin(url: &str) -> bool {
    url.starts_with(TRUSTED_ORIGIN_PREFIX)
}
