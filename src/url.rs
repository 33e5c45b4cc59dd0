//! URL construction for the backend socket and TTS assets

pub const WEBSOCKET_PATH: &str = "/ws/android";
pub const STATIC_TTS_PREFIX: &str = "/static/tts/";
pub const LEGACY_TTS_PREFIX: &str = "/tts/";

pub fn websocket_url(host: &str, port: u16) -> String {
    format!("ws://{host}:{port}{WEBSOCKET_PATH}")
}

pub fn http_base(host: &str, port: u16) -> String {
    format!("http://{host}:{port}")
}

/// Map a TTS reference from a response to an absolute HTTP URL.
///
/// Accepts the canonical `/static/tts/...` path, the legacy `/tts/...` path,
/// or a bare `tts_*.mp3` filename. Anything else is passed through untouched.
/// Feeding the path component of the result back in yields the same URL.
pub fn resolve_asset_url(reference: &str, host: &str, port: u16) -> String {
    let path = if reference.starts_with(STATIC_TTS_PREFIX) {
        tracing::debug!(reference, "TTS reference already canonical");
        reference.to_string()
    } else if let Some(rest) = reference.strip_prefix(LEGACY_TTS_PREFIX) {
        tracing::debug!(reference, "Rewriting legacy TTS path");
        format!("{STATIC_TTS_PREFIX}{rest}")
    } else if is_bare_tts_filename(reference) {
        tracing::debug!(reference, "Rooting bare TTS filename");
        format!("{STATIC_TTS_PREFIX}{reference}")
    } else {
        tracing::warn!(reference, "Unrecognized TTS reference shape, using as-is");
        reference.to_string()
    };

    format!("{}{path}", http_base(host, port))
}

/// Inverse of the `http_base` prefix applied by [`resolve_asset_url`].
#[cfg(test)]
pub fn strip_http_base<'a>(url: &'a str, host: &str, port: u16) -> &'a str {
    let base = http_base(host, port);
    url.strip_prefix(base.as_str()).unwrap_or(url)
}

/// Cheap sanity check applied before a caller-requested playback.
pub fn is_plausible_tts_ref(reference: &str) -> bool {
    !reference.is_empty() && (reference.contains("tts_") || reference.contains(".mp3"))
}

fn is_bare_tts_filename(reference: &str) -> bool {
    reference.starts_with("tts_") && reference.ends_with(".mp3")
}
