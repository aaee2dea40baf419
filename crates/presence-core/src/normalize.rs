use url::Url;

/// Schemes that identify a site by host. Everything finer than the host is
/// dropped before a URL leaves the machine.
const WEB_SCHEMES: &[&str] = &["http", "https", "ws", "wss", "ftp"];

/// Reduce a tab URL to what friends are allowed to see.
///
/// Web URLs collapse to `scheme://host`. Browser-internal and local schemes
/// (`chrome://`, `about:`, `file://`, extension pages) keep only the first
/// segment after the scheme, so `chrome://settings/privacy` becomes
/// `chrome://settings`. Anything that does not parse is returned unchanged.
///
/// The output is a fixed point: normalizing it again yields the same string.
pub fn normalize_url(raw: &str) -> String {
    let parsed = match Url::parse(raw) {
        Ok(parsed) => parsed,
        Err(_) => return raw.to_string(),
    };
    let scheme = parsed.scheme();

    if WEB_SCHEMES.contains(&scheme) {
        return match parsed.host_str() {
            Some(host) if !host.is_empty() => format!("{scheme}://{host}"),
            _ => raw.to_string(),
        };
    }

    let candidate = opaque_form(&parsed);
    // Opaque segments can reparse differently (ports, file hosts); fall back
    // to the bare scheme when they do so the output stays a fixed point.
    match Url::parse(&candidate) {
        Ok(reparsed) if opaque_form(&reparsed) == candidate => candidate,
        _ => format!("{scheme}://"),
    }
}

fn opaque_form(parsed: &Url) -> String {
    let scheme = parsed.scheme();
    let rest = parsed
        .as_str()
        .get(scheme.len() + 1..)
        .unwrap_or_default()
        .trim_start_matches('/');
    let end = rest
        .find(|ch: char| matches!(ch, '/' | '?' | '#'))
        .unwrap_or(rest.len());
    format!("{scheme}://{}", &rest[..end])
}
