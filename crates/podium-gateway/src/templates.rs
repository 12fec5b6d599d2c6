//! Static response bodies for browser joins and presentation injection.

const REDIRECT_HTML: &str = include_str!("assets/redirect.html");
const RETRY_JOIN_HTML: &str = include_str!("assets/retry-join.html");
const MEETING_NOT_FOUND_HTML: &str = include_str!("assets/meeting-not-found.html");
const DEFAULT_PRESENTATION_XML: &str = include_str!("assets/default-presentation-body.xml");

/// Minimal escaping for values placed into HTML attributes.
fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Fallback body for the join 302.
pub fn redirect(url: &str) -> String {
    REDIRECT_HTML.replace("{{url}}", &escape(url))
}

/// Body shown while a meeting is still starting.
pub fn retry_join(url: &str) -> String {
    RETRY_JOIN_HTML.replace("{{url}}", &escape(url))
}

/// Body for joins against unknown meetings.
pub fn meeting_not_found() -> String {
    MEETING_NOT_FOUND_HTML.to_string()
}

/// XML body injecting a frontend's default presentation into `create`.
pub fn default_presentation_body(url: &str, filename: &str) -> String {
    DEFAULT_PRESENTATION_XML
        .replace("{{url}}", &escape(url))
        .replace("{{filename}}", &escape(filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_contains_target_url() {
        let body = redirect("https://node/join?x=1&checksum=abc");
        assert!(body.contains("https://node/join?x=1&amp;checksum=abc"));
    }

    #[test]
    fn presentation_body_substitutes_both_fields() {
        let body = default_presentation_body("https://cdn/deck.pdf", "deck.pdf");
        assert!(body.contains(r#"url="https://cdn/deck.pdf""#));
        assert!(body.contains(r#"filename="deck.pdf""#));
    }

    #[test]
    fn meeting_not_found_is_static() {
        assert!(meeting_not_found().contains("does not exist"));
    }

    #[test]
    fn retry_join_refreshes_to_url() {
        assert!(retry_join("https://gw/bbb/f/join").contains("https://gw/bbb/f/join"));
    }
}
