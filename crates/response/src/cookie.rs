use chrono::{Duration, Utc};

/// A cookie queued on a response.
///
/// `days` follows the usual convention: `None` is a session cookie, zero or a
/// negative count expires the cookie immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: Option<String>,
    pub days: Option<i32>,
    pub path: Option<String>,
    pub domain: Option<String>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: Option<&str>) -> Self {
        Self {
            name: name.into(),
            value: value.map(strip_line_breaks),
            days: None,
            path: None,
            domain: None,
        }
    }

    pub fn set_value(&mut self, value: Option<&str>) {
        self.value = value.map(strip_line_breaks);
    }

    /// Render the `Set-Cookie` header value.
    pub fn header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value.as_deref().unwrap_or(""));
        match self.days {
            Some(days) if days > 0 => {
                let expires = Utc::now() + Duration::days(i64::from(days));
                out.push_str(&format!(
                    "; Max-Age={}; Expires={}",
                    i64::from(days) * 86_400,
                    expires.format("%a, %d %b %Y %H:%M:%S GMT")
                ));
            }
            Some(_) => out.push_str("; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT"),
            None => {}
        }
        out.push_str("; Path=");
        out.push_str(self.path.as_deref().unwrap_or("/"));
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        out
    }
}

/// Remove CR and LF so user data cannot split a header.
pub fn strip_line_breaks(value: &str) -> String {
    value.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_has_default_path() {
        let cookie = Cookie::new("sid", Some("abc"));
        assert_eq!(cookie.header_value(), "sid=abc; Path=/");
    }

    #[test]
    fn expired_cookie_and_domain() {
        let mut cookie = Cookie::new("sid", None);
        cookie.days = Some(0);
        cookie.domain = Some("example.org".into());
        let header = cookie.header_value();
        assert!(header.starts_with("sid=; Max-Age=0;"));
        assert!(header.ends_with("; Domain=example.org"));
    }

    #[test]
    fn persistent_cookie_carries_expiry() {
        let mut cookie = Cookie::new("pref", Some("dark"));
        cookie.days = Some(2);
        let header = cookie.header_value();
        assert!(header.contains("Max-Age=172800"));
        assert!(header.contains("GMT"));
    }

    #[test]
    fn values_lose_line_breaks() {
        let cookie = Cookie::new("x", Some("a\r\nSet-Cookie: evil"));
        assert_eq!(cookie.value.as_deref(), Some("aSet-Cookie: evil"));
    }
}
